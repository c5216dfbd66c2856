//! Codificação de linhas no formato ILP (InfluxDB Line Protocol)
//!
//! Formato: `tabela,simbolo=valor coluna=valor timestamp_nanos\n`
//!
//! Só cobre o que este programa envia: símbolos, colunas double e
//! timestamp designado (ou nenhum, quando o servidor atribui o horário).

use crate::error::SenderError;

/// Marcador de double binário no protocolo v2.
const DOUBLE_BINARY_FORMAT_TYPE: u8 = 16;

/// Versão do protocolo de ingestão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Doubles como texto.
    V1,
    /// Doubles em binário (little-endian).
    V2,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }
}

/// Em que ponto da linha o buffer está.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    /// Nenhuma linha aberta.
    Idle,
    /// Tabela escrita, aceita símbolos ou colunas.
    Symbols,
    /// Pelo menos uma coluna escrita, aceita colunas ou timestamp.
    Columns,
}

/// Buffer de linhas pendentes de envio.
#[derive(Debug)]
pub struct LineBuffer {
    output: Vec<u8>,
    version: ProtocolVersion,
    state: LineState,
    row_count: usize,
    /// Posição do início da linha corrente (para descartar linhas incompletas).
    line_start: usize,
}

impl LineBuffer {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            output: Vec::with_capacity(64 * 1024),
            version,
            state: LineState::Idle,
            row_count: 0,
            line_start: 0,
        }
    }

    /// Linhas completas no buffer.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.output
    }

    /// Esvazia o buffer e retorna o conteúdo pronto para envio.
    ///
    /// Falha se houver uma linha aberta.
    pub fn take(&mut self) -> Result<Vec<u8>, SenderError> {
        if self.state != LineState::Idle {
            return Err(SenderError::Encode(
                "linha incompleta no buffer (faltou at/at_now)".to_string(),
            ));
        }
        self.row_count = 0;
        self.line_start = 0;
        Ok(std::mem::take(&mut self.output))
    }

    pub fn clear(&mut self) {
        self.output.clear();
        self.state = LineState::Idle;
        self.row_count = 0;
        self.line_start = 0;
    }

    /// Descarta a linha aberta, mantendo as linhas completas.
    pub fn rewind(&mut self) {
        self.output.truncate(self.line_start);
        self.state = LineState::Idle;
    }

    pub fn table(&mut self, name: &str) -> Result<&mut Self, SenderError> {
        if self.state != LineState::Idle {
            return Err(SenderError::Encode("table() chamado com linha aberta".to_string()));
        }
        check_name("tabela", name)?;
        self.line_start = self.output.len();
        write_escaped(&mut self.output, name);
        self.state = LineState::Symbols;
        Ok(self)
    }

    pub fn symbol(&mut self, name: &str, value: &str) -> Result<&mut Self, SenderError> {
        if self.state != LineState::Symbols {
            return Err(SenderError::Encode(format!(
                "symbol({name}) fora de ordem: símbolos vêm antes das colunas"
            )));
        }
        check_name("coluna", name)?;
        self.output.push(b',');
        write_escaped(&mut self.output, name);
        self.output.push(b'=');
        write_escaped(&mut self.output, value);
        Ok(self)
    }

    pub fn column_f64(&mut self, name: &str, value: f64) -> Result<&mut Self, SenderError> {
        let separator = match self.state {
            LineState::Symbols => b' ',
            LineState::Columns => b',',
            LineState::Idle => {
                return Err(SenderError::Encode(format!(
                    "column_f64({name}) sem table()"
                )))
            }
        };
        check_name("coluna", name)?;
        self.output.push(separator);
        write_escaped(&mut self.output, name);
        self.output.push(b'=');
        match self.version {
            ProtocolVersion::V1 => write_f64_text(&mut self.output, value),
            ProtocolVersion::V2 => {
                self.output.push(b'=');
                self.output.push(DOUBLE_BINARY_FORMAT_TYPE);
                self.output.extend_from_slice(&value.to_le_bytes());
            }
        }
        self.state = LineState::Columns;
        Ok(self)
    }

    /// Fecha a linha com timestamp designado em nanossegundos.
    pub fn at(&mut self, timestamp_nanos: i64) -> Result<(), SenderError> {
        self.ensure_closable()?;
        self.output.push(b' ');
        self.output
            .extend_from_slice(timestamp_nanos.to_string().as_bytes());
        self.finish_line();
        Ok(())
    }

    /// Fecha a linha sem timestamp: o servidor atribui o horário de chegada.
    pub fn at_now(&mut self) -> Result<(), SenderError> {
        self.ensure_closable()?;
        self.finish_line();
        Ok(())
    }

    fn ensure_closable(&self) -> Result<(), SenderError> {
        if self.state != LineState::Columns {
            return Err(SenderError::Encode(
                "linha precisa de pelo menos uma coluna antes do timestamp".to_string(),
            ));
        }
        Ok(())
    }

    fn finish_line(&mut self) {
        self.output.push(b'\n');
        self.state = LineState::Idle;
        self.row_count += 1;
        self.line_start = self.output.len();
    }
}

fn check_name(kind: &str, name: &str) -> Result<(), SenderError> {
    if name.is_empty() {
        return Err(SenderError::Encode(format!("nome de {kind} vazio")));
    }
    Ok(())
}

fn write_escaped(out: &mut Vec<u8>, value: &str) {
    for b in value.bytes() {
        match b {
            b' ' | b',' | b'=' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
}

fn write_f64_text(out: &mut Vec<u8>, value: f64) {
    if value.is_nan() {
        out.extend_from_slice(b"NaN");
    } else if value.is_infinite() {
        let s: &[u8] = if value > 0.0 { b"Infinity" } else { b"-Infinity" };
        out.extend_from_slice(s);
    } else {
        out.extend_from_slice(value.to_string().as_bytes());
    }
}
