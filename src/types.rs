//! Tipos e estruturas de dados

use chrono::{DateTime, Utc};

/// Uma linha do CSV já convertida.
///
/// `timestamp` só é preenchido quando o modo de timestamp do arquivo está ativo.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRow {
    pub symbol: String,
    pub side: String,
    pub price: f64,
    pub amount: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Conjunto imutável de linhas carregadas do CSV.
///
/// Compartilhado entre os workers via `Arc`, somente leitura. Nunca é
/// alterado depois de construído, então não precisa de lock.
#[derive(Debug, Clone, Default)]
pub struct RowStore {
    rows: Vec<TradeRow>,
}

impl RowStore {
    pub fn new(rows: Vec<TradeRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[TradeRow] {
        &self.rows
    }

    /// Retorna a linha `i mod len`: o conjunto é tratado como cíclico, então
    /// qualquer quantidade de eventos pode ser atendida.
    ///
    /// Retorna `None` apenas se o store estiver vazio.
    pub fn cyclic(&self, i: u64) -> Option<&TradeRow> {
        if self.rows.is_empty() {
            return None;
        }
        let idx = (i % self.rows.len() as u64) as usize;
        self.rows.get(idx)
    }
}

/// Cota de eventos de um worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub id: usize,
    pub events_to_send: u64,
}

/// De onde vem o timestamp de cada evento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// Timestamp atribuído no momento do envio.
    SubmitTime,
    /// Timestamp lido da coluna `timestamp` do CSV.
    FromSource,
}

impl TimestampMode {
    pub fn from_flag(from_file: bool) -> Self {
        if from_file {
            TimestampMode::FromSource
        } else {
            TimestampMode::SubmitTime
        }
    }

    pub fn requires_column(self) -> bool {
        self == TimestampMode::FromSource
    }
}

/// Timestamp efetivo de um evento enviado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTimestamp {
    /// Servidor atribui o horário de chegada.
    Now,
    At(DateTime<Utc>),
}
