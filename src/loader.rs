//! Carga do CSV de trades (texto puro ou gzip)

use crate::error::LoadError;
use crate::types::{RowStore, TimestampMode, TradeRow};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 4] = ["symbol", "side", "price", "amount"];
const TIMESTAMP_COLUMN: &str = "timestamp";

/// Carrega todas as linhas do arquivo em memória.
///
/// A compressão é escolhida pelo sufixo `.gz` do nome, sem inspecionar o
/// conteúdo. Um arquivo só com cabeçalho retorna um `RowStore` vazio; quem
/// chama decide rejeitá-lo.
pub fn load_rows(path: &Path, mode: TimestampMode) -> Result<RowStore, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let input: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    read_rows(input, mode)
}

fn is_gzip(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Lê o CSV de qualquer fonte. Qualquer valor inválido aborta a carga inteira.
pub fn read_rows<R: Read>(input: R, mode: TimestampMode) -> Result<RowStore, LoadError> {
    // Cabeçalho tratado manualmente para poder aparar os nomes
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record?,
        None => return Ok(RowStore::default()),
    };
    let columns = Columns::from_header(&header, mode)?;

    let mut rows = Vec::with_capacity(1024);
    for record in records {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push(columns.parse(&record, line)?);
    }

    Ok(RowStore::new(rows))
}

/// Posições das colunas obrigatórias no cabeçalho.
#[derive(Debug)]
struct Columns {
    symbol: usize,
    side: usize,
    price: usize,
    amount: usize,
    timestamp: Option<usize>,
}

impl Columns {
    fn from_header(header: &csv::StringRecord, mode: TimestampMode) -> Result<Self, LoadError> {
        let names: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let lookup = |column: &str| {
            index
                .get(column)
                .copied()
                .ok_or_else(|| LoadError::MissingColumn {
                    column: column.to_string(),
                    header: header.iter().map(str::to_string).collect(),
                })
        };

        for column in REQUIRED_COLUMNS {
            lookup(column)?;
        }

        let timestamp = if mode.requires_column() {
            Some(lookup(TIMESTAMP_COLUMN)?)
        } else {
            None
        };

        Ok(Self {
            symbol: lookup("symbol")?,
            side: lookup("side")?,
            price: lookup("price")?,
            amount: lookup("amount")?,
            timestamp,
        })
    }

    fn parse(&self, record: &csv::StringRecord, line: u64) -> Result<TradeRow, LoadError> {
        let field = |idx: usize, column: &str| {
            record
                .get(idx)
                .map(str::trim)
                .ok_or_else(|| LoadError::MissingField {
                    line,
                    column: column.to_string(),
                })
        };

        let number = |idx: usize, column: &str| -> Result<f64, LoadError> {
            let raw = field(idx, column)?;
            raw.parse::<f64>().map_err(|_| LoadError::InvalidNumber {
                line,
                column: column.to_string(),
                value: raw.to_string(),
            })
        };

        let timestamp = match self.timestamp {
            Some(idx) => {
                let raw = field(idx, TIMESTAMP_COLUMN)?;
                let parsed = DateTime::parse_from_rfc3339(raw).map_err(|source| {
                    LoadError::InvalidTimestamp {
                        line,
                        value: raw.to_string(),
                        source,
                    }
                })?;
                Some(parsed.with_timezone(&Utc))
            }
            None => None,
        };

        Ok(TradeRow {
            symbol: field(self.symbol, "symbol")?.to_string(),
            side: field(self.side, "side")?.to_string(),
            price: number(self.price, "price")?,
            amount: number(self.amount, "amount")?,
            timestamp,
        })
    }
}
