//! Conector de teste que grava tudo o que cada worker envia.

use crate::error::{Result, SenderError};
use crate::sender::{Connector, LineSender};
use crate::types::{EventTimestamp, TradeRow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub fn row(symbol: &str) -> TradeRow {
    TradeRow {
        symbol: symbol.to_string(),
        side: "buy".to_string(),
        price: 100.0,
        amount: 0.5,
        timestamp: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub table: String,
    pub symbol: String,
    pub side: String,
    pub ts: EventTimestamp,
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    pub emitted: Vec<Emitted>,
    /// Eventos entregues pelo último flush bem-sucedido.
    pub flushed: usize,
    pub flushes: usize,
    pub closed: bool,
}

#[derive(Default)]
pub struct RecordingConnector {
    journals: Mutex<HashMap<usize, Arc<Mutex<Journal>>>>,
    fail_connect: HashSet<usize>,
    panic_connect: HashSet<usize>,
    fail_send: HashMap<usize, usize>,
    fail_flush: HashSet<usize>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect(mut self, ids: impl IntoIterator<Item = usize>) -> Self {
        self.fail_connect.extend(ids);
        self
    }

    pub fn panicking_connect(mut self, id: usize) -> Self {
        self.panic_connect.insert(id);
        self
    }

    /// O worker `id` falha ao tentar enviar o evento de índice `at`.
    pub fn failing_send(mut self, id: usize, at: usize) -> Self {
        self.fail_send.insert(id, at);
        self
    }

    pub fn failing_flush(mut self, id: usize) -> Self {
        self.fail_flush.insert(id);
        self
    }

    pub fn journal(&self, id: usize) -> Option<Journal> {
        let journals = self.journals.lock().unwrap();
        journals.get(&id).map(|j| j.lock().unwrap().clone())
    }
}

pub struct RecordingSender {
    journal: Arc<Mutex<Journal>>,
    fail_send_at: Option<usize>,
    fail_flush: bool,
}

#[async_trait]
impl Connector for RecordingConnector {
    type Sender = RecordingSender;

    async fn connect(&self, worker_id: usize) -> Result<RecordingSender> {
        if self.panic_connect.contains(&worker_id) {
            panic!("sender {worker_id} explodiu");
        }
        if self.fail_connect.contains(&worker_id) {
            return Err(SenderError::Connect(format!(
                "conexão recusada para sender {worker_id}"
            )));
        }

        let journal = Arc::new(Mutex::new(Journal::default()));
        self.journals
            .lock()
            .unwrap()
            .insert(worker_id, Arc::clone(&journal));

        Ok(RecordingSender {
            journal,
            fail_send_at: self.fail_send.get(&worker_id).copied(),
            fail_flush: self.fail_flush.contains(&worker_id),
        })
    }
}

#[async_trait]
impl LineSender for RecordingSender {
    async fn send_trade(&mut self, table: &str, row: &TradeRow, ts: EventTimestamp) -> Result<()> {
        let mut journal = self.journal.lock().unwrap();
        if self.fail_send_at == Some(journal.emitted.len()) {
            return Err(SenderError::Rejected {
                status: 400,
                body: "linha rejeitada".to_string(),
            });
        }
        journal.emitted.push(Emitted {
            table: table.to_string(),
            symbol: row.symbol.clone(),
            side: row.side.clone(),
            ts,
        });
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let mut journal = self.journal.lock().unwrap();
        if self.fail_flush {
            return Err(SenderError::Connect("conexão perdida no flush".to_string()));
        }
        journal.flushes += 1;
        journal.flushed = journal.emitted.len();
        Ok(())
    }

    async fn close(&mut self) {
        self.journal.lock().unwrap().closed = true;
    }
}
