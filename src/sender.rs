//! Envio de linhas ILP via HTTP
//!
//! Cada worker tem o seu próprio `HttpLineSender` (cliente HTTP próprio,
//! buffer próprio). Nada aqui é compartilhado entre workers.

use crate::connection::Auth;
use crate::error::{Result, SenderError};
use crate::ilp::{LineBuffer, ProtocolVersion};
use crate::types::{EventTimestamp, TradeRow};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ============================================================================
// Contratos
// ============================================================================

/// Uma conexão de envio, de uso exclusivo de um worker.
#[async_trait]
pub trait LineSender: Send {
    /// Acrescenta um trade ao buffer. Pode disparar um flush automático.
    async fn send_trade(&mut self, table: &str, row: &TradeRow, ts: EventTimestamp) -> Result<()>;

    /// Entrega tudo o que está no buffer.
    async fn flush(&mut self) -> Result<()>;

    /// Libera a conexão. Dados não entregues são descartados.
    async fn close(&mut self);
}

/// Fábrica de conexões: cada chamada abre uma conexão independente.
#[async_trait]
pub trait Connector: Send + Sync {
    type Sender: LineSender + 'static;

    async fn connect(&self, worker_id: usize) -> Result<Self::Sender>;
}

/// Escreve um trade como linha ILP.
pub fn encode_trade(
    buffer: &mut LineBuffer,
    table: &str,
    row: &TradeRow,
    ts: EventTimestamp,
) -> Result<()> {
    buffer
        .table(table)?
        .symbol("symbol", &row.symbol)?
        .symbol("side", &row.side)?
        .column_f64("price", row.price)?
        .column_f64("amount", row.amount)?;

    match ts {
        EventTimestamp::Now => buffer.at_now(),
        EventTimestamp::At(at) => {
            let nanos = at.timestamp_nanos_opt().ok_or_else(|| {
                SenderError::Encode(format!("timestamp fora do intervalo suportado: {at}"))
            })?;
            buffer.at(nanos)
        }
    }
}

// ============================================================================
// Política de Retry e Flush
// ============================================================================

/// Primeira espera entre tentativas; dobra a cada falha.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Timeout base de cada requisição.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Vazão mínima esperada: soma `len / vazão` ao timeout da requisição.
const MIN_THROUGHPUT_BYTES_PER_SEC: f64 = 100.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Tempo total de tentativas por flush. Zero desativa o retry.
    pub timeout: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoFlush {
    pub rows: usize,
    pub interval: Duration,
}

impl Default for AutoFlush {
    fn default() -> Self {
        Self {
            rows: 75_000,
            interval: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Sender HTTP
// ============================================================================

pub struct HttpLineSender {
    client: Option<reqwest::Client>,
    endpoints: Vec<Url>,
    next_endpoint: usize,
    auth: Auth,
    buffer: LineBuffer,
    retry: RetryPolicy,
    auto_flush: AutoFlush,
    last_flush: Instant,
}

impl HttpLineSender {
    pub fn new(
        client: reqwest::Client,
        endpoints: Vec<Url>,
        auth: Auth,
        version: ProtocolVersion,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(SenderError::Connect("nenhum endereço configurado".to_string()));
        }
        Ok(Self {
            client: Some(client),
            endpoints,
            next_endpoint: 0,
            auth,
            buffer: LineBuffer::new(version),
            retry,
            auto_flush: AutoFlush::default(),
            last_flush: Instant::now(),
        })
    }

    #[cfg(test)]
    pub fn with_auto_flush(mut self, auto_flush: AutoFlush) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    /// Linhas ainda não entregues.
    #[cfg(test)]
    pub fn pending_rows(&self) -> usize {
        self.buffer.row_count()
    }

    fn should_auto_flush(&self) -> bool {
        self.buffer.row_count() >= self.auto_flush.rows
            || self.last_flush.elapsed() >= self.auto_flush.interval
    }

    async fn send_with_retry(&mut self, body: Bytes) -> Result<()> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| SenderError::Connect("sender já fechado".to_string()))?;

        let start = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let url = self.endpoints[self.next_endpoint].clone();
            let err = match post(&client, &url, &self.auth, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !err.is_retriable() {
                return Err(err);
            }

            let elapsed = start.elapsed();
            if elapsed + backoff > self.retry.timeout {
                if self.retry.timeout.is_zero() {
                    return Err(err);
                }
                return Err(SenderError::RetryTimeout {
                    elapsed,
                    last: Box::new(err),
                });
            }

            warn!(endpoint = %url, backoff_ms = backoff.as_millis() as u64, error = %err, "Falha transitória, tentando novamente");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.retry.max_backoff);
            self.next_endpoint = (self.next_endpoint + 1) % self.endpoints.len();
        }
    }
}

async fn post(client: &reqwest::Client, url: &Url, auth: &Auth, body: Bytes) -> Result<()> {
    let timeout =
        REQUEST_TIMEOUT + Duration::from_secs_f64(body.len() as f64 / MIN_THROUGHPUT_BYTES_PER_SEC);

    let request = client
        .post(url.clone())
        .timeout(timeout)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body);

    let request = match auth {
        Auth::None => request,
        Auth::Bearer(token) => request.bearer_auth(token),
        Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
    };

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(SenderError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl LineSender for HttpLineSender {
    async fn send_trade(&mut self, table: &str, row: &TradeRow, ts: EventTimestamp) -> Result<()> {
        if let Err(e) = encode_trade(&mut self.buffer, table, row, ts) {
            self.buffer.rewind();
            return Err(e);
        }
        if self.should_auto_flush() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            self.last_flush = Instant::now();
            return Ok(());
        }

        let rows = self.buffer.row_count();
        let body = Bytes::from(self.buffer.take()?);
        let bytes = body.len();
        self.send_with_retry(body).await?;
        self.last_flush = Instant::now();

        debug!(rows, bytes, "Flush concluído");
        Ok(())
    }

    async fn close(&mut self) {
        self.client = None;
        self.buffer.clear();
    }
}
