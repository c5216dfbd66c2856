//! Argumentos de linha de comando

use crate::error::ArgsError;
use crate::types::TimestampMode;
use crate::worker::SendPlan;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRS: &str = "questdb:9000";
pub const DEFAULT_CSV: &str = "./trades20250728.csv.gz";

/// Reenvia as linhas de um CSV de trades para o QuestDB, em paralelo.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Endereços host:porta separados por vírgula
    #[arg(long, default_value = DEFAULT_ADDRS)]
    pub addrs: String,

    /// Token de autenticação (Bearer). Tem prioridade sobre usuário/senha
    #[arg(long)]
    pub token: Option<String>,

    #[arg(long, requires = "password")]
    pub username: Option<String>,

    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Total de eventos, dividido entre os senders
    #[arg(long, default_value_t = 1_000_000, allow_negative_numbers = true)]
    pub total_events: i64,

    /// Pausa após cada evento, por sender (<= 0 desativa)
    #[arg(long, default_value_t = 50, allow_negative_numbers = true)]
    pub delay_ms: i64,

    /// Quantidade de senders concorrentes (uma conexão cada)
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub num_senders: i32,

    /// Tempo total de retry por conexão, em ms
    #[arg(long, default_value_t = 360_000)]
    pub retry_timeout: u64,

    /// Arquivo CSV (gzip se terminar em .gz)
    #[arg(long, default_value = DEFAULT_CSV)]
    pub csv: PathBuf,

    /// Usa a coluna `timestamp` do CSV em vez do horário de envio
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub timestamp_from_file: bool,
}

/// Configuração validada da execução.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub csv: PathBuf,
    pub total_events: u64,
    pub num_senders: usize,
    pub retry_timeout: Duration,
    pub timestamp_mode: TimestampMode,
    pub plan: SendPlan,
}

impl Args {
    /// Ordem de checagem: arquivo, senders, eventos.
    pub fn validate(&self) -> Result<RunConfig, ArgsError> {
        if !self.csv.exists() {
            return Err(ArgsError::CsvNotFound(self.csv.clone()));
        }
        let num_senders = positive("num-senders", i64::from(self.num_senders))?;
        let total_events = positive("total-events", self.total_events)?;

        let timestamp_mode = TimestampMode::from_flag(self.timestamp_from_file);
        Ok(RunConfig {
            csv: self.csv.clone(),
            total_events,
            num_senders: num_senders as usize,
            retry_timeout: Duration::from_millis(self.retry_timeout),
            timestamp_mode,
            plan: SendPlan::new(self.delay_ms, timestamp_mode),
        })
    }
}

fn positive(flag: &'static str, value: i64) -> Result<u64, ArgsError> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(ArgsError::NotPositive { flag, value })
}
