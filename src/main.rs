//! Envio Paralelo de Trades - CSV → QuestDB
//!
//! Este programa carrega as linhas de um CSV de trades (texto ou .gz) e as
//! reenvia como eventos para o QuestDB via ILP sobre HTTP, dividindo o total
//! de eventos entre vários senders concorrentes (uma conexão cada).
//!
//! Códigos de saída:
//! - 0: todos os senders concluíram
//! - 1: pelo menos um sender falhou
//! - 2: uso/validação (flags, arquivo, CSV)
//!
//! Uso:
//!   ./target/release/csv-parallel-sender --addrs questdb:9000 --num-senders 10
//!   RUST_LOG=debug ./target/release/csv-parallel-sender --csv trades.csv --delay-ms 0 --timestamp-from-file true

mod config;
mod connection;
mod dispatcher;
mod error;
mod ilp;
mod loader;
mod sender;
mod types;
mod worker;

#[cfg(test)]
mod testing;

use clap::Parser;
use config::Args;
use connection::ConnectionConfig;
use dispatcher::{compute_assignments, dispatch, DispatchSummary};
use error::AppError;
use sender::Connector;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(&args, Arc::new).await {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Valida, carrega o CSV e dispara os senders.
///
/// `connector` recebe a configuração de conexão já validada e devolve quem
/// abre as conexões de cada worker.
async fn run<C, F>(args: &Args, connector: F) -> Result<DispatchSummary, AppError>
where
    C: Connector + 'static,
    F: FnOnce(ConnectionConfig) -> Arc<C>,
{
    // ========================================================================
    // Validação (nada de rede antes daqui)
    // ========================================================================

    let settings = args.validate()?;

    let connection = ConnectionConfig::build(
        &args.addrs,
        args.token.as_deref(),
        args.username.as_deref(),
        args.password.as_deref(),
        settings.retry_timeout,
    )?;
    info!("Ingestão iniciada. Conectando com config: {}", connection);

    let rows = loader::load_rows(&settings.csv, settings.timestamp_mode)?;
    if rows.is_empty() {
        return Err(AppError::EmptyCsv(settings.csv));
    }
    info!(rows = rows.len(), csv = %settings.csv.display(), "CSV carregado");

    // ========================================================================
    // Envio
    // ========================================================================

    let assignments = compute_assignments(settings.total_events, settings.num_senders);
    let summary = dispatch(connector(connection), Arc::new(rows), assignments, settings.plan).await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, DispatchError};
    use crate::testing::RecordingConnector;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(csv: &NamedTempFile, extra: &[&str]) -> Args {
        let path = csv.path().to_str().unwrap();
        let base = ["csv-parallel-sender", "--csv", path, "--delay-ms", "0"];
        Args::try_parse_from(base.iter().chain(extra.iter()).copied()).unwrap()
    }

    #[tokio::test]
    async fn header_only_csv_is_a_usage_error() {
        let csv = csv_file("symbol,side,price,amount\n");
        let connector = Arc::new(RecordingConnector::new());

        let err = run(&args(&csv, &[]), |_| Arc::clone(&connector)).await.unwrap_err();
        assert!(matches!(err, AppError::EmptyCsv(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(connector.journal(0).is_none());
    }

    #[tokio::test]
    async fn blank_address_list_is_a_usage_error() {
        let csv = csv_file("symbol,side,price,amount\nA,buy,1,1\n");

        let err = run(&args(&csv, &["--addrs", " , "]), |_| Arc::new(RecordingConnector::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::NoAddresses)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn invalid_counts_and_bad_rows_are_usage_errors() {
        let csv = csv_file("symbol,side,price,amount\nA,buy,1,1\n");
        let err = run(&args(&csv, &["--num-senders", "0"]), |_| {
            Arc::new(RecordingConnector::new())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Args(_)));
        assert_eq!(err.exit_code(), 2);

        let csv = csv_file("symbol,side,price,amount\nA,buy,x,1\n");
        let err = run(&args(&csv, &[]), |_| Arc::new(RecordingConnector::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Load(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn one_failing_worker_exits_with_failure_status() {
        let csv = csv_file("symbol,side,price,amount\nA,buy,1,1\nB,sell,2,2\n");
        let connector = Arc::new(RecordingConnector::new().failing_connect([3]));

        let err = run(
            &args(&csv, &["--num-senders", "10", "--total-events", "1000"]),
            |_| Arc::clone(&connector),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::WorkersFailed { failed: 1, total: 10, .. })
        ));
        assert_eq!(err.exit_code(), 1);
        assert_ne!(err.exit_code(), AppError::EmptyCsv(csv.path().into()).exit_code());
        assert!(err.to_string().contains("Sender 3"));
        for id in (0..10).filter(|id| *id != 3) {
            assert_eq!(connector.journal(id).unwrap().flushed, 100);
        }
    }

    #[tokio::test]
    async fn full_run_sends_every_event() {
        let csv = csv_file("symbol,side,price,amount\nA,buy,1,1\n");
        let connector = Arc::new(RecordingConnector::new());

        let summary = run(
            &args(&csv, &["--num-senders", "3", "--total-events", "100"]),
            |_| Arc::clone(&connector),
        )
        .await
        .unwrap();
        assert_eq!(summary.total_sent(), 100);
        assert_eq!(summary.reports.len(), 3);
    }
}
