//! Worker: uma conexão, uma cota de eventos
//!
//! Ciclo de vida: Idle → Connected → Sending → Flushing → Done, ou Failed a
//! partir de qualquer etapa depois do connect. A conexão é sempre liberada
//! antes do resultado ser devolvido ao dispatcher.

use crate::error::{SenderError, WorkerError, WorkerStage};
use crate::sender::{Connector, LineSender};
use crate::types::{EventTimestamp, RowStore, TimestampMode, TradeRow, WorkerAssignment};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

/// Tabela de destino de todos os eventos.
pub const TABLE: &str = "trades";

/// Parâmetros de envio comuns a todos os workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPlan {
    /// Pausa após cada evento (None = sem pausa).
    pub delay: Option<Duration>,
    pub timestamp_mode: TimestampMode,
}

impl SendPlan {
    /// `delay_ms <= 0` desativa a pausa.
    pub fn new(delay_ms: i64, timestamp_mode: TimestampMode) -> Self {
        let delay = u64::try_from(delay_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        Self {
            delay,
            timestamp_mode,
        }
    }
}

/// Resumo de um worker que terminou com sucesso.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub sent: u64,
}

/// Linha de conclusão impressa em stdout.
impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sender {} terminou de enviar {} eventos", self.id, self.sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Connected,
    Sending,
    Flushing,
    Done,
    Failed,
}

fn enter(worker: usize, state: WorkerState) {
    debug!(worker, state = ?state, "Transição de estado");
}

fn failed_at(worker_id: usize, stage: WorkerStage) -> impl Fn(SenderError) -> WorkerError {
    move |source| WorkerError::Failed {
        worker_id,
        stage,
        source,
    }
}

/// Executa um worker até o fim.
///
/// Abre a própria conexão, envia exatamente `events_to_send` eventos
/// percorrendo as linhas de forma cíclica (`linha[i mod len]`), faz o flush
/// final e fecha a conexão em qualquer caminho de saída.
pub async fn run_worker<C: Connector>(
    connector: &C,
    rows: &RowStore,
    assignment: WorkerAssignment,
    plan: SendPlan,
) -> Result<WorkerReport, WorkerError> {
    let id = assignment.id;
    enter(id, WorkerState::Idle);
    info!(worker = id, "Sender {} vai enviar {} eventos", id, assignment.events_to_send);

    let mut sender = match connector.connect(id).await {
        Ok(sender) => sender,
        Err(source) => {
            let err = failed_at(id, WorkerStage::Connect)(source);
            enter(id, WorkerState::Failed);
            error!(worker = id, error = %err, "Sender {} falhou ao conectar", id);
            return Err(err);
        }
    };
    enter(id, WorkerState::Connected);

    let outcome = send_quota(&mut sender, rows, assignment, plan).await;

    // Libera a conexão antes de reportar, com sucesso ou erro
    sender.close().await;

    match outcome {
        Ok(sent) => {
            enter(id, WorkerState::Done);
            let report = WorkerReport { id, sent };
            // Resumo por worker vai para stdout, independente de RUST_LOG
            println!("{report}");
            Ok(report)
        }
        Err(err) => {
            enter(id, WorkerState::Failed);
            error!(worker = id, error = %err, "Sender {} recebeu erro", id);
            Err(err)
        }
    }
}

async fn send_quota<S: LineSender>(
    sender: &mut S,
    rows: &RowStore,
    assignment: WorkerAssignment,
    plan: SendPlan,
) -> Result<u64, WorkerError> {
    let id = assignment.id;
    enter(id, WorkerState::Sending);

    let mut sent = 0u64;
    for i in 0..assignment.events_to_send {
        let row = rows
            .cyclic(i)
            .ok_or_else(|| SenderError::Encode("conjunto de linhas vazio".to_string()))
            .map_err(failed_at(id, WorkerStage::Send))?;

        let ts = event_timestamp(row, plan.timestamp_mode).map_err(failed_at(id, WorkerStage::Send))?;
        sender
            .send_trade(TABLE, row, ts)
            .await
            .map_err(failed_at(id, WorkerStage::Send))?;
        sent += 1;

        if let Some(delay) = plan.delay {
            tokio::time::sleep(delay).await;
        }
    }

    enter(id, WorkerState::Flushing);
    sender.flush().await.map_err(failed_at(id, WorkerStage::Flush))?;

    Ok(sent)
}

fn event_timestamp(row: &TradeRow, mode: TimestampMode) -> Result<EventTimestamp, SenderError> {
    match mode {
        TimestampMode::SubmitTime => Ok(EventTimestamp::Now),
        TimestampMode::FromSource => row
            .timestamp
            .map(EventTimestamp::At)
            .ok_or_else(|| SenderError::Encode(format!("linha sem timestamp: {}", row.symbol))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, RecordingConnector};
    use chrono::{TimeZone, Utc};

    fn assignment(id: usize, events_to_send: u64) -> WorkerAssignment {
        WorkerAssignment { id, events_to_send }
    }

    fn no_delay() -> SendPlan {
        SendPlan::new(0, TimestampMode::SubmitTime)
    }

    #[tokio::test]
    async fn replays_rows_cyclically_then_flushes_and_closes() {
        let connector = RecordingConnector::new();
        let rows = RowStore::new(vec![row("A"), row("B")]);

        let report = run_worker(&connector, &rows, assignment(0, 5), no_delay())
            .await
            .unwrap();
        assert_eq!(report, WorkerReport { id: 0, sent: 5 });

        let journal = connector.journal(0).unwrap();
        let symbols: Vec<_> = journal.emitted.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B", "A", "B", "A"]);
        assert!(journal.emitted.iter().all(|e| e.table == TABLE));
        assert!(journal.emitted.iter().all(|e| e.ts == EventTimestamp::Now));
        assert_eq!(journal.flushed, 5);
        assert!(journal.closed);
    }

    #[tokio::test]
    async fn zero_quota_still_flushes_and_closes() {
        let connector = RecordingConnector::new();
        let rows = RowStore::new(vec![row("A")]);

        let report = run_worker(&connector, &rows, assignment(2, 0), no_delay())
            .await
            .unwrap();
        assert_eq!(report.sent, 0);
        let journal = connector.journal(2).unwrap();
        assert_eq!(journal.flushes, 1);
        assert!(journal.closed);
    }

    #[tokio::test]
    async fn source_mode_uses_row_timestamp() {
        let connector = RecordingConnector::new();
        let ts = Utc.with_ymd_and_hms(2025, 7, 28, 10, 0, 0).unwrap();
        let mut with_ts = row("A");
        with_ts.timestamp = Some(ts);
        let rows = RowStore::new(vec![with_ts]);

        run_worker(
            &connector,
            &rows,
            assignment(0, 2),
            SendPlan::new(0, TimestampMode::FromSource),
        )
        .await
        .unwrap();

        let journal = connector.journal(0).unwrap();
        assert_eq!(journal.emitted.len(), 2);
        assert!(journal.emitted.iter().all(|e| e.ts == EventTimestamp::At(ts)));
    }

    #[tokio::test]
    async fn source_mode_without_timestamp_fails_and_closes() {
        let connector = RecordingConnector::new();
        let rows = RowStore::new(vec![row("A")]);

        let err = run_worker(
            &connector,
            &rows,
            assignment(1, 3),
            SendPlan::new(0, TimestampMode::FromSource),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkerError::Failed { worker_id: 1, stage: WorkerStage::Send, .. }));
        assert!(connector.journal(1).unwrap().closed);
    }

    #[tokio::test]
    async fn send_failure_closes_connection_and_reports_stage() {
        let connector = RecordingConnector::new().failing_send(0, 2);
        let rows = RowStore::new(vec![row("A"), row("B")]);

        let err = run_worker(&connector, &rows, assignment(0, 10), no_delay())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Failed { worker_id: 0, stage: WorkerStage::Send, .. }));
        let journal = connector.journal(0).unwrap();
        assert_eq!(journal.emitted.len(), 2);
        assert_eq!(journal.flushes, 0);
        assert!(journal.closed);
    }

    #[tokio::test]
    async fn flush_failure_is_not_success() {
        let connector = RecordingConnector::new().failing_flush(4);
        let rows = RowStore::new(vec![row("A")]);

        let err = run_worker(&connector, &rows, assignment(4, 3), no_delay())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Failed { worker_id: 4, stage: WorkerStage::Flush, .. }));
        assert!(connector.journal(4).unwrap().closed);
    }

    #[tokio::test]
    async fn connect_failure_is_terminal() {
        let connector = RecordingConnector::new().failing_connect([7]);
        let rows = RowStore::new(vec![row("A")]);

        let err = run_worker(&connector, &rows, assignment(7, 3), no_delay())
            .await
            .unwrap_err();

        assert_eq!(err.worker_id(), 7);
        assert!(matches!(err, WorkerError::Failed { stage: WorkerStage::Connect, .. }));
        assert!(connector.journal(7).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_delay_follows_every_event() {
        let connector = RecordingConnector::new();
        let rows = RowStore::new(vec![row("A")]);
        let start = tokio::time::Instant::now();

        run_worker(
            &connector,
            &rows,
            assignment(0, 3),
            SendPlan::new(50, TimestampMode::SubmitTime),
        )
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn completion_line_names_worker_and_count() {
        let report = WorkerReport { id: 3, sent: 100 };
        assert_eq!(report.to_string(), "Sender 3 terminou de enviar 100 eventos");
    }

    #[test]
    fn non_positive_delay_disables_pacing() {
        assert_eq!(SendPlan::new(0, TimestampMode::SubmitTime).delay, None);
        assert_eq!(SendPlan::new(-5, TimestampMode::SubmitTime).delay, None);
        assert_eq!(
            SendPlan::new(50, TimestampMode::SubmitTime).delay,
            Some(Duration::from_millis(50))
        );
    }
}
