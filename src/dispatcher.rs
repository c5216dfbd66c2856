//! Distribuição da cota total entre os workers
//!
//! Um worker por sender, todos concorrentes (uma task tokio cada). O
//! dispatcher espera todos terminarem, mesmo quando algum falha: não há
//! cancelamento dos irmãos.

use crate::error::{DispatchError, WorkerError};
use crate::sender::Connector;
use crate::types::{RowStore, WorkerAssignment};
use crate::worker::{run_worker, SendPlan, WorkerReport};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::{self, JoinSet};
use tracing::{error, info};

/// Divide `total_events` entre `workers`.
///
/// Cada worker recebe `total / workers`; os primeiros `total % workers`
/// recebem um evento a mais. A soma é sempre exatamente `total_events`.
pub fn compute_assignments(total_events: u64, workers: usize) -> Vec<WorkerAssignment> {
    if workers == 0 {
        return Vec::new();
    }
    let n = workers as u64;
    let base = total_events / n;
    let rem = total_events % n;

    (0..workers)
        .map(|id| WorkerAssignment {
            id,
            events_to_send: base + u64::from((id as u64) < rem),
        })
        .collect()
}

/// Resultado de uma execução sem falhas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Ordenado por id do worker.
    pub reports: Vec<WorkerReport>,
}

impl DispatchSummary {
    pub fn total_sent(&self) -> u64 {
        self.reports.iter().map(|r| r.sent).sum()
    }
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Todos os workers concluídos: {} eventos em {} senders",
            self.total_sent(),
            self.reports.len()
        )
    }
}

/// Lança um worker por cota e espera todos chegarem a um estado final.
///
/// Em caso de falha, retorna o primeiro erro observado (ordem de término)
/// junto com a contagem de falhas.
pub async fn dispatch<C>(
    connector: Arc<C>,
    rows: Arc<RowStore>,
    assignments: Vec<WorkerAssignment>,
    plan: SendPlan,
) -> Result<DispatchSummary, DispatchError>
where
    C: Connector + 'static,
{
    if rows.is_empty() {
        return Err(DispatchError::EmptyRowStore);
    }

    let total = assignments.len();
    // Id da task tokio → id do worker, para identificar tasks perdidas
    let mut task_ids: HashMap<task::Id, usize> = HashMap::with_capacity(total);
    let mut workers = JoinSet::new();

    for assignment in assignments {
        let connector = Arc::clone(&connector);
        let rows = Arc::clone(&rows);
        let handle = workers.spawn(async move {
            run_worker(connector.as_ref(), &rows, assignment, plan).await
        });
        task_ids.insert(handle.id(), assignment.id);
    }

    let mut reports = Vec::with_capacity(total);
    let mut first: Option<WorkerError> = None;
    let mut failed = 0usize;

    while let Some(joined) = workers.join_next().await {
        let err = match joined {
            Ok(Ok(report)) => {
                reports.push(report);
                continue;
            }
            Ok(Err(err)) => err,
            // Panic ou cancelamento: a task não devolveu resultado
            Err(join_err) => {
                let err = WorkerError::Interrupted {
                    worker_id: task_ids[&join_err.id()],
                    reason: join_err.to_string(),
                };
                error!(worker = err.worker_id(), error = %err, "Sender interrompido");
                err
            }
        };
        failed += 1;
        first.get_or_insert(err);
    }

    if let Some(first) = first {
        return Err(DispatchError::WorkersFailed {
            failed,
            total,
            first,
        });
    }

    reports.sort_by_key(|r| r.id);
    let summary = DispatchSummary { reports };
    info!(workers = total, sent = summary.total_sent(), "Todos os senders concluídos");
    Ok(summary)
}
