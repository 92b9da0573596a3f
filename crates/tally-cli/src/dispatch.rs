//! Bounded-concurrency fan-out over the counter driver.
//!
//! At most `concurrency` counter subprocesses are alive at any instant.
//! Each worker owns its subprocess, appends its own row on completion, and
//! reports an outcome; the ledger therefore sees completion order, not
//! submission order.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tally_core::{AuditJob, CountStatus};
use tally_counter::CounterDriver;
use tally_ledger::{AuditRow, Ledger};

/// What happened to one job: how the count ended and whether its row made
/// it into the ledger.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: AuditJob,
    pub status: CountStatus,
    pub sink_error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == CountStatus::Success && self.sink_error.is_none()
    }
}

/// Run every job under the concurrency cap, appending each result as it
/// arrives. On cancellation, jobs not yet dispatched are dropped and
/// in-flight counts are killed; completions already observed are still
/// written and returned.
pub async fn execute_jobs(
    jobs: Vec<AuditJob>,
    driver: Arc<CounterDriver>,
    ledger: Arc<Ledger>,
    concurrency: u32,
    cancel: CancellationToken,
) -> Vec<JobOutcome> {
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1) as usize));
    let mut workers: JoinSet<JobOutcome> = JoinSet::new();
    let mut dispatched = 0usize;

    for job in jobs {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                // The semaphore is never closed; treat it like cancellation.
                Err(_) => break,
            },
            _ = cancel.cancelled() => {
                warn!(
                    "Cancelled with {} of {} job(s) dispatched; dropping the rest",
                    dispatched, total
                );
                break;
            }
        };

        dispatched += 1;
        let driver = driver.clone();
        let ledger = ledger.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            let _permit = permit;
            let report = driver.count(&job, &cancel).await;
            let row = AuditRow::from_outcome(&job, &report);
            let sink_error = match ledger.append(&row).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Ledger write failed for {}: {}", job.hdfs_path, e);
                    Some(e.to_string())
                }
            };
            info!(
                "[{}] {} -> {} ({} rows)",
                job.task_name,
                job.hdfs_path,
                report.status.as_str(),
                report.row_count
            );
            JobOutcome {
                job,
                status: report.status,
                sink_error,
            }
        });
    }

    let mut outcomes = Vec::with_capacity(dispatched);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("Audit worker panicked: {}", e),
        }
    }
    outcomes
}
