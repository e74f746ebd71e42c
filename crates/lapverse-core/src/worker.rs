use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::queue::{JobFailure, Queue};
use crate::runtime::Runtime;

/// Worker group handle for one queue.
/// - `request_shutdown` stops new leases; in-flight handlers run to completion
/// - `shutdown_and_join` waits for every worker to exit
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers leasing from `queue`.
    pub fn spawn(n: usize, queue: Arc<dyn Queue>, runtime: Arc<Runtime>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let rt = Arc::clone(&runtime);
            let rx = shutdown_rx.clone();
            let span = info_span!("worker", queue = %q.name(), worker = worker_id);

            joins.push(tokio::spawn(worker_loop(q, rt, rx).instrument(span)));
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(queue: Arc<dyn Queue>, runtime: Arc<Runtime>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease() may wait, so race it against shutdown
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = queue.lease() => lease,
        };

        // None: the queue was closed
        let Some(lease) = lease else {
            break;
        };

        let job = lease.job().clone();
        debug!(job_id = %job.job_id, kind = %job.kind, attempt = job.attempt, "job leased");

        match runtime.execute(&job).await {
            Ok(()) => {
                if let Err(e) = lease.ack().await {
                    warn!(job_id = %job.job_id, error = %e, "ack failed");
                }
            }
            Err(err) => {
                warn!(
                    job_id = %job.job_id,
                    kind = %job.kind,
                    attempt = job.attempt,
                    error_kind = err.kind().as_str(),
                    error = %err,
                    "job attempt failed"
                );
                if let Err(e) = lease.fail(JobFailure::from_error(&err)).await {
                    warn!(job_id = %job.job_id, error = %e, "fail report failed");
                }
            }
        }
    }
    debug!("worker stopped");
}
