/*!
 * Worker pool
 *
 * A fixed number of tasks on the engine runtime, each looping on
 * [`JobQueue::pop`]. Every job popped reports exactly one outcome to the
 * batch controller, even if the transfer routine panics.
 */

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::batch::BatchController;
use super::job::{JobOutcome, OutcomeStatus};
use super::queue::JobQueue;
use super::transfer::{run_job, TransferContext};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `count` workers on `runtime`
    pub fn spawn(
        runtime: &Handle,
        count: usize,
        queue: Arc<JobQueue>,
        controller: Arc<BatchController>,
        context: Arc<TransferContext>,
    ) -> Self {
        let handles = (0..count)
            .map(|worker| {
                let queue = queue.clone();
                let controller = controller.clone();
                let context = context.clone();
                runtime.spawn(
                    work_loop(queue, controller, context)
                        .instrument(tracing::debug_span!("worker", worker)),
                )
            })
            .collect();

        tracing::debug!("started {} workers", count);
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Cancel every worker at its next suspension point
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn work_loop(queue: Arc<JobQueue>, controller: Arc<BatchController>, context: Arc<TransferContext>) {
    while let Some(job) = queue.pop().await {
        let batch = job.batch;
        let (id, name, direction) = (job.id, job.name.clone(), job.direction);
        let expected = job.expected_bytes.unwrap_or(0);
        let span = tracing::info_span!("job", job = id, object = %name, direction = %direction);

        let outcome = match AssertUnwindSafe(run_job(&context, job).instrument(span))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!("transfer of {} panicked", name);
                JobOutcome {
                    job: id,
                    name,
                    direction,
                    status: OutcomeStatus::Failed,
                    attempts: 0,
                    bytes: expected,
                    error: Some("transfer task panicked".to_string()),
                }
            }
        };

        context.counters.record(&outcome);
        controller.complete(batch, outcome);
    }
    tracing::trace!("worker exiting");
}
