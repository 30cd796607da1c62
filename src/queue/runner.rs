//! Queue runner: delivers propagation jobs to the engine.
//!
//! Workers pull deliveries off the in-process queue and hand them to the
//! `Propagator`. Retryable outcomes (dependency not ready, transient store
//! failure) are redelivered after a jittered exponential backoff; there is
//! no retry cap, because handlers re-derive from stored state and the only
//! unrecoverable case (the node is gone) is a permanent skip, not an error.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::propagation::Propagator;
use crate::queue::in_process::{Delivery, InProcessQueue};
use crate::queue::job::JobOutcome;

/// Worker pool driving the propagation engine from the queue.
pub struct JobRunner {
    queue: Arc<InProcessQueue>,
    propagator: Arc<Propagator>,
    config: EngineConfig,
}

impl JobRunner {
    pub fn new(
        queue: Arc<InProcessQueue>,
        propagator: Arc<Propagator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            queue,
            propagator,
            config,
        }
    }

    /// Spawn the configured number of workers.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker| {
                let runner = Arc::clone(self);
                tokio::spawn(async move {
                    info!(worker, "Propagation worker started");
                    loop {
                        let delivery = runner.queue.recv().await;
                        runner.deliver(delivery).await;
                    }
                })
            })
            .collect()
    }

    /// Process one delivery, redelivering it if the outcome asks for it.
    pub async fn deliver(&self, delivery: Delivery) {
        let job = delivery.job.clone();
        match self.propagator.handle(&job).await {
            Ok(JobOutcome::Completed) => {
                debug!(%job, "Job completed");
            }
            Ok(JobOutcome::PermanentSkip) => {
                warn!(%job, "Job skipped permanently");
            }
            Ok(JobOutcome::RetryLater) => {
                let delay = self.config.backoff_delay(delivery.attempt);
                debug!(%job, attempt = delivery.attempt, ?delay, "Dependency not ready; redelivering");
                tokio::time::sleep(delay).await;
                self.queue.requeue(delivery).await;
            }
            Err(e) => {
                let delay = self.config.backoff_delay(delivery.attempt);
                warn!(%job, attempt = delivery.attempt, error = %e, "Job failed; redelivering");
                tokio::time::sleep(delay).await;
                self.queue.requeue(delivery).await;
            }
        }
    }

    /// Deliver sequentially until the queue is empty.
    ///
    /// Used by tests and the rebuild tool, where "no job pending" is the
    /// convergence signal. Returns the number of deliveries processed,
    /// counting redeliveries.
    pub async fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        while let Some(delivery) = self.queue.try_recv().await {
            self.deliver(delivery).await;
            delivered += 1;
        }
        delivered
    }
}
