//! Propagation engine.
//!
//! Derived task state is never recomputed in the edit path. Edits enqueue
//! jobs (via the [`Coordinator`]); the [`Propagator`] consumes them, one
//! node per job, and enqueues the next hop. Handlers are pure functions of
//! currently stored state, so at-least-once delivery, duplicates, and
//! reordering all converge to the same fixed point.

pub mod aggregate;
pub mod coordinator;
pub mod locate;

use std::sync::Arc;

use crate::error::Result;
use crate::queue::{JobKind, JobOutcome, PropagationJob, WorkQueue};
use crate::store::TreeStore;

pub use coordinator::Coordinator;

/// Executes propagation jobs against the tree store.
pub struct Propagator {
    store: Arc<dyn TreeStore>,
    queue: Arc<dyn WorkQueue>,
}

impl Propagator {
    pub fn new(store: Arc<dyn TreeStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Run one job to completion and report its outcome.
    ///
    /// `Err` means a transient store failure; the caller is expected to
    /// redeliver. No outcome or error ever requires discarding committed
    /// state: a rerun re-derives from whatever is stored.
    pub async fn handle(&self, job: &PropagationJob) -> Result<JobOutcome> {
        match job.kind {
            JobKind::AggregateUp => self.aggregate_up(&job.domain, job.task_id).await,
            JobKind::LocateDown => self.locate_down(&job.domain, job.task_id).await,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    pub(crate) fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }
}
