//! Top-down location.
//!
//! One job recomputes one node's ancestor path and depth from its parent's
//! stored index, then enqueues a job for every direct child. A locator
//! chain started at a moved node therefore rewrites its entire subtree,
//! one node per job.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::queue::{JobOutcome, PropagationJob};
use crate::tasks::{TaskId, TaskIndex};

use super::Propagator;

impl Propagator {
    /// Recompute one node's path/depth, then fan out to its children.
    pub(crate) async fn locate_down(&self, domain: &str, task_id: TaskId) -> Result<JobOutcome> {
        let mut txn = self.store().begin(domain).await?;

        let Some(mut task) = txn.get_task(task_id).await? else {
            warn!(domain, task = %task_id, "Task does not exist; dropping locator job");
            return Ok(JobOutcome::PermanentSkip);
        };

        let path = match task.parent_id {
            None => Vec::new(),
            Some(parent_id) => {
                let Some(parent_index) = txn.get_index(parent_id).await? else {
                    // The parent's own path has not been computed yet. Not
                    // an error: redeliver once the upstream hop has run.
                    debug!(
                        domain,
                        task = %task_id,
                        parent = %parent_id,
                        "Missing index for parent task; retrying later"
                    );
                    return Ok(JobOutcome::RetryLater);
                };
                let mut path = parent_index.path;
                path.push(parent_id);
                path
            }
        };

        let mut index = match txn.get_index(task_id).await? {
            Some(index) => index,
            None => TaskIndex::new(domain, task_id),
        };
        index.set_path(path);
        task.derived_depth = index.depth;

        txn.put_task(&task).await?;
        txn.put_index(&index).await?;
        txn.commit().await?;

        debug!(domain, task = %task_id, depth = index.depth, "Path recomputed");

        // Fan out to children outside the transaction: a transactional
        // queue caps how many jobs one commit may carry, and a subtree's
        // branching factor is unbounded. If an enqueue fails after the
        // commit, redelivering this job repairs the gap.
        let children = self.store().direct_children(domain, task_id).await?;
        let enqueues = children
            .iter()
            .map(|child| self.queue().enqueue(PropagationJob::locate_down(domain, child.id)));
        for result in join_all(enqueues).await {
            result.map_err(Error::Queue)?;
        }
        Ok(JobOutcome::Completed)
    }
}
