//! Bottom-up aggregation.
//!
//! One job recomputes one node's aggregate fields from its direct
//! children's currently stored aggregates, then enqueues the parent. A
//! chain started at any node therefore reaches the root in depth + 1 hops
//! and stops. Rerunning any hop with unchanged children writes identical
//! bytes, which is what makes at-least-once delivery safe.

use tracing::{debug, warn};

use crate::error::Result;
use crate::queue::{JobOutcome, PropagationJob};
use crate::tasks::{AssigneeProgress, ProgressMap, TaskId, TaskIndex, MISSING_DISPLAY_NAME};

use super::Propagator;

impl Propagator {
    /// Recompute one node's aggregates inside its partition transaction.
    pub(crate) async fn aggregate_up(&self, domain: &str, task_id: TaskId) -> Result<JobOutcome> {
        let mut txn = self.store().begin(domain).await?;

        let Some(mut task) = txn.get_task(task_id).await? else {
            warn!(domain, task = %task_id, "Task does not exist; dropping aggregation job");
            return Ok(JobOutcome::PermanentSkip);
        };

        let children = txn.direct_children(task_id).await?;
        let mut index = match txn.get_index(task_id).await? {
            Some(index) => index,
            None => TaskIndex::new(domain, task_id),
        };

        if children.is_empty() {
            // Atomic task. A composite that lost its last child lands here
            // too: it degenerates back to a leaf and its own user-set
            // completion flag becomes authoritative again.
            task.derived_completed = task.completed;
            task.derived_size = 1;
            task.derived_atomic_count = 1;
            task.derived_has_open_work = !task.completed && task.assignee.is_none();

            let mut progress = ProgressMap::new();
            if let Some(assignee) = task.assignee.clone() {
                let display_name = self.display_name(&assignee).await;
                progress.insert(
                    assignee,
                    AssigneeProgress {
                        completed: task.completed as u64,
                        total: 1,
                        display_name,
                    },
                );
            }
            task.derived_assignees = progress;
        } else {
            task.derived_completed = children.iter().all(|c| c.derived_completed);
            task.derived_size = 1 + children.iter().map(|c| c.derived_size).sum::<u64>();
            task.derived_atomic_count = children.iter().map(|c| c.derived_atomic_count).sum();
            task.derived_has_open_work = children.iter().any(|c| c.derived_has_open_work);

            // Per-assignee sums over all children. The cached display name
            // rides along from whichever child record is seen first.
            let mut progress = ProgressMap::new();
            for child in &children {
                for (assignee, record) in &child.derived_assignees {
                    let entry =
                        progress
                            .entry(assignee.clone())
                            .or_insert_with(|| AssigneeProgress {
                                completed: 0,
                                total: 0,
                                display_name: record.display_name.clone(),
                            });
                    entry.completed += record.completed;
                    entry.total += record.total;
                }
            }
            task.derived_assignees = progress;
        }

        index.mirror_aggregates(&task);
        txn.put_task(&task).await?;
        txn.put_index(&index).await?;

        // The next hop rides the same transaction: the parent's job exists
        // if and only if this node's new aggregates are committed.
        if let Some(parent_id) = task.parent_id {
            txn.enqueue(PropagationJob::aggregate_up(domain, parent_id));
        }
        txn.commit().await?;

        debug!(
            domain,
            task = %task_id,
            size = task.derived_size,
            completed = task.derived_completed,
            "Aggregates recomputed"
        );
        Ok(JobOutcome::Completed)
    }

    /// Resolve an assignee's display name, falling back to a sentinel.
    ///
    /// The lookup may leave the partition, so it is allowed to fail
    /// without failing the job.
    async fn display_name(&self, user_id: &str) -> String {
        match self.store().resolve_display_name(user_id).await {
            Ok(Some(name)) => name,
            Ok(None) => MISSING_DISPLAY_NAME.to_string(),
            Err(e) => {
                warn!(user = user_id, error = %e, "Display name lookup failed; using placeholder");
                MISSING_DISPLAY_NAME.to_string()
            }
        }
    }
}
