//! Propagation coordinator.
//!
//! Maps user-visible tree edits to their initial propagation jobs. Every
//! edit commits its state change and its triggering jobs in one partition
//! transaction: a committed edit always has its jobs enqueued, and a
//! rolled-back edit enqueues nothing.

use std::sync::Arc;

use tracing::info;

use crate::error::{EditError, Result};
use crate::queue::PropagationJob;
use crate::store::TreeStore;
use crate::tasks::{NewTask, TaskId, TaskNode};

/// Turns tree edits into committed state plus initial propagation jobs.
pub struct Coordinator {
    store: Arc<dyn TreeStore>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Create a new task, optionally under a parent.
    ///
    /// The new node starts as a leaf with derived fields seeded from its
    /// own state; the aggregation chain refines it and every ancestor.
    pub async fn create_task(&self, domain: &str, spec: NewTask) -> Result<TaskNode> {
        if spec.description.trim().is_empty() {
            return Err(EditError::EmptyDescription.into());
        }

        let mut txn = self.store.begin(domain).await?;
        if let Some(parent_id) = spec.parent {
            if txn.get_task(parent_id).await?.is_none() {
                return Err(EditError::ParentNotFound {
                    domain: domain.to_string(),
                    id: parent_id,
                }
                .into());
            }
        }

        let task = TaskNode::new(domain, spec);
        txn.put_task(&task).await?;
        txn.enqueue(PropagationJob::aggregate_up(domain, task.id));
        if task.parent_id.is_some() {
            txn.enqueue(PropagationJob::locate_down(domain, task.id));
        }
        txn.commit().await?;

        info!(domain, task = %task.id, title = task.title(), "Task created");
        Ok(task)
    }

    /// Set or clear the completion flag of an atomic task.
    pub async fn set_completed(&self, domain: &str, id: TaskId, completed: bool) -> Result<()> {
        self.edit_atomic(domain, id, "completed", |task| task.completed = completed)
            .await?;
        info!(domain, task = %id, completed, "Task completion changed");
        Ok(())
    }

    /// Set or clear the assignee of an atomic task.
    pub async fn set_assignee(
        &self,
        domain: &str,
        id: TaskId,
        assignee: Option<String>,
    ) -> Result<()> {
        self.edit_atomic(domain, id, "assigned", |task| task.assignee = assignee)
            .await?;
        info!(domain, task = %id, "Task assignee changed");
        Ok(())
    }

    /// Edit a task's description. Titles are not derived state, so no
    /// propagation is triggered.
    pub async fn change_description(
        &self,
        domain: &str,
        id: TaskId,
        description: impl Into<String>,
    ) -> Result<()> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(EditError::EmptyDescription.into());
        }

        let mut txn = self.store.begin(domain).await?;
        let Some(mut task) = txn.get_task(id).await? else {
            return Err(EditError::TaskNotFound {
                domain: domain.to_string(),
                id,
            }
            .into());
        };
        task.description = description;
        txn.put_task(&task).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Move a task (and implicitly its whole subtree) under a new parent,
    /// or to the root when `new_parent` is `None`.
    pub async fn move_task(
        &self,
        domain: &str,
        id: TaskId,
        new_parent: Option<TaskId>,
    ) -> Result<()> {
        let mut txn = self.store.begin(domain).await?;
        let Some(mut task) = txn.get_task(id).await? else {
            return Err(EditError::TaskNotFound {
                domain: domain.to_string(),
                id,
            }
            .into());
        };

        if task.parent_id == new_parent {
            return Ok(());
        }

        if let Some(parent_id) = new_parent {
            if parent_id == id {
                return Err(EditError::WouldCreateCycle {
                    id,
                    new_parent: parent_id,
                }
                .into());
            }
            let Some(parent) = txn.get_task(parent_id).await? else {
                return Err(EditError::ParentNotFound {
                    domain: domain.to_string(),
                    id: parent_id,
                }
                .into());
            };

            // Walk the prospective parent's ancestor chain. Parent
            // references are the source of truth here; the index path may
            // lag behind a concurrent move.
            let mut cursor = parent.parent_id;
            while let Some(ancestor_id) = cursor {
                if ancestor_id == id {
                    return Err(EditError::WouldCreateCycle {
                        id,
                        new_parent: parent_id,
                    }
                    .into());
                }
                cursor = txn
                    .get_task(ancestor_id)
                    .await?
                    .and_then(|ancestor| ancestor.parent_id);
            }
        }

        let old_parent = task.parent_id;
        task.parent_id = new_parent;
        txn.put_task(&task).await?;

        // The subtree learns its new location top-down; both the old and
        // the new parent re-aggregate the departure/arrival bottom-up.
        txn.enqueue(PropagationJob::locate_down(domain, id));
        if let Some(parent_id) = old_parent {
            txn.enqueue(PropagationJob::aggregate_up(domain, parent_id));
        }
        if let Some(parent_id) = new_parent {
            txn.enqueue(PropagationJob::aggregate_up(domain, parent_id));
        }
        txn.commit().await?;

        info!(
            domain,
            task = %id,
            old_parent = ?old_parent,
            new_parent = ?new_parent,
            "Task moved"
        );
        Ok(())
    }

    /// Shared shape of completion/assignee edits: atomic tasks only, one
    /// field update, one aggregation chain.
    async fn edit_atomic(
        &self,
        domain: &str,
        id: TaskId,
        action: &'static str,
        apply: impl FnOnce(&mut TaskNode) + Send,
    ) -> Result<()> {
        let mut txn = self.store.begin(domain).await?;
        let Some(mut task) = txn.get_task(id).await? else {
            return Err(EditError::TaskNotFound {
                domain: domain.to_string(),
                id,
            }
            .into());
        };
        if !txn.direct_children(id).await?.is_empty() {
            return Err(EditError::NotAtomic { id, action }.into());
        }

        apply(&mut task);
        txn.put_task(&task).await?;
        txn.enqueue(PropagationJob::aggregate_up(domain, id));
        txn.commit().await?;
        Ok(())
    }
}
