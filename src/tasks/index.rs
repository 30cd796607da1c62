//! Task index records.
//!
//! Every task has one index record, created lazily the first time a
//! propagation job touches the task. The index stores the ancestor path
//! (for subtree queries) and mirrors a few derived flags so list views can
//! filter without loading full nodes.

use serde::{Deserialize, Serialize};

use crate::tasks::model::{TaskId, TaskNode};

/// Index record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIndex {
    /// The task this index belongs to.
    pub task_id: TaskId,
    /// Domain of the task.
    pub domain: String,
    /// Ancestor ids from the root down to (excluding) this task. Empty for
    /// roots.
    pub path: Vec<TaskId>,
    /// Depth in the forest. Always equals `path.len()`.
    pub depth: u32,
    /// All users assigned somewhere in this task's subtree, sorted.
    pub assignees: Vec<String>,
    /// Mirror of `derived_completed`.
    pub completed: bool,
    /// Mirror of "is atomic" (derived_size == 1).
    pub atomic: bool,
    /// Mirror of `derived_has_open_work`.
    pub has_open_work: bool,
}

impl TaskIndex {
    /// Create an empty index for a task. Path and flags are filled by the
    /// locator and aggregator respectively.
    pub fn new(domain: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            task_id,
            domain: domain.into(),
            path: Vec::new(),
            depth: 0,
            assignees: Vec::new(),
            completed: false,
            atomic: true,
            has_open_work: false,
        }
    }

    /// Replace the ancestor path, keeping `depth` consistent.
    pub fn set_path(&mut self, path: Vec<TaskId>) {
        self.depth = path.len() as u32;
        self.path = path;
    }

    /// Copy the mirrored aggregate flags from a freshly aggregated node.
    pub fn mirror_aggregates(&mut self, task: &TaskNode) {
        self.assignees = task.derived_assignees.keys().cloned().collect();
        self.completed = task.derived_completed;
        self.atomic = task.is_atomic();
        self.has_open_work = task.derived_has_open_work;
    }
}
