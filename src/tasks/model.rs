//! Task data model: forest nodes, derived aggregates, and display helpers.
//!
//! Tasks form a rooted forest inside a domain. Atomic tasks (no subtasks)
//! carry the user-set `completed` flag and optional assignee; composite
//! tasks only carry derived state. All `derived_*` fields are owned by the
//! propagation engine and are never written by an edit directly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a task node.
pub type TaskId = Uuid;

/// Placeholder used when an assignee's display name cannot be resolved.
/// Name resolution is best-effort enrichment; a propagation job never fails
/// because of it.
pub const MISSING_DISPLAY_NAME: &str = "<Missing>";

/// Per-assignee progress over the atomic tasks of a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeProgress {
    /// Number of completed atomic tasks assigned to this user.
    pub completed: u64,
    /// Total number of atomic tasks assigned to this user.
    pub total: u64,
    /// Cached display name of the user.
    pub display_name: String,
}

/// Progress keyed by assignee identifier.
///
/// A `BTreeMap` keeps serialization order stable, so re-running the
/// aggregator on unchanged input produces byte-identical stored output.
pub type ProgressMap = BTreeMap<String, AssigneeProgress>;

/// A single task node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique ID.
    pub id: TaskId,
    /// The domain (consistency partition) this task lives in.
    pub domain: String,
    /// Parent task, or `None` for a root.
    pub parent_id: Option<TaskId>,
    /// Description; the first line is the title.
    pub description: String,
    /// Identifier of the user who created the task.
    pub creator: String,
    /// Assigned user, if any. Only meaningful for atomic tasks.
    pub assignee: Option<String>,
    /// User-set completion flag. Only meaningful for atomic tasks; the
    /// hierarchy-aware value is `derived_completed`.
    pub completed: bool,
    /// When the task was created.
    pub created_at: DateTime<Utc>,

    // Derived fields, recomputed by the aggregator and locator.
    /// Atomic: own `completed` flag. Composite: true iff every direct
    /// child is derived-completed.
    pub derived_completed: bool,
    /// Number of nodes in the subtree rooted here (atomic tasks count 1).
    pub derived_size: u64,
    /// Number of atomic tasks in the subtree rooted here.
    pub derived_atomic_count: u64,
    /// Whether the subtree contains at least one open task.
    pub derived_has_open_work: bool,
    /// Depth in the forest: 0 for roots, parent's depth + 1 otherwise.
    pub derived_depth: u32,
    /// Per-assignee progress over the subtree's atomic tasks.
    pub derived_assignees: ProgressMap,
}

/// Parameters for creating a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub creator: String,
    pub description: String,
    pub assignee: Option<String>,
    pub parent: Option<TaskId>,
}

impl NewTask {
    /// Create a new task spec with no assignee and no parent.
    pub fn new(creator: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            description: description.into(),
            assignee: None,
            parent: None,
        }
    }

    /// Builder: assign the task on creation.
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// Builder: create under a parent task.
    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl TaskNode {
    /// Create a new leaf node with derived fields initialized from its own
    /// state. The first aggregator run fills in the progress map.
    pub fn new(domain: impl Into<String>, spec: NewTask) -> Self {
        let open = spec.assignee.is_none();
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            parent_id: spec.parent,
            description: spec.description,
            creator: spec.creator,
            assignee: spec.assignee,
            completed: false,
            created_at: Utc::now(),
            derived_completed: false,
            derived_size: 1,
            derived_atomic_count: 1,
            derived_has_open_work: open,
            derived_depth: 0,
            derived_assignees: ProgressMap::new(),
        }
    }

    /// The title: the first line of the description, without a trailing dot.
    pub fn title(&self) -> &str {
        let title = self
            .description
            .split("\r\n")
            .next()
            .unwrap_or("")
            .split('\n')
            .next()
            .unwrap_or("");
        title.strip_suffix('.').unwrap_or(title)
    }

    /// True if this task has no subtasks.
    pub fn is_atomic(&self) -> bool {
        self.derived_size == 1
    }

    /// True if this task has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// True if this task is an open atomic task: not completed and
    /// unassigned.
    pub fn is_open(&self) -> bool {
        self.is_atomic() && !self.derived_completed && self.assignee.is_none()
    }

    /// Number of subtasks in the hierarchy below this task.
    pub fn subtask_count(&self) -> u64 {
        self.derived_size - 1
    }

    /// Short summary of the form "N tasks (M completed)", or the empty
    /// string for atomic tasks.
    pub fn summary(&self) -> String {
        if self.is_atomic() {
            return String::new();
        }
        let count = self.derived_atomic_count;
        let completed: u64 = self.derived_assignees.values().map(|p| p.completed).sum();
        let tasks = if count == 1 {
            "1 task".to_string()
        } else {
            format!("{count} tasks")
        };
        format!("{tasks} ({completed} completed)")
    }

    /// Number of atomic subtasks the given user still has to complete.
    pub fn remaining_for(&self, user_id: &str) -> u64 {
        if self.is_atomic() {
            return 0;
        }
        self.derived_assignees
            .get(user_id)
            .map(|p| p.total - p.completed)
            .unwrap_or(0)
    }

    /// True if the given user has uncompleted atomic tasks in this subtree.
    pub fn is_active_for(&self, user_id: &str) -> bool {
        if self.derived_completed {
            return false;
        }
        self.derived_assignees
            .get(user_id)
            .map(|p| p.total > p.completed)
            .unwrap_or(false)
    }

    /// Human-readable assignee list, busiest assignees first. More than
    /// three assignees are elided as "A, B and N others".
    pub fn assignee_summary(&self) -> String {
        let mut assignees: Vec<&AssigneeProgress> = self.derived_assignees.values().collect();
        assignees.sort_by_key(|p| std::cmp::Reverse(p.total));
        if assignees.len() > 3 {
            format!(
                "{}, {} and {} others",
                assignees[0].display_name,
                assignees[1].display_name,
                assignees.len() - 2
            )
        } else {
            assignees
                .iter()
                .map(|p| p.display_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}
