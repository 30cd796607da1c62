//! Propagation job types.
//!
//! A tree edit never walks the tree itself. It enqueues jobs, and each job
//! recomputes exactly one node from its neighbors, then enqueues the next
//! hop. Two kinds exist: bottom-up aggregation toward the root, and
//! top-down location toward the leaves.

use serde::{Deserialize, Serialize};

use crate::tasks::TaskId;

/// The two directions of propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Recompute a node's aggregates from its children, then enqueue the
    /// parent.
    AggregateUp,
    /// Recompute a node's ancestor path and depth from its parent, then
    /// enqueue all children.
    LocateDown,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AggregateUp => "aggregate-up",
            Self::LocateDown => "locate-down",
        };
        write!(f, "{s}")
    }
}

/// One unit of propagation work, identified by (kind, domain, task).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropagationJob {
    pub kind: JobKind,
    pub domain: String,
    pub task_id: TaskId,
}

impl PropagationJob {
    /// Bottom-up aggregation job for a task.
    pub fn aggregate_up(domain: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            kind: JobKind::AggregateUp,
            domain: domain.into(),
            task_id,
        }
    }

    /// Top-down location job for a task.
    pub fn locate_down(domain: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            kind: JobKind::LocateDown,
            domain: domain.into(),
            task_id,
        }
    }
}

impl std::fmt::Display for PropagationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.domain, self.task_id)
    }
}

/// What a job handler reports back to the queue runner.
///
/// There is deliberately no "permanent failure" variant: any error the
/// handler cannot classify is transient by policy and gets redelivered,
/// because handlers re-derive from currently stored state and are safe to
/// repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The node was recomputed (or was already correct).
    Completed,
    /// A dependency is not ready yet; redeliver after backoff.
    RetryLater,
    /// The job references state that no longer exists; log and drop.
    PermanentSkip,
}
