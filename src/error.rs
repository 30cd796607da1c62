//! Error types for taskforest.

use uuid::Uuid;

/// Top-level error type for the propagation engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Edit error: {0}")]
    Edit(#[from] EditError),
}

/// Storage-related errors.
///
/// All variants are treated as transient by the job runner: a failed
/// propagation job is redelivered and re-derives from whatever state is
/// currently stored.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Failed to create connection: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Work queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
}

/// Validation errors raised by coordinator edits before anything is
/// committed. These are caller mistakes, never retried.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("Task {domain}/{id} does not exist")]
    TaskNotFound { domain: String, id: Uuid },

    #[error("Parent task {domain}/{id} does not exist")]
    ParentNotFound { domain: String, id: Uuid },

    #[error("Task {id} has subtasks; only atomic tasks can be {action}")]
    NotAtomic { id: Uuid, action: &'static str },

    #[error("Task description must not be empty")]
    EmptyDescription,

    #[error("Moving task {id} under {new_parent} would create a cycle")]
    WouldCreateCycle { id: Uuid, new_parent: Uuid },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
