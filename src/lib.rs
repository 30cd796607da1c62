//! taskforest: propagation engine for a hierarchical task tracker.
//!
//! Tasks form a rooted forest, partitioned into domains. Composite tasks
//! carry derived aggregates (completion, size, per-assignee progress) and
//! a location index (ancestor path, depth), both kept consistent by
//! asynchronous, idempotent propagation jobs rather than recursive
//! updates in the edit path.

pub mod config;
pub mod error;
pub mod propagation;
pub mod queue;
pub mod store;
pub mod tasks;
