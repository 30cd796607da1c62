//! Work queue: at-least-once delivery of propagation jobs.

pub mod in_process;
pub mod job;
pub mod runner;

pub use in_process::{Delivery, InProcessQueue, WorkQueue};
pub use job::{JobKind, JobOutcome, PropagationJob};
pub use runner::JobRunner;
