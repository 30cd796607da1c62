//! Task forest data model.

pub mod index;
pub mod model;

pub use index::TaskIndex;
pub use model::{AssigneeProgress, NewTask, ProgressMap, TaskId, TaskNode, MISSING_DISPLAY_NAME};
