//! Persistence layer: libSQL-backed storage for task nodes and indexes.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{PartitionTxn, TreeStore};
