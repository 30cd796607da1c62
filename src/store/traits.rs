//! Tree store contract: the read/write surface the propagation engine
//! consumes, kept backend-agnostic behind async traits.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::queue::PropagationJob;
use crate::tasks::{TaskId, TaskIndex, TaskNode};

/// Backend-agnostic access to task nodes and their index records.
///
/// Reads outside a transaction see the latest committed state. All writes
/// go through a [`PartitionTxn`], which is scoped to one domain: the domain
/// is the consistency partition, and serializing its writers is the only
/// mutual-exclusion mechanism in the engine.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Open a transaction on one domain.
    ///
    /// Acquires the domain's write lock; concurrent transactions on the
    /// same domain serialize here. Dropping the transaction without
    /// committing rolls it back.
    async fn begin(&self, domain: &str) -> Result<Box<dyn PartitionTxn>, StoreError>;

    /// Fetch a task by id.
    async fn get_task(&self, domain: &str, id: TaskId) -> Result<Option<TaskNode>, StoreError>;

    /// Fetch the direct children of a task. Order is not significant.
    async fn direct_children(
        &self,
        domain: &str,
        id: TaskId,
    ) -> Result<Vec<TaskNode>, StoreError>;

    /// Fetch a task's index record, if it has been created yet.
    async fn get_index(&self, domain: &str, id: TaskId) -> Result<Option<TaskIndex>, StoreError>;

    /// Resolve a user's display name.
    ///
    /// Best-effort enrichment: this may cross partition boundaries, so
    /// callers must tolerate `None` or an error and substitute
    /// [`MISSING_DISPLAY_NAME`](crate::tasks::MISSING_DISPLAY_NAME) rather
    /// than fail a propagation job.
    async fn resolve_display_name(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

/// An open transaction on one domain.
///
/// Reads observe earlier writes in the same transaction. Jobs passed to
/// [`enqueue`](Self::enqueue) are buffered and handed to the work queue
/// only after [`commit`](Self::commit) succeeds, so a propagation hop
/// becomes visible if and only if the state it derives from is committed.
/// There is no way to enqueue transactionally without holding an open
/// transaction.
#[async_trait]
pub trait PartitionTxn: Send {
    /// The domain this transaction is scoped to.
    fn domain(&self) -> &str;

    /// Fetch a task by id.
    async fn get_task(&mut self, id: TaskId) -> Result<Option<TaskNode>, StoreError>;

    /// Fetch the direct children of a task.
    async fn direct_children(&mut self, id: TaskId) -> Result<Vec<TaskNode>, StoreError>;

    /// Fetch a task's index record.
    async fn get_index(&mut self, id: TaskId) -> Result<Option<TaskIndex>, StoreError>;

    /// Insert or replace a task node.
    async fn put_task(&mut self, task: &TaskNode) -> Result<(), StoreError>;

    /// Insert or replace an index record.
    async fn put_index(&mut self, index: &TaskIndex) -> Result<(), StoreError>;

    /// Buffer a job to be enqueued when this transaction commits. If the
    /// transaction rolls back, the job is discarded with it.
    fn enqueue(&mut self, job: PropagationJob);

    /// Commit the transaction, then flush buffered jobs to the queue.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
