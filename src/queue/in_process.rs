//! In-process work queue.
//!
//! At-least-once delivery inside one process: a `VecDeque` of deliveries
//! behind a tokio mutex, with a `Notify` to wake waiting workers. Duplicate
//! deliveries are legal; the propagation handlers are idempotent, so a
//! redelivered job just recomputes the same stored state.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::QueueError;
use crate::queue::job::PropagationJob;

/// Submission side of the work queue.
///
/// This is the non-transactional path. Jobs that must only become visible
/// once a partition transaction commits are buffered on the open
/// [`PartitionTxn`](crate::store::PartitionTxn) instead and flushed here on
/// commit.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a job for delivery.
    async fn enqueue(&self, job: PropagationJob) -> Result<(), QueueError>;
}

/// One delivery of a job, with its redelivery count.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: PropagationJob,
    /// 0 on first delivery, incremented on every requeue.
    pub attempt: u32,
}

/// In-process FIFO queue with redelivery support.
pub struct InProcessQueue {
    pending: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Wait for the next delivery.
    pub async fn recv(&self) -> Delivery {
        loop {
            if let Some(delivery) = self.try_recv().await {
                return delivery;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next delivery if one is pending.
    pub async fn try_recv(&self) -> Option<Delivery> {
        self.pending.lock().await.pop_front()
    }

    /// Put a delivery back for another attempt.
    pub async fn requeue(&self, delivery: Delivery) {
        let mut pending = self.pending.lock().await;
        pending.push_back(Delivery {
            job: delivery.job,
            attempt: delivery.attempt + 1,
        });
        drop(pending);
        self.notify.notify_one();
    }

    /// Number of pending deliveries.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// True if nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InProcessQueue {
    async fn enqueue(&self, job: PropagationJob) -> Result<(), QueueError> {
        let mut pending = self.pending.lock().await;
        pending.push_back(Delivery { job, attempt: 0 });
        drop(pending);
        self.notify.notify_one();
        Ok(())
    }
}
