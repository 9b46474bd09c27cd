//! Work hand-off between the watch service and the recognition workers.
//!
//! Delivery is at-least-once: a dequeued item that is never acknowledged
//! becomes visible again after the visibility timeout. Workers therefore
//! tolerate seeing the same item twice (outputs are overwritten atomically).

mod memory;
mod spool;

pub use memory::MemoryQueue;
pub use spool::SpoolQueue;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::WorkItem;

/// Errors from queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode work item: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Queue is closed")]
    Closed,
}

impl QueueError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A dequeued item, to be passed back to [`WorkQueue::ack`] when done.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub item: WorkItem,
    /// Claim file for spool deliveries.
    claim: Option<PathBuf>,
}

impl Delivery {
    pub(crate) fn new(item: WorkItem, claim: Option<PathBuf>) -> Self {
        Self { item, claim }
    }

    pub(crate) fn claim(&self) -> Option<&PathBuf> {
        self.claim.as_ref()
    }
}

/// Shared work queue.
///
/// Producers call `enqueue`; consumers `dequeue`, process, then `ack`,
/// whatever the outcome of processing was.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next item.
    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Number of items waiting to be dequeued.
    fn pending(&self) -> Result<usize, QueueError>;
}
