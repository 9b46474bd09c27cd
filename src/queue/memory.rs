//! In-process queue for single-process deployments and tests.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::{Delivery, QueueError, WorkQueue};
use crate::types::WorkItem;

/// Unbounded channel-backed queue. Acknowledgement is a no-op; nothing is
/// redelivered.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&self) -> Vec<WorkItem> {
        self.receiver.try_iter().collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue for MemoryQueue {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        self.sender
            .send(item.clone())
            .map_err(|_| QueueError::Closed)
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        match self.receiver.recv_timeout(wait) {
            Ok(item) => Ok(Some(Delivery::new(item, None))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    fn pending(&self) -> Result<usize, QueueError> {
        Ok(self.receiver.len())
    }
}
