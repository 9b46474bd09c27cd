//! Per-item processing time limit.
//!
//! Recognition calls are never interrupted. The limit is checked at page
//! boundaries, so an overrun is noticed before the next page starts.

use std::time::{Duration, Instant};

use thiserror::Error;

/// The limit was exceeded before `page` started.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("time limit exceeded before page {page}")]
pub struct DeadlineExceeded {
    pub page: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// Starts counting now.
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Checkpoint before starting `page`.
    pub fn check(&self, page: usize) -> Result<(), DeadlineExceeded> {
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => Err(DeadlineExceeded { page }),
            _ => Ok(()),
        }
    }
}
