//! Recursive watch-and-enqueue service.
//!
//! Detects new and modified documents under the watch root, waits until they
//! are fully written, and submits each stable file state to the work queue
//! exactly once.
//!
//! # Architecture
//!
//! ```text
//! notify events ──> Debouncer ──┐
//!                               ├──> PathStabilityTracker ──> DispatchDeduplicator ──> WorkQueue
//! periodic TreeWalker pass ─────┘
//! ```

mod debouncer;
mod dedup;
mod error;
mod service;
mod stability;
mod walker;

pub use debouncer::Debouncer;
pub use dedup::DispatchDeduplicator;
pub use error::WatchError;
pub use service::{WatchService, WatchServiceBuilder, WatchStatsSnapshot};
pub use stability::{PathStabilityTracker, Stability};
pub use walker::TreeWalker;
