//! Watch-folder document recognition.
//!
//! A [`watcher::WatchService`] walks and watches an input tree, waits for
//! each document to finish being written and enqueues it exactly once per
//! distinct (path, size, modified) state. [`worker::RecognitionWorker`]s
//! consume the queue: PDF pages that already carry a text layer are kept as
//! they are, scanned pages are rasterized and recognized, and the results are
//! mirrored into an output tree as plain text and searchable PDF.

pub mod cli;
pub mod config;
pub mod logging;
pub mod output;
pub mod queue;
pub mod recognition;
pub mod tools;
pub mod types;
pub mod watcher;
pub mod worker;

pub use config::Settings;
pub use output::{ErrorSink, OutputMirror};
pub use queue::{MemoryQueue, SpoolQueue, WorkQueue};
pub use recognition::{HybridRenderer, PageClassifier, TextNormalizer};
pub use types::{EntryKind, FileState, TraversalEntry, WorkItem};
pub use watcher::{DispatchDeduplicator, PathStabilityTracker, TreeWalker, WatchService};
pub use worker::RecognitionWorker;
