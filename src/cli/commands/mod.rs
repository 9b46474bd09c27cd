//! Command implementations for the CLI.
//!
//! Each command is implemented in its own module.

pub mod doctor;
pub mod failures;
pub mod init;
pub mod watch;
pub mod work;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::{ResolvedPaths, Settings};
use crate::queue::{SpoolQueue, WorkQueue};

/// Validate settings, failing the command on any startup error.
pub(crate) fn resolve(settings: &Settings) -> anyhow::Result<ResolvedPaths> {
    settings.validate().context("Invalid configuration")
}

/// Open the shared spool queue.
pub(crate) fn open_queue(settings: &Settings, dir: &Path) -> anyhow::Result<Arc<dyn WorkQueue>> {
    let queue = SpoolQueue::open(
        dir,
        Duration::from_secs(settings.queue.visibility_timeout_secs),
    )
    .with_context(|| format!("Cannot open queue at {}", dir.display()))?;
    Ok(Arc::new(queue))
}
