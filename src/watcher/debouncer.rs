//! Per-path quiet periods for change notifications.
//!
//! Copying one document fires a burst of create and modify events. Each event
//! pushes the path's due time forward; a path is released only once its due
//! time has passed, so stabilization sees one candidate per burst.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer {
    due: HashMap<PathBuf, Instant>,
    quiet: Duration,
}

impl Debouncer {
    pub fn new(quiet_ms: u64) -> Self {
        Self {
            due: HashMap::new(),
            quiet: Duration::from_millis(quiet_ms),
        }
    }

    /// Note activity on `path` with the default quiet period.
    pub fn record(&mut self, path: PathBuf) {
        let quiet = self.quiet;
        self.record_after(path, quiet);
    }

    /// Note activity on `path`, holding it back for at least `delay`.
    ///
    /// New directories use this with a longer settle time than files.
    pub fn record_after(&mut self, path: PathBuf, delay: Duration) {
        self.due.insert(path, Instant::now() + delay);
    }

    /// Forget `path`, e.g. after it was deleted or renamed away.
    pub fn remove(&mut self, path: &Path) {
        self.due.remove(path);
    }

    /// Release every path whose due time has passed.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let released: Vec<PathBuf> = self
            .due
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &released {
            self.due.remove(path);
        }
        released
    }

    pub fn has_pending(&self) -> bool {
        !self.due.is_empty()
    }
}
