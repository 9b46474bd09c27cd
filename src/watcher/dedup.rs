//! At-most-once dispatch per stable file state.
//!
//! The live notification path and the periodic re-scan both feed candidates
//! into the same deduplicator. The check and the record happen under one lock,
//! so two producers observing the same stable state cannot both win.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::types::FileState;

/// Last enqueued state per input path.
///
/// Process-local; a restart starts empty, which costs at most one redundant
/// reprocessing of files that were already handled.
#[derive(Debug, Default)]
pub struct DispatchDeduplicator {
    enqueued: Mutex<HashMap<PathBuf, FileState>>,
}

impl DispatchDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `state` iff it differs from what was last
    /// recorded for `path` (or nothing was).
    pub fn should_enqueue(&self, path: &Path, state: FileState) -> bool {
        let mut enqueued = self.enqueued.lock();
        match enqueued.get(&path_key(path)) {
            Some(previous) if *previous == state => false,
            _ => {
                enqueued.insert(path_key(path), state);
                true
            }
        }
    }

    /// Drop the record for `path`, e.g. after the file was deleted.
    pub fn forget(&self, path: &Path) -> bool {
        self.enqueued.lock().remove(&path_key(path)).is_some()
    }

    /// Drop the record only if it still holds `state`.
    ///
    /// Used to roll back after a failed enqueue without discarding a newer
    /// state recorded concurrently by the other producer.
    pub fn forget_if(&self, path: &Path, state: FileState) -> bool {
        let mut enqueued = self.enqueued.lock();
        let key = path_key(path);
        if enqueued.get(&key) == Some(&state) {
            enqueued.remove(&key);
            true
        } else {
            false
        }
    }

    /// Forget every record under `dir` (a removed directory).
    pub fn forget_under(&self, dir: &Path) -> usize {
        let prefix = path_key(dir);
        let mut enqueued = self.enqueued.lock();
        let before = enqueued.len();
        enqueued.retain(|path, _| !path.starts_with(&prefix));
        before - enqueued.len()
    }

    pub fn len(&self) -> usize {
        self.enqueued.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.enqueued.lock().is_empty()
    }
}

/// Windows paths compare case-insensitively.
#[cfg(windows)]
fn path_key(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().to_lowercase())
}

#[cfg(not(windows))]
fn path_key(path: &Path) -> PathBuf {
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    fn state(size: u64) -> FileState {
        FileState {
            size,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + size),
        }
    }

    #[test]
    fn test_same_state_enqueued_once() {
        let dedup = DispatchDeduplicator::new();
        let path = Path::new("/in/a.pdf");
        assert!(dedup.should_enqueue(path, state(10)));
        assert!(!dedup.should_enqueue(path, state(10)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_changed_state_enqueued_again() {
        let dedup = DispatchDeduplicator::new();
        let path = Path::new("/in/a.pdf");
        assert!(dedup.should_enqueue(path, state(10)));
        assert!(dedup.should_enqueue(path, state(20)));
        assert!(!dedup.should_enqueue(path, state(20)));
        // Reverting to an older state is still a change
        assert!(dedup.should_enqueue(path, state(10)));
    }

    #[test]
    fn test_forget_allows_reenqueue() {
        let dedup = DispatchDeduplicator::new();
        let path = Path::new("/in/a.pdf");
        assert!(dedup.should_enqueue(path, state(10)));
        assert!(dedup.forget(path));
        assert!(!dedup.forget(path));
        assert!(dedup.should_enqueue(path, state(10)));
    }

    #[test]
    fn test_forget_if_keeps_newer_state() {
        let dedup = DispatchDeduplicator::new();
        let path = Path::new("/in/a.pdf");
        dedup.should_enqueue(path, state(10));
        dedup.should_enqueue(path, state(20));
        assert!(!dedup.forget_if(path, state(10)));
        assert!(!dedup.should_enqueue(path, state(20)));
        assert!(dedup.forget_if(path, state(20)));
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_forget_under_directory() {
        let dedup = DispatchDeduplicator::new();
        dedup.should_enqueue(Path::new("/in/dept/a.pdf"), state(1));
        dedup.should_enqueue(Path::new("/in/dept/sub/b.pdf"), state(2));
        dedup.should_enqueue(Path::new("/in/department.pdf"), state(3));
        assert_eq!(dedup.forget_under(Path::new("/in/dept")), 2);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_concurrent_producers_single_winner() {
        let dedup = Arc::new(DispatchDeduplicator::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if dedup.should_enqueue(Path::new("/in/race.pdf"), state(42)) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
