//! Durable directory-backed queue.
//!
//! Layout under the queue root:
//! - `pending/`  items waiting for a worker, one JSON file each
//! - `claimed/`  items a worker is processing
//! - `corrupt/`  unreadable items set aside for inspection
//! - `keys/`     one marker per item key that is pending or claimed
//! - `tmp/`      staging area for atomic writes
//!
//! A consumer claims an item by renaming it from `pending/` into `claimed/`.
//! Rename within one filesystem is atomic, so exactly one of several
//! competing workers wins a given item. File names start with a zero-padded
//! timestamp, which makes lexical order the delivery order.
//!
//! Producers reserve an item's key by creating its marker exclusively before
//! spooling it. An item whose (path, state) is already pending or claimed is
//! not spooled again, whichever process tries. The marker goes away on ack.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tempfile::NamedTempFile;

use super::{Delivery, QueueError, WorkQueue};
use crate::types::WorkItem;

const PENDING_DIR: &str = "pending";
const CLAIMED_DIR: &str = "claimed";
const CORRUPT_DIR: &str = "corrupt";
const KEYS_DIR: &str = "keys";
const TMP_DIR: &str = "tmp";
const ITEM_EXT: &str = "json";

/// How often an empty queue is re-polled while waiting.
const POLL_STEP: Duration = Duration::from_millis(100);

/// A marker with no item behind it is taken over after this long.
const STALE_MARKER: Duration = Duration::from_secs(60);

/// Directory queue shared by the watcher process and worker processes.
#[derive(Debug)]
pub struct SpoolQueue {
    root: PathBuf,
    visibility_timeout: Duration,
    sequence: AtomicU64,
}

impl SpoolQueue {
    /// Open (creating if needed) a spool at `root`.
    ///
    /// Claims older than `visibility_timeout` are handed out again.
    pub fn open(root: impl Into<PathBuf>, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let root = root.into();
        for dir in [PENDING_DIR, CLAIMED_DIR, CORRUPT_DIR, KEYS_DIR, TMP_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| QueueError::io(&path, e))?;
        }
        Ok(Self {
            root,
            visibility_timeout,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn file_name(&self, item: &WorkItem) -> String {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 10_000;
        format!(
            "{nanos:020}-{seq:04}-{}-{}.{ITEM_EXT}",
            std::process::id(),
            item.key()
        )
    }

    /// Item files in `dir`, oldest first.
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
        let mut items: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| QueueError::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == ITEM_EXT))
            .collect();
        items.sort();
        Ok(items)
    }

    /// Whether an item with `key` is pending or claimed.
    fn holds(&self, key: &str) -> Result<bool, QueueError> {
        let suffix = format!("-{key}.{ITEM_EXT}");
        for dir in [PENDING_DIR, CLAIMED_DIR] {
            let found = self.list(&self.dir(dir))?.iter().any(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().ends_with(&suffix))
            });
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Claim the right to spool `key`. False if another producer holds it.
    fn reserve(&self, key: &str) -> Result<bool, QueueError> {
        let marker = self.dir(KEYS_DIR).join(key);
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.holds(key)? {
                    return Ok(false);
                }
                // Another producer may be between reserve and persist
                let age = fs::metadata(&marker)
                    .and_then(|meta| meta.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok());
                if !age.is_some_and(|age| age >= STALE_MARKER) {
                    return Ok(false);
                }
                tracing::warn!("[queue] taking over stale key marker {}", marker.display());
                touch(&marker).map_err(|e| QueueError::io(&marker, e))?;
                Ok(true)
            }
            Err(e) => Err(QueueError::io(&marker, e)),
        }
    }

    fn release(&self, key: &str) {
        let marker = self.dir(KEYS_DIR).join(key);
        match fs::remove_file(&marker) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[queue] cannot remove key marker {}: {e}", marker.display()),
        }
    }

    fn spool(&self, item: &WorkItem) -> Result<PathBuf, QueueError> {
        let tmp_dir = self.dir(TMP_DIR);
        let target = self.dir(PENDING_DIR).join(self.file_name(item));

        let mut staged = NamedTempFile::new_in(&tmp_dir).map_err(|e| QueueError::io(&tmp_dir, e))?;
        serde_json::to_writer(&mut staged, item)?;
        staged
            .as_file_mut()
            .sync_all()
            .map_err(|e| QueueError::io(staged.path(), e))?;
        staged
            .persist(&target)
            .map_err(|e| QueueError::io(&target, e.error))?;
        Ok(target)
    }

    /// Return expired claims to `pending/`.
    ///
    /// A worker that crashed mid-item leaves its claim behind; this is how the
    /// item gets delivered again.
    pub fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let pending = self.dir(PENDING_DIR);
        let mut reclaimed = 0;

        for claim in self.list(&self.dir(CLAIMED_DIR))? {
            let age = fs::metadata(&claim)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            let Some(age) = age else { continue };
            if age < self.visibility_timeout {
                continue;
            }
            let Some(name) = claim.file_name() else {
                continue;
            };
            match fs::rename(&claim, pending.join(name)) {
                Ok(()) => {
                    crate::log_event!("queue", "reclaimed", "{}", claim.display());
                    reclaimed += 1;
                }
                // Acked or reclaimed by someone else meanwhile
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(QueueError::io(&claim, e)),
            }
        }

        Ok(reclaimed)
    }

    /// Try to claim the oldest pending item once.
    fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let claimed_dir = self.dir(CLAIMED_DIR);

        for candidate in self.list(&self.dir(PENDING_DIR))? {
            let Some(name) = candidate.file_name() else {
                continue;
            };
            let claim = claimed_dir.join(name);
            match fs::rename(&candidate, &claim) {
                Ok(()) => {}
                // Another worker won this one
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(QueueError::io(&candidate, e)),
            }

            // The visibility clock starts at claim time, not enqueue time
            touch(&claim).map_err(|e| QueueError::io(&claim, e))?;

            match read_item(&claim) {
                Ok(item) => return Ok(Some(Delivery::new(item, Some(claim)))),
                Err(reason) => {
                    tracing::warn!(
                        "[queue] unreadable item {}: {reason}, moving to {CORRUPT_DIR}/",
                        claim.display()
                    );
                    let target = self.dir(CORRUPT_DIR).join(name);
                    fs::rename(&claim, &target).map_err(|e| QueueError::io(&claim, e))?;
                    if let Some(key) = key_of(name) {
                        self.release(&key);
                    }
                }
            }
        }

        Ok(None)
    }
}

impl WorkQueue for SpoolQueue {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        let key = item.key();
        if !self.reserve(&key)? {
            crate::debug_event!("queue", "already spooled", "{}", item.path.display());
            return Ok(());
        }

        match self.spool(item) {
            Ok(target) => {
                crate::debug_event!("queue", "spooled", "{}", target.display());
                Ok(())
            }
            Err(e) => {
                self.release(&key);
                Err(e)
            }
        }
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        self.reclaim_expired()?;

        loop {
            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let Some(claim) = delivery.claim() else {
            return Ok(());
        };
        match fs::remove_file(claim) {
            Ok(()) => {
                self.release(&delivery.item.key());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Outlived the visibility timeout and was handed out again
                tracing::warn!(
                    "[queue] claim {} expired before ack, item may be processed twice",
                    claim.display()
                );
                Ok(())
            }
            Err(e) => Err(QueueError::io(claim, e)),
        }
    }

    fn pending(&self) -> Result<usize, QueueError> {
        Ok(self.list(&self.dir(PENDING_DIR))?.len())
    }
}

fn read_item(path: &Path) -> Result<WorkItem, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| e.to_string())
}

/// Item key from a spool file name (`<time>-<seq>-<pid>-<key>.json`).
fn key_of(name: &std::ffi::OsStr) -> Option<String> {
    let name = name.to_str()?.strip_suffix(&format!(".{ITEM_EXT}"))?;
    name.rsplit('-').next().map(str::to_string)
}

fn touch(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.set_modified(SystemTime::now())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileState;
    use tempfile::TempDir;

    fn item(name: &str, size: u64) -> WorkItem {
        WorkItem::new(
            format!("/in/{name}"),
            FileState {
                size,
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(size),
            },
        )
    }

    #[test]
    fn test_enqueue_dequeue_ack() {
        let dir = TempDir::new().unwrap();
        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();

        queue.enqueue(&item("a.pdf", 1)).unwrap();
        queue.enqueue(&item("b.pdf", 2)).unwrap();
        assert_eq!(queue.pending().unwrap(), 2);

        let first = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.item, item("a.pdf", 1));
        assert_eq!(queue.pending().unwrap(), 1);

        queue.ack(&first).unwrap();
        assert!(fs::read_dir(dir.path().join(CLAIMED_DIR)).unwrap().next().is_none());

        let second = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(second.item, item("b.pdf", 2));
        queue.ack(&second).unwrap();

        assert!(queue.dequeue(Duration::from_millis(50)).unwrap().is_none());
    }

    #[test]
    fn test_items_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let producer = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();
            producer.enqueue(&item("kept.pdf", 7)).unwrap();
        }
        let consumer = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();
        let delivery = consumer.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(delivery.item, item("kept.pdf", 7));
    }

    #[test]
    fn test_unacked_claim_is_redelivered_after_timeout() {
        let dir = TempDir::new().unwrap();
        let queue = SpoolQueue::open(dir.path(), Duration::from_millis(50)).unwrap();
        queue.enqueue(&item("crash.pdf", 3)).unwrap();

        let lost = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert!(queue.dequeue(Duration::ZERO).unwrap().is_none());

        std::thread::sleep(Duration::from_millis(120));
        let again = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(again.item, lost.item);

        // The stale receipt is harmless
        queue.ack(&lost).unwrap();
        queue.ack(&again).unwrap();
    }

    #[test]
    fn test_corrupt_item_is_set_aside() {
        let dir = TempDir::new().unwrap();
        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();
        fs::write(dir.path().join(PENDING_DIR).join("0-garbage.json"), b"{not json").unwrap();
        queue.enqueue(&item("good.pdf", 4)).unwrap();

        let delivery = queue.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(delivery.item, item("good.pdf", 4));
        assert!(dir.path().join(CORRUPT_DIR).join("0-garbage.json").exists());
    }

    #[test]
    fn test_same_item_is_spooled_once_until_acked() {
        let dir = TempDir::new().unwrap();
        let watcher = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();
        let worker = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();

        watcher.enqueue(&item("doc.pdf", 5)).unwrap();
        worker.enqueue(&item("doc.pdf", 5)).unwrap();
        assert_eq!(watcher.pending().unwrap(), 1);

        // A newer state of the same file is a different item
        worker.enqueue(&item("doc.pdf", 6)).unwrap();
        assert_eq!(watcher.pending().unwrap(), 2);

        // Claimed but not acked still counts as queued
        let delivery = worker.dequeue(Duration::ZERO).unwrap().unwrap();
        assert_eq!(delivery.item, item("doc.pdf", 5));
        watcher.enqueue(&item("doc.pdf", 5)).unwrap();
        assert_eq!(watcher.pending().unwrap(), 1);

        worker.ack(&delivery).unwrap();
        watcher.enqueue(&item("doc.pdf", 5)).unwrap();
        assert_eq!(watcher.pending().unwrap(), 2);
    }

    #[test]
    fn test_stale_key_marker_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap();
        let orphan = item("orphan.pdf", 8);

        let marker = dir.path().join(KEYS_DIR).join(orphan.key());
        File::create(&marker)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        queue.enqueue(&orphan).unwrap();
        assert_eq!(queue.pending().unwrap(), 1);

        // A fresh marker means another producer is still spooling
        let racing = item("racing.pdf", 9);
        File::create(dir.path().join(KEYS_DIR).join(racing.key())).unwrap();
        queue.enqueue(&racing).unwrap();
        assert_eq!(queue.pending().unwrap(), 1);
    }

    #[test]
    fn test_key_of_spool_name() {
        let name = std::ffi::OsStr::new("00000000000000000042-0001-77-abcdef0123456789.json");
        assert_eq!(key_of(name).as_deref(), Some("abcdef0123456789"));
        assert_eq!(key_of(std::ffi::OsStr::new("README")), None);
    }

    #[test]
    fn test_competing_consumers_claim_each_item_once() {
        let dir = TempDir::new().unwrap();
        let queue = std::sync::Arc::new(SpoolQueue::open(dir.path(), Duration::from_secs(60)).unwrap());
        for i in 0..40 {
            queue.enqueue(&item(&format!("{i}.pdf"), i)).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = std::sync::Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(delivery) = queue.dequeue(Duration::ZERO).unwrap() {
                        seen.push(delivery.item.path.clone());
                        queue.ack(&delivery).unwrap();
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<PathBuf> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, 40);
        assert_eq!(all.len(), 40);
    }
}
