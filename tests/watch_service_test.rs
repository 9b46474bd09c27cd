//! Watch service behavior against a real directory tree.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use ocrdrop::WorkItem;
use ocrdrop::queue::{Delivery, MemoryQueue, QueueError, WorkQueue};
use ocrdrop::watcher::{PathStabilityTracker, TreeWalker, WatchService, WatchServiceBuilder};

fn builder(root: &Path, queue: Arc<MemoryQueue>) -> WatchServiceBuilder {
    WatchService::builder()
        .root(root)
        .queue(queue)
        .tracker(PathStabilityTracker::new(2, 10, Duration::from_millis(20)))
        .rescan_interval(None)
}

fn queued_names(queue: &MemoryQueue) -> Vec<String> {
    let mut names: Vec<String> = queue
        .drain()
        .into_iter()
        .map(|item| item.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn touch(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Queue whose first `failures` enqueues are refused.
struct FlakyQueue {
    inner: MemoryQueue,
    failures: AtomicUsize,
}

impl WorkQueue for FlakyQueue {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(QueueError::Closed);
        }
        self.inner.enqueue(item)
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        self.inner.dequeue(wait)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.ack(delivery)
    }

    fn pending(&self) -> Result<usize, QueueError> {
        self.inner.pending()
    }
}

#[tokio::test]
async fn test_refused_enqueue_is_retried_on_next_pass() {
    let dir = TempDir::new().unwrap();
    touch(&dir.path().join("a.pdf"), b"a");

    let queue = Arc::new(FlakyQueue {
        inner: MemoryQueue::new(),
        failures: AtomicUsize::new(1),
    });
    let service = WatchService::builder()
        .root(dir.path())
        .queue(queue.clone())
        .tracker(PathStabilityTracker::new(2, 10, Duration::from_millis(20)))
        .rescan_interval(None)
        .build()
        .unwrap();

    let stats = service.scan_once().await;
    assert_eq!(stats.enqueue_failures, 1);
    assert_eq!(stats.enqueued, 0);
    assert_eq!(queue.pending().unwrap(), 0);

    let stats = service.scan_once().await;
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.duplicates, 0);

    let stats = service.scan_once().await;
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(queued_names(&queue.inner), vec!["a.pdf"]);
}

#[tokio::test]
async fn test_excluded_directories_never_enqueued() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    touch(&root.join("keep/a.pdf"), b"a");
    touch(&root.join(".git/objects/b.pdf"), b"b");
    touch(&root.join("deep/er/__pycache__/c.pdf"), b"c");
    touch(&root.join("$RECYCLE.BIN/S-1-5/d.pdf"), b"d");
    touch(&root.join("system volume information/e.pdf"), b"e");

    let queue = Arc::new(MemoryQueue::new());
    let service = builder(root, Arc::clone(&queue)).build().unwrap();
    let stats = service.scan_once().await;

    assert_eq!(stats.enqueued, 1);
    assert_eq!(queued_names(&queue), vec!["a.pdf"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_linked_directory_follows_policy() {
    let outside = TempDir::new().unwrap();
    touch(&outside.path().join("linked.pdf"), b"linked");

    let dir = TempDir::new().unwrap();
    let root = dir.path();
    touch(&root.join("own.pdf"), b"own");
    std::os::unix::fs::symlink(outside.path(), root.join("shared")).unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let service = builder(root, Arc::clone(&queue))
        .walker(TreeWalker::new(Vec::<String>::new(), false))
        .build()
        .unwrap();
    service.scan_once().await;
    assert_eq!(queued_names(&queue), vec!["own.pdf"]);

    let queue = Arc::new(MemoryQueue::new());
    let service = builder(root, Arc::clone(&queue))
        .walker(TreeWalker::new(Vec::<String>::new(), true))
        .build()
        .unwrap();
    service.scan_once().await;
    assert_eq!(queued_names(&queue), vec!["linked.pdf", "own.pdf"]);
}

#[tokio::test]
async fn test_file_being_copied_is_enqueued_only_once_settled() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let path = root.join("incoming.pdf");
    touch(&path, b"%PDF");

    // Keeps growing for about a second
    let writer_path = path.clone();
    let writer = std::thread::spawn(move || {
        let mut file = OpenOptions::new().append(true).open(&writer_path).unwrap();
        for _ in 0..50 {
            file.write_all(&[b'x'; 64]).unwrap();
            file.sync_all().unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
    });

    // Short budget: gives up on the moving file
    let queue = Arc::new(MemoryQueue::new());
    let service = builder(root, Arc::clone(&queue))
        .tracker(PathStabilityTracker::new(2, 3, Duration::from_millis(30)))
        .build()
        .unwrap();
    let stats = service.scan_once().await;
    assert_eq!(stats.enqueued, 0);
    assert_eq!(stats.unstable, 1);
    assert_eq!(queue.pending().unwrap(), 0);

    writer.join().unwrap();

    // Next pass sees it settled, with its final size
    let stats = service.scan_once().await;
    assert_eq!(stats.enqueued, 1);
    let items = queue.drain();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].state.size, 4 + 50 * 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notifications_and_rescans_enqueue_exactly_once() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    touch(&root.join("existing.pdf"), b"already here");

    let queue = Arc::new(MemoryQueue::new());
    let service = builder(&root, Arc::clone(&queue))
        .debounce_ms(50)
        .dir_settle(Duration::from_millis(100))
        .rescan_interval(Some(Duration::from_millis(150)))
        .build()
        .unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let observed = Arc::clone(&queue);
    let tree = root.clone();
    let driver = async move {
        // Let the initial pass pick up the existing file
        wait_for(&observed, 1).await;

        touch(&tree.join("dropped/later/new.jpg"), b"new image");
        touch(&tree.join("top.png"), b"top image");
        wait_for(&observed, 3).await;

        // Several more rescans over unchanged files
        tokio::time::sleep(Duration::from_millis(700)).await;
        let _ = stop_tx.send(());
    };

    let (result, ()) = tokio::join!(
        service.run_until(async {
            let _ = stop_rx.await;
        }),
        driver
    );
    result.unwrap();

    assert_eq!(queued_names(&queue), vec!["existing.pdf", "new.jpg", "top.png"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deleted_file_recopied_unchanged_is_enqueued_again() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let path = root.join("contract.pdf");
    touch(&path, b"signed contract");
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let service = builder(&root, Arc::clone(&queue))
        .debounce_ms(50)
        .build()
        .unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let observed = Arc::clone(&queue);
    let driver = async move {
        wait_for(&observed, 1).await;

        fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Same bytes, same modification time: an identical FileState
        touch(&path, b"signed contract");
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        wait_for(&observed, 2).await;
        let _ = stop_tx.send(());
    };

    let (result, ()) = tokio::join!(
        service.run_until(async {
            let _ = stop_rx.await;
        }),
        driver
    );
    result.unwrap();

    let items = queue.drain();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].state, items[1].state);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_files_are_enqueued_during_a_notification_burst() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    touch(&root.join("busy.log"), b"");

    let queue = Arc::new(MemoryQueue::new());
    let service = builder(&root, Arc::clone(&queue))
        .debounce_ms(50)
        .build()
        .unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let observed = Arc::clone(&queue);
    let tree = root.clone();
    let driver = async move {
        // Let the initial pass finish before the burst starts
        tokio::time::sleep(Duration::from_millis(200)).await;

        // A write every 10ms for two seconds
        let writing = Arc::new(AtomicBool::new(true));
        let busy = tree.join("busy.log");
        let flag = Arc::clone(&writing);
        std::thread::spawn(move || {
            let mut file = OpenOptions::new().append(true).open(&busy).unwrap();
            for _ in 0..200 {
                file.write_all(b"tick\n").unwrap();
                file.sync_all().unwrap();
                std::thread::sleep(Duration::from_millis(10));
            }
            flag.store(false, Ordering::SeqCst);
        });

        touch(&tree.join("urgent.pdf"), b"needs ocr");
        wait_for(&observed, 1).await;
        let enqueued_mid_burst = writing.load(Ordering::SeqCst);

        while writing.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let _ = stop_tx.send(());
        enqueued_mid_burst
    };

    let (result, enqueued_mid_burst) = tokio::join!(
        service.run_until(async {
            let _ = stop_rx.await;
        }),
        driver
    );
    result.unwrap();

    assert!(enqueued_mid_burst);
    assert_eq!(queued_names(&queue), vec!["urgent.pdf"]);
}

async fn wait_for(queue: &MemoryQueue, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while queue.pending().unwrap() < count && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
