//! Watch-and-enqueue service.
//!
//! Two producers feed candidate files into one stabilize → dedup → enqueue
//! path:
//! - live notifications from `notify`, debounced per path,
//! - a periodic full walk of the watch root, which is authoritative.
//!
//! One full walk runs at startup before notifications are handled, so files
//! that were already present are not missed. Notifications arriving during
//! that walk are buffered and handled afterwards.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::WatchConfig;
use crate::queue::WorkQueue;
use crate::types::{EntryKind, WorkItem, extension_lower};

use super::debouncer::Debouncer;
use super::dedup::DispatchDeduplicator;
use super::error::WatchError;
use super::stability::{PathStabilityTracker, Stability};
use super::walker::TreeWalker;

/// Counters for what the service did with the candidates it saw.
#[derive(Debug, Default)]
struct WatchStats {
    candidates: AtomicU64,
    enqueued: AtomicU64,
    duplicates: AtomicU64,
    unstable: AtomicU64,
    vanished: AtomicU64,
    unsupported: AtomicU64,
    enqueue_failures: AtomicU64,
}

/// Point-in-time copy of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStatsSnapshot {
    pub candidates: u64,
    pub enqueued: u64,
    pub duplicates: u64,
    pub unstable: u64,
    pub vanished: u64,
    pub unsupported: u64,
    pub enqueue_failures: u64,
}

impl WatchStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            candidates: self.candidates.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unstable: self.unstable.load(Ordering::Relaxed),
            vanished: self.vanished.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
        }
    }
}

/// Shared stabilize → dedup → enqueue stage.
struct Dispatcher {
    root: PathBuf,
    walker: TreeWalker,
    tracker: PathStabilityTracker,
    dedup: Arc<DispatchDeduplicator>,
    queue: Arc<dyn WorkQueue>,
    /// Lowercased accepted extensions; empty accepts everything.
    extensions: HashSet<String>,
    limit: Semaphore,
    /// Paths being stabilized -> whether another request arrived meanwhile.
    in_flight: Mutex<HashMap<PathBuf, bool>>,
    stats: WatchStats,
}

impl Dispatcher {
    fn accepts(&self, path: &Path) -> bool {
        self.extensions.is_empty()
            || extension_lower(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Stabilize one candidate and enqueue it if its stable state is new.
    ///
    /// Concurrent requests for a path already being stabilized are folded
    /// into one extra round after the current one.
    async fn dispatch(self: Arc<Self>, path: PathBuf) {
        if !self.accepts(&path) {
            WatchStats::bump(&self.stats.unsupported);
            crate::debug_event!("watcher", "unsupported", "{}", path.display());
            return;
        }

        {
            let mut in_flight = self.in_flight.lock();
            if let Some(again) = in_flight.get_mut(&path) {
                *again = true;
                return;
            }
            in_flight.insert(path.clone(), false);
        }

        loop {
            self.stabilize_and_enqueue(&path).await;

            let mut in_flight = self.in_flight.lock();
            match in_flight.get_mut(&path) {
                Some(again) if *again => *again = false,
                _ => {
                    in_flight.remove(&path);
                    break;
                }
            }
        }
    }

    async fn stabilize_and_enqueue(&self, path: &Path) {
        let Ok(_permit) = self.limit.acquire().await else {
            return;
        };
        WatchStats::bump(&self.stats.candidates);

        match self.tracker.wait(path).await {
            Stability::Stable(state) => {
                if !self.dedup.should_enqueue(path, state) {
                    WatchStats::bump(&self.stats.duplicates);
                    crate::debug_event!("watcher", "already enqueued", "{}", path.display());
                    return;
                }
                let item = WorkItem::new(path, state);
                match self.queue.enqueue(&item) {
                    Ok(()) => {
                        WatchStats::bump(&self.stats.enqueued);
                        crate::log_event!("watcher", "enqueued", "{}", path.display());
                    }
                    Err(e) => {
                        // Roll back so the next pass tries again
                        self.dedup.forget_if(path, state);
                        WatchStats::bump(&self.stats.enqueue_failures);
                        tracing::error!("[watcher] enqueue failed for {}: {e}", path.display());
                    }
                }
            }
            Stability::TimedOut => {
                WatchStats::bump(&self.stats.unstable);
                crate::log_event!(
                    "watcher",
                    "still changing, deferred",
                    "{}",
                    path.display()
                );
            }
            Stability::Vanished => {
                WatchStats::bump(&self.stats.vanished);
                self.dedup.forget(path);
                crate::debug_event!("watcher", "vanished", "{}", path.display());
            }
        }
    }

    /// Walk `start` and dispatch every file found, waiting for all of them.
    async fn full_pass(self: Arc<Self>, start: PathBuf) {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);
        let walker = self.walker.clone();
        let walk_root = start.clone();

        let walk = tokio::task::spawn_blocking(move || {
            let mut links = 0usize;
            for entry in walker.walk(&walk_root) {
                match entry.kind {
                    EntryKind::File => {
                        if tx.blocking_send(entry.path).is_err() {
                            break;
                        }
                    }
                    EntryKind::Link => links += 1,
                    EntryKind::Directory => {}
                }
            }
            links
        });

        let cap = self.limit.available_permits().max(1) * 4;
        let mut tasks = JoinSet::new();
        while let Some(path) = rx.recv().await {
            while tasks.len() >= cap {
                tasks.join_next().await;
            }
            tasks.spawn(Arc::clone(&self).dispatch(path));
        }
        while tasks.join_next().await.is_some() {}

        match walk.await {
            Ok(links) if links > 0 => {
                crate::debug_event!(
                    "watcher",
                    "links not followed",
                    "{links} under {}",
                    start.display()
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("[watcher] walk of {} failed: {e}", start.display()),
        }
    }

    fn forget(&self, path: &Path) {
        let mut forgotten = usize::from(self.dedup.forget(path));
        forgotten += self.dedup.forget_under(path);
        if forgotten > 0 {
            crate::debug_event!("watcher", "removed", "{}", path.display());
        }
    }
}

/// Recursive watch of one root, emitting work items into a queue.
///
/// Multiple roots are served by multiple independent instances.
pub struct WatchService {
    dispatcher: Arc<Dispatcher>,
    debounce_ms: u64,
    dir_settle: Duration,
    rescan_interval: Option<Duration>,
}

impl WatchService {
    /// Create a builder for configuring the service.
    pub fn builder() -> WatchServiceBuilder {
        WatchServiceBuilder::new()
    }

    pub fn root(&self) -> &Path {
        &self.dispatcher.root
    }

    pub fn stats(&self) -> WatchStatsSnapshot {
        self.dispatcher.stats.snapshot()
    }

    /// The deduplicator guarding the queue, for workers in this process that
    /// re-enqueue changed inputs.
    pub fn dedup(&self) -> Arc<DispatchDeduplicator> {
        Arc::clone(&self.dispatcher.dedup)
    }

    /// One full pass over the root, then return.
    pub async fn scan_once(&self) -> WatchStatsSnapshot {
        let root = self.dispatcher.root.clone();
        Arc::clone(&self.dispatcher).full_pass(root).await;
        self.stats()
    }

    /// Run until interrupted with Ctrl-C.
    pub async fn run(self) -> Result<(), WatchError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("[watcher] cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Main event loop, until `shutdown` completes.
    ///
    /// 1. Starts the recursive notification watch (events buffer from here on)
    /// 2. Runs the initial full pass
    /// 3. Handles debounced notifications and periodic re-scans
    pub async fn run_until(self, shutdown: impl std::future::Future<Output = ()>) -> Result<(), WatchError> {
        let root = self.dispatcher.root.clone();

        let (tx, mut event_rx) = mpsc::channel(1024);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.clone(),
                reason: e.to_string(),
            })?;

        tokio::pin!(shutdown);

        crate::log_event!("watcher", "initial scan", "{}", root.display());
        tokio::select! {
            _ = Arc::clone(&self.dispatcher).full_pass(root.clone()) => {}
            _ = &mut shutdown => {
                crate::log_event!("watcher", "stopped during initial scan");
                return Ok(());
            }
        }
        let stats = self.stats();
        crate::log_event!(
            "watcher",
            "started",
            "{} enqueued, {} deferred, watching {}",
            stats.enqueued,
            stats.unstable,
            root.display()
        );

        let mut debouncer = Debouncer::new(self.debounce_ms);
        let mut rescan = self.rescan_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        // Fires on schedule even while a burst of notifications keeps arriving
        let mut ready_tick = tokio::time::interval(Duration::from_millis(100));
        ready_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let rescanning = Arc::new(AtomicBool::new(false));
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                res = event_rx.recv() => match res {
                    Some(Ok(event)) => self.handle_event(event, &mut debouncer),
                    Some(Err(e)) => tracing::error!("[watcher] file watch error: {e}"),
                    None => return Err(WatchError::ChannelClosed),
                },

                _ = ready_tick.tick() => {
                    for path in debouncer.take_ready() {
                        self.process_ready(path, &mut tasks);
                    }
                    while let Some(done) = tasks.try_join_next() {
                        if let Err(e) = done {
                            tracing::error!("[watcher] dispatch task failed: {e}");
                        }
                    }
                }

                _ = next_tick(&mut rescan) => {
                    // A slow pass is not stacked with the next one
                    if rescanning.swap(true, Ordering::AcqRel) {
                        crate::debug_event!("watcher", "re-scan still running, skipped");
                    } else {
                        crate::debug_event!("watcher", "re-scan", "{}", root.display());
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let flag = Arc::clone(&rescanning);
                        let start = root.clone();
                        tasks.spawn(async move {
                            dispatcher.full_pass(start).await;
                            flag.store(false, Ordering::Release);
                        });
                    }
                }
            }
        }

        tasks.shutdown().await;
        drop(watcher);
        crate::log_event!("watcher", "stopped");
        Ok(())
    }

    /// Route one notification into the debouncer.
    fn handle_event(&self, event: Event, debouncer: &mut Debouncer) {
        let root = &self.dispatcher.root;
        let walker = &self.dispatcher.walker;

        match event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    debouncer.remove(path);
                    self.dispatcher.forget(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    debouncer.remove(from);
                    self.dispatcher.forget(from);
                    self.record_candidate(to.clone(), debouncer, walker, root);
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    self.record_candidate(path, debouncer, walker, root);
                }
            }
            _ => {}
        }
    }

    fn record_candidate(
        &self,
        path: PathBuf,
        debouncer: &mut Debouncer,
        walker: &TreeWalker,
        root: &Path,
    ) {
        if !walker.admits(root, &path) {
            crate::debug_event!("watcher", "not admitted", "{}", path.display());
            return;
        }
        if path.is_dir() {
            // Files copied along with a new directory are not always reported
            debouncer.record_after(path, self.dir_settle);
        } else {
            debouncer.record(path);
        }
    }

    /// A path went quiet: dispatch it, or walk it if it is a directory.
    fn process_ready(&self, path: PathBuf, tasks: &mut JoinSet<()>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                crate::log_event!("watcher", "new directory", "{}", path.display());
                tasks.spawn(dispatcher.full_pass(path));
            }
            Ok(_) => {
                tasks.spawn(dispatcher.dispatch(path));
            }
            Err(_) => dispatcher.forget(&path),
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Builder for constructing a WatchService.
pub struct WatchServiceBuilder {
    root: Option<PathBuf>,
    queue: Option<Arc<dyn WorkQueue>>,
    walker: TreeWalker,
    tracker: PathStabilityTracker,
    extensions: Vec<String>,
    debounce_ms: u64,
    dir_settle: Duration,
    rescan_interval: Option<Duration>,
    max_parallel: usize,
    dedup: Option<Arc<DispatchDeduplicator>>,
}

impl WatchServiceBuilder {
    /// Create a new builder with the default watch settings.
    pub fn new() -> Self {
        Self::from_config(&WatchConfig::default())
    }

    /// Start from a `[watch]` configuration section.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            root: None,
            queue: None,
            walker: TreeWalker::from_config(config),
            tracker: PathStabilityTracker::from_config(config),
            extensions: config.extensions.clone(),
            debounce_ms: config.debounce_ms,
            dir_settle: Duration::from_millis(config.dir_settle_ms),
            rescan_interval: (config.rescan_interval_secs > 0)
                .then(|| Duration::from_secs(config.rescan_interval_secs)),
            max_parallel: config.max_parallel,
            dedup: None,
        }
    }

    /// Set the watch root. Must be a real directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Set the queue receiving work items.
    pub fn queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn walker(mut self, walker: TreeWalker) -> Self {
        self.walker = walker;
        self
    }

    pub fn tracker(mut self, tracker: PathStabilityTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Accepted extensions; empty accepts every file.
    pub fn extensions<S: Into<String>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the debounce duration in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn dir_settle(mut self, delay: Duration) -> Self {
        self.dir_settle = delay;
        self
    }

    /// Period of the full re-scan; `None` disables it.
    pub fn rescan_interval(mut self, period: Option<Duration>) -> Self {
        self.rescan_interval = period.filter(|p| !p.is_zero());
        self
    }

    /// Candidates stabilized concurrently.
    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    /// Share an existing deduplicator instead of starting with an empty one.
    pub fn dedup(mut self, dedup: Arc<DispatchDeduplicator>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Build the WatchService.
    pub fn build(self) -> Result<WatchService, WatchError> {
        let root = self.root.ok_or_else(|| WatchError::InitFailed {
            reason: "Watch root is required".to_string(),
        })?;
        let queue = self.queue.ok_or_else(|| WatchError::InitFailed {
            reason: "Queue is required".to_string(),
        })?;

        let meta = std::fs::symlink_metadata(&root).map_err(|e| WatchError::InvalidRoot {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        if meta.file_type().is_symlink() || !meta.is_dir() {
            return Err(WatchError::InvalidRoot {
                path: root,
                reason: "must be a real directory, not a link or file".to_string(),
            });
        }
        let root = root.canonicalize().map_err(|e| WatchError::InvalidRoot {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        let dispatcher = Dispatcher {
            root,
            walker: self.walker,
            tracker: self.tracker,
            dedup: self.dedup.unwrap_or_default(),
            queue,
            extensions: self
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            limit: Semaphore::new(self.max_parallel.max(1)),
            in_flight: Mutex::new(HashMap::new()),
            stats: WatchStats::default(),
        };

        Ok(WatchService {
            dispatcher: Arc::new(dispatcher),
            debounce_ms: self.debounce_ms,
            dir_settle: self.dir_settle,
            rescan_interval: self.rescan_interval,
        })
    }
}

impl Default for WatchServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use std::fs;
    use tempfile::TempDir;

    fn service(root: &Path, queue: Arc<MemoryQueue>) -> WatchService {
        WatchService::builder()
            .root(root)
            .queue(queue)
            .tracker(PathStabilityTracker::new(2, 5, Duration::from_millis(10)))
            .rescan_interval(None)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_once_enqueues_supported_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dept/2024")).unwrap();
        fs::write(dir.path().join("dept/2024/scan.JPG"), b"jpg").unwrap();
        fs::write(dir.path().join("dept/report.pdf"), b"%PDF").unwrap();
        fs::write(dir.path().join("dept/notes.txt"), b"text").unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let service = service(dir.path(), Arc::clone(&queue));
        let stats = service.scan_once().await;

        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.unsupported, 1);
        let mut names: Vec<_> = queue
            .drain()
            .into_iter()
            .map(|item| item.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["report.pdf", "scan.JPG"]);
    }

    #[tokio::test]
    async fn test_repeated_scans_enqueue_once_per_state() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.pdf");
        fs::write(&file, b"v1").unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let service = service(dir.path(), Arc::clone(&queue));
        service.scan_once().await;
        let stats = service.scan_once().await;
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.duplicates, 1);

        fs::write(&file, b"version two").unwrap();
        let stats = service.scan_once().await;
        assert_eq!(stats.enqueued, 2);
        assert_eq!(queue.drain().len(), 2);
    }

    #[test]
    fn test_build_rejects_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        let result = WatchService::builder()
            .root(&file)
            .queue(Arc::new(MemoryQueue::new()))
            .build();
        assert!(matches!(result, Err(WatchError::InvalidRoot { .. })));
    }

    #[test]
    fn test_build_requires_queue() {
        let dir = TempDir::new().unwrap();
        let result = WatchService::builder().root(dir.path()).build();
        assert!(matches!(result, Err(WatchError::InitFailed { .. })));
    }
}
