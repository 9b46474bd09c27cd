//! Recognition workers.
//!
//! A worker pulls one work item at a time from the queue and takes it through
//! the whole pipeline:
//!
//! ```text
//! dequeue ──> verify FileState ──> HybridRenderer ──> OutputMirror ──> ack
//!                  │                     │                 │
//!                  │ changed             └── failure ──────┴──> ErrorSink ──> ack
//!                  └──> wait until stable, re-enqueue ──> ack
//! ```
//!
//! Whatever happens to an item, including a panic, it is acknowledged and
//! the worker moves on. Workers share nothing but the queue, so any number
//! of them can run as threads of one process or as separate processes on
//! the same spool.

mod deadline;
mod error;

pub use deadline::{Deadline, DeadlineExceeded};
pub use error::{FailureKind, ProcessError};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{ConfigError, ResolvedPaths, Settings};
use crate::output::{ErrorSink, OutputMirror};
use crate::queue::{Delivery, WorkQueue};
use crate::recognition::{
    EngineOptions, HybridRenderer, LanguageSet, PageClassifier, PageDecision, PopplerBackend,
    RenderError, RenderOptions, TesseractEngine,
};
use crate::types::{FileState, WorkItem};
use crate::watcher::{DispatchDeduplicator, PathStabilityTracker, Stability};

/// Result of handling one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Artifacts were written.
    Completed { text: Option<PathBuf>, pdf: Option<PathBuf> },
    /// Processing failed; a record was written to the error sink.
    Failed(FailureKind),
    /// The input changed after it was queued and was queued again.
    Requeued,
    /// The input changed after it was queued, and its new state was already
    /// queued by the watcher.
    AlreadyQueued,
    /// The input no longer exists.
    Vanished,
    /// The input was still changing; the watcher will pick it up again.
    Deferred,
}

#[derive(Debug, Default)]
struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    skipped: AtomicU64,
}

/// Counters since the worker was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub requeued: u64,
    /// Vanished, still-changing or already re-queued inputs.
    pub skipped: u64,
}

impl WorkerStats {
    fn count(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Completed { .. } => &self.completed,
            Outcome::Failed(_) => &self.failed,
            Outcome::Requeued => &self.requeued,
            Outcome::Vanished | Outcome::Deferred | Outcome::AlreadyQueued => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Consumes work items and produces artifacts.
pub struct RecognitionWorker {
    queue: Arc<dyn WorkQueue>,
    renderer: Arc<HybridRenderer>,
    mirror: OutputMirror,
    errors: ErrorSink,
    tracker: PathStabilityTracker,
    dedup: Option<Arc<DispatchDeduplicator>>,
    write_text: bool,
    write_pdf: bool,
    max_duration: Option<Duration>,
    poll_interval: Duration,
    stats: WorkerStats,
}

impl RecognitionWorker {
    /// Worker writing the artifacts the renderer was configured for: the
    /// text artifact always, the PDF when the renderer requests fragments.
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        renderer: Arc<HybridRenderer>,
        mirror: OutputMirror,
        errors: ErrorSink,
        tracker: PathStabilityTracker,
    ) -> Self {
        let write_pdf = renderer.options().want_pdf;
        Self {
            queue,
            renderer,
            mirror,
            errors,
            tracker,
            dedup: None,
            write_text: true,
            write_pdf,
            max_duration: None,
            poll_interval: Duration::from_secs(1),
            stats: WorkerStats::default(),
        }
    }

    /// Wire a worker from validated settings, using the poppler and
    /// tesseract adapters.
    pub fn from_settings(
        settings: &Settings,
        paths: &ResolvedPaths,
        queue: Arc<dyn WorkQueue>,
    ) -> Result<Self, ConfigError> {
        let renderer = build_renderer(settings)?;
        let max_duration = (settings.worker.max_duration_secs > 0)
            .then(|| Duration::from_secs(settings.worker.max_duration_secs));
        let worker = Self::new(
            queue,
            Arc::new(renderer),
            OutputMirror::new(
                &paths.watch_root,
                &paths.output_root,
                settings.output.hash_suffix,
            ),
            ErrorSink::new(
                &paths.error_dir,
                &paths.watch_root,
                settings.worker.copy_failed_inputs,
            ),
            PathStabilityTracker::from_config(&settings.watch),
        )
        .text_output(settings.output.text)
        .max_duration(max_duration)
        .poll_interval(Duration::from_millis(settings.worker.poll_interval_ms));
        Ok(worker)
    }

    /// Re-enqueue changed inputs through the watcher's deduplicator, so a
    /// state the watcher already queued is not queued twice.
    pub fn dedup(mut self, dedup: Arc<DispatchDeduplicator>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn text_output(mut self, enabled: bool) -> Self {
        self.write_text = enabled;
        self
    }

    /// Per-item limit; `None` for no limit.
    pub fn max_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    /// How long one `dequeue` waits before the shutdown flag is checked again.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process items until `shutdown` is set.
    ///
    /// Queue errors are logged and retried after the poll interval; they
    /// never end the loop.
    pub fn run(&self, shutdown: &AtomicBool) {
        crate::log_event!("worker", "started");
        while !shutdown.load(Ordering::Relaxed) {
            match self.queue.dequeue(self.poll_interval) {
                Ok(Some(delivery)) => {
                    self.handle(&delivery);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("[worker] dequeue failed: {e}");
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
        crate::log_event!("worker", "stopped");
    }

    /// Process items until the queue is empty, then return.
    pub fn drain(&self) -> WorkerStatsSnapshot {
        loop {
            match self.queue.dequeue(Duration::ZERO) {
                Ok(Some(delivery)) => {
                    self.handle(&delivery);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("[worker] dequeue failed: {e}");
                    break;
                }
            }
        }
        self.stats()
    }

    /// Process one delivery and acknowledge it.
    pub fn handle(&self, delivery: &Delivery) -> Outcome {
        let outcome = self.process(&delivery.item);
        if let Err(e) = self.queue.ack(delivery) {
            // Redelivered after the visibility timeout; outputs are overwritten
            tracing::warn!("[worker] ack failed for {}: {e}", delivery.item.path.display());
        }
        outcome
    }

    /// Process a file directly, bypassing the queue.
    pub fn process_path(&self, path: &Path) -> Outcome {
        match FileState::of(path) {
            Ok(state) => self.process(&WorkItem::new(path, state)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.finish(path, Outcome::Vanished)
            }
            Err(e) => {
                let error = ProcessError::from(RenderError::Input(e));
                self.fail(path, None, &error)
            }
        }
    }

    /// Take one item through the pipeline. Never panics and never returns
    /// an error: failures end up in the error sink.
    pub fn process(&self, item: &WorkItem) -> Outcome {
        let path = item.path.as_path();

        match FileState::of(path) {
            Ok(current) if current == item.state => {}
            Ok(_) => return self.resubmit(item),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.finish(path, Outcome::Vanished);
            }
            Err(e) => {
                let error = ProcessError::from(RenderError::Input(e));
                return self.fail(path, Some(item.state), &error);
            }
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.render_and_write(path)))
            .unwrap_or_else(|payload| Err(ProcessError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(outcome) => self.finish(path, outcome),
            Err(error) => self.fail(path, Some(item.state), &error),
        }
    }

    fn render_and_write(&self, path: &Path) -> Result<Outcome, ProcessError> {
        let deadline = match self.max_duration {
            Some(limit) => Deadline::new(limit),
            None => Deadline::unbounded(),
        };

        let document = self.renderer.render(path, &deadline)?;
        crate::debug_event!(
            "worker",
            "rendered",
            "{}: {} text-layer, {} recognized in {:.1}s",
            path.display(),
            document.count(PageDecision::TextLayer),
            document.count(PageDecision::Scan),
            deadline.elapsed().as_secs_f64()
        );

        let pdf = if self.write_pdf {
            Some(
                self.mirror
                    .write_pdf_with(path, |target| document.write_pdf(target))?,
            )
        } else {
            None
        };

        let text = if self.write_text {
            match self.mirror.write_text(path, &document.text()) {
                Ok(written) => Some(written),
                Err(e) => {
                    // Leave no half of a result behind
                    if let Some(pdf) = &pdf {
                        if let Err(remove) = std::fs::remove_file(pdf) {
                            tracing::warn!("[worker] cannot remove {}: {remove}", pdf.display());
                        }
                    }
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Outcome::Completed { text, pdf })
    }

    /// The input changed since it was queued: wait for it to settle and
    /// queue the new state instead of processing a moving target.
    fn resubmit(&self, item: &WorkItem) -> Outcome {
        let path = item.path.as_path();
        crate::debug_event!("worker", "stale", "{}", path.display());

        let outcome = match self.tracker.wait_blocking(path) {
            Stability::Stable(state) if state == item.state => {
                // Changed and changed back
                return self.process(item);
            }
            Stability::Stable(state) => self.requeue(path, state),
            Stability::TimedOut => Outcome::Deferred,
            Stability::Vanished => Outcome::Vanished,
        };
        self.finish(path, outcome)
    }

    fn requeue(&self, path: &Path, state: FileState) -> Outcome {
        if let Some(dedup) = &self.dedup {
            if !dedup.should_enqueue(path, state) {
                return Outcome::AlreadyQueued;
            }
        }
        match self.queue.enqueue(&WorkItem::new(path, state)) {
            Ok(()) => Outcome::Requeued,
            Err(e) => {
                if let Some(dedup) = &self.dedup {
                    dedup.forget_if(path, state);
                }
                tracing::warn!("[worker] cannot requeue {}: {e}", path.display());
                Outcome::Deferred
            }
        }
    }

    fn fail(&self, path: &Path, state: Option<FileState>, error: &ProcessError) -> Outcome {
        if let Err(e) = self.errors.record_failure(path, state, error) {
            tracing::error!(
                "[worker] cannot write failure record for {} ({error}): {e}",
                path.display()
            );
        }
        self.finish(path, Outcome::Failed(error.kind()))
    }

    fn finish(&self, path: &Path, outcome: Outcome) -> Outcome {
        match &outcome {
            Outcome::Completed { text, pdf } => {
                let written: Vec<String> = text
                    .iter()
                    .chain(pdf.iter())
                    .map(|p| p.display().to_string())
                    .collect();
                crate::log_event!(
                    "worker",
                    "completed",
                    "{} -> {}",
                    path.display(),
                    written.join(", ")
                );
            }
            Outcome::Failed(_) => {}
            Outcome::Requeued => crate::log_event!("worker", "requeued", "{}", path.display()),
            Outcome::AlreadyQueued => {
                crate::debug_event!("worker", "new state already queued", "{}", path.display())
            }
            Outcome::Vanished => crate::log_event!("worker", "vanished", "{}", path.display()),
            Outcome::Deferred => {
                crate::log_event!("worker", "still changing, deferred", "{}", path.display())
            }
        }
        self.stats.count(&outcome);
        outcome
    }
}

/// Renderer over the poppler and tesseract command-line tools.
pub fn build_renderer(settings: &Settings) -> Result<HybridRenderer, ConfigError> {
    let recognition = &settings.recognition;
    let timeout = Duration::from_secs(recognition.engine_timeout_secs.max(1));
    let languages = LanguageSet::new(&recognition.languages).map_err(|reason| {
        ConfigError::Invalid {
            setting: "recognition.languages",
            reason,
        }
    })?;

    Ok(HybridRenderer::new(
        Arc::new(PopplerBackend::new(recognition.poppler_dir.clone(), timeout)),
        Arc::new(TesseractEngine::new(&recognition.tesseract, timeout)),
        PageClassifier::new(recognition.text_min_chars),
        RenderOptions {
            dpi: recognition.dpi,
            languages,
            engine_options: EngineOptions::parse(&recognition.engine_options),
            want_pdf: settings.output.pdf,
            page_threads: recognition.page_threads.max(1),
        },
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
