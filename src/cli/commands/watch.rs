//! Watch and Scan commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;

use super::{open_queue, resolve};
use crate::config::{ResolvedPaths, Settings};
use crate::queue::WorkQueue;
use crate::watcher::{WatchService, WatchServiceBuilder, WatchStatsSnapshot};
use crate::worker::RecognitionWorker;

fn build_service(
    settings: &Settings,
    paths: &ResolvedPaths,
    queue: Arc<dyn WorkQueue>,
) -> anyhow::Result<WatchService> {
    WatchServiceBuilder::from_config(&settings.watch)
        .root(&paths.watch_root)
        .queue(queue)
        .build()
        .context("Cannot start watch service")
}

/// Run watch command - watch until Ctrl-C, optionally with in-process workers.
pub async fn run_watch(settings: &Settings, workers: usize) -> anyhow::Result<()> {
    let paths = resolve(settings)?;
    let queue = open_queue(settings, &paths.queue_dir)?;
    let service = build_service(settings, &paths, Arc::clone(&queue))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(workers);
    if workers > 0 {
        let worker = Arc::new(
            RecognitionWorker::from_settings(settings, &paths, queue)?.dedup(service.dedup()),
        );
        for i in 0..workers {
            let worker = Arc::clone(&worker);
            let shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name(format!("ocr-worker-{i}"))
                .spawn(move || worker.run(&shutdown))
                .context("Cannot start worker thread")?;
            handles.push(handle);
        }
        crate::log_event!("watch", "workers", "{workers} in-process");
    }

    let result = service.run().await;

    // In-flight items finish before the process exits
    shutdown.store(true, Ordering::Relaxed);
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("[watch] worker thread panicked");
        }
    }
    result.context("Watch service failed")
}

/// Run scan command - one full pass, then exit.
pub async fn run_scan(settings: &Settings) -> anyhow::Result<()> {
    let paths = resolve(settings)?;
    let queue = open_queue(settings, &paths.queue_dir)?;
    let service = build_service(settings, &paths, queue)?;

    let stats = service.scan_once().await;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &WatchStatsSnapshot) {
    println!(
        "Scanned {} candidates: {} enqueued, {} already queued, {} still changing, {} unsupported",
        stats.candidates, stats.enqueued, stats.duplicates, stats.unstable, stats.unsupported
    );
    if stats.enqueue_failures > 0 {
        eprintln!("Warning: {} items could not be enqueued", stats.enqueue_failures);
    }
}
