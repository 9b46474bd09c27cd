//! Work and Process commands.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, bail};

use super::{open_queue, resolve};
use crate::config::Settings;
use crate::queue::MemoryQueue;
use crate::worker::{Outcome, RecognitionWorker, WorkerStatsSnapshot};

/// Run work command - consume the queue with `threads` workers.
///
/// Without `once`, runs until Ctrl-C; items being processed are finished first.
pub async fn run_work(settings: &Settings, threads: Option<usize>, once: bool) -> anyhow::Result<()> {
    let paths = resolve(settings)?;
    let queue = open_queue(settings, &paths.queue_dir)?;
    let threads = threads.unwrap_or(settings.worker.threads).max(1);
    let worker = Arc::new(RecognitionWorker::from_settings(settings, &paths, queue)?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(threads);
    for i in 0..threads {
        let worker = Arc::clone(&worker);
        let shutdown = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name(format!("ocr-worker-{i}"))
            .spawn(move || {
                if once {
                    worker.drain();
                } else {
                    worker.run(&shutdown);
                }
            })
            .context("Cannot start worker thread")?;
        handles.push(handle);
    }

    if !once {
        tokio::signal::ctrl_c()
            .await
            .context("Cannot listen for shutdown signal")?;
        crate::log_event!("work", "shutting down", "finishing items in progress");
        shutdown.store(true, Ordering::Relaxed);
    }

    let joined = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .map(|handle| handle.join().is_ok())
            .fold(true, |all, ok| all && ok)
    })
    .await
    .context("Worker threads could not be joined")?;
    if !joined {
        tracing::error!("[work] a worker thread panicked");
    }

    print_stats(&worker.stats());
    Ok(())
}

/// Run process command - recognize one file in the foreground.
pub fn run_process(settings: &Settings, file: &Path) -> anyhow::Result<()> {
    let paths = resolve(settings)?;
    let file = file
        .canonicalize()
        .with_context(|| format!("Cannot open {}", file.display()))?;
    if !file.starts_with(&paths.watch_root) {
        eprintln!(
            "Warning: {} is outside the watch root, outputs go to the top of {}",
            file.display(),
            paths.output_root.display()
        );
    }

    // Stale inputs are re-queued here and dropped with the process
    let worker = RecognitionWorker::from_settings(settings, &paths, Arc::new(MemoryQueue::new()))?;
    match worker.process_path(&file) {
        Outcome::Completed { text, pdf } => {
            for artifact in text.iter().chain(pdf.iter()) {
                println!("{}", artifact.display());
            }
            Ok(())
        }
        Outcome::Failed(kind) => bail!(
            "{} failed ({kind}), see the record in {}",
            file.display(),
            paths.error_dir.display()
        ),
        Outcome::Requeued | Outcome::AlreadyQueued | Outcome::Deferred => {
            bail!("{} is still being written, try again later", file.display())
        }
        Outcome::Vanished => bail!("{} disappeared", file.display()),
    }
}

fn print_stats(stats: &WorkerStatsSnapshot) {
    println!(
        "Processed {} documents: {} failed, {} requeued, {} skipped",
        stats.completed + stats.failed,
        stats.failed,
        stats.requeued,
        stats.skipped
    );
}
