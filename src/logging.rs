//! Logging setup for the watcher and the workers.
//!
//! Compact timestamped output on stderr with per-module level configuration,
//! plus an optional daily-rolling diagnostic log file when `paths.log_dir`
//! is configured. `RUST_LOG` overrides the configured levels.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! watcher = "debug"
//! ```

use std::path::Path;
use std::sync::Once;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// File name prefix of the rolling diagnostic log.
pub const LOG_FILE_PREFIX: &str = "ocrdrop.log";

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let mut filter_str = config.default.clone();
        for (module, level) in &config.modules {
            filter_str.push_str(&format!(",{module}={level}"));
        }
        EnvFilter::new(&filter_str)
    }
}

/// Initialize logging.
///
/// Call once at startup; later calls are no-ops. When `log_dir` is given the
/// returned guard must be held for the life of the process, dropping it
/// flushes and closes the file writer.
pub fn init_with_config(config: &LoggingConfig, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let mut guard = None;

    INIT.call_once(|| {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(build_filter(config));

        let file_layer = log_dir.and_then(|dir| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Cannot create log directory {}: {e}", dir.display());
                return None;
            }
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(build_filter(config)),
            )
        });

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
    });

    guard
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "enqueued", "{}", path.display());
/// log_event!("worker", "started");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("watcher", "duplicate", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
