use std::path::PathBuf;
use thiserror::Error;

/// Setup and event-stream failures of the watch service.
///
/// Per-file problems never surface here; they are logged and picked up again
/// by the next pass.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch service setup failed: {reason}")]
    InitFailed { reason: String },

    #[error("{path} cannot be used as the watch root: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Notifications for {path} are unavailable: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Notification stream ended")]
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        let reason = e.to_string();
        match e.paths.into_iter().next() {
            Some(path) => WatchError::PathWatchFailed { path, reason },
            None => WatchError::InitFailed { reason },
        }
    }
}
