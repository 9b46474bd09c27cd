//! Detection of files that are still being written.
//!
//! Documents are usually picked up while the copy that creates them is still
//! running. A candidate is sampled (size, modified time) every step; it is
//! stable once the required number of consecutive samples agree. A candidate
//! that never settles within the retry budget is skipped for this pass and
//! picked up again by the next notification or re-scan, never forced through.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::config::WatchConfig;
use crate::types::FileState;

/// Outcome of waiting for a candidate to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stability {
    /// The file held still for the required number of samples.
    Stable(FileState),
    /// The retry budget ran out while the file was still changing.
    TimedOut,
    /// The file disappeared while being observed.
    Vanished,
}

/// Samples candidate files until they settle.
#[derive(Debug, Clone)]
pub struct PathStabilityTracker {
    samples: u32,
    retries: u32,
    step: Duration,
}

impl PathStabilityTracker {
    /// `samples` consecutive identical observations, at most `retries`
    /// re-samples, `step` apart.
    pub fn new(samples: u32, retries: u32, step: Duration) -> Self {
        Self {
            samples: samples.max(2),
            retries,
            step,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(
            config.stable_samples,
            config.stabilize_retries,
            Duration::from_millis(config.stabilize_step_ms),
        )
    }

    /// Wait for `path` to settle without blocking the runtime.
    ///
    /// Only the calling task waits; other candidates proceed concurrently.
    pub async fn wait(&self, path: &Path) -> Stability {
        let mut observation = Observation::new(self.samples);
        if let Some(done) = observation.observe(FileState::of(path)) {
            return done;
        }
        for _ in 0..self.retries {
            tokio::time::sleep(self.step).await;
            if let Some(done) = observation.observe(FileState::of(path)) {
                return done;
            }
        }
        Stability::TimedOut
    }

    /// Blocking variant for worker threads.
    pub fn wait_blocking(&self, path: &Path) -> Stability {
        let mut observation = Observation::new(self.samples);
        if let Some(done) = observation.observe(FileState::of(path)) {
            return done;
        }
        for _ in 0..self.retries {
            std::thread::sleep(self.step);
            if let Some(done) = observation.observe(FileState::of(path)) {
                return done;
            }
        }
        Stability::TimedOut
    }
}

/// Running count of consecutive identical samples.
#[derive(Debug)]
struct Observation {
    required: u32,
    last: Option<FileState>,
    streak: u32,
}

impl Observation {
    fn new(required: u32) -> Self {
        Self {
            required,
            last: None,
            streak: 0,
        }
    }

    /// Feed one sample; returns the verdict once there is one.
    fn observe(&mut self, sample: io::Result<FileState>) -> Option<Stability> {
        match sample {
            Ok(state) => {
                if self.last == Some(state) {
                    self.streak += 1;
                } else {
                    self.last = Some(state);
                    self.streak = 1;
                }
                (self.streak >= self.required).then_some(Stability::Stable(state))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Some(Stability::Vanished),
            Err(e) => {
                // Locked or momentarily inaccessible: counts as a change
                crate::debug_event!("stability", "sample failed", "{e}");
                self.last = None;
                self.streak = 0;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn state(size: u64) -> FileState {
        FileState {
            size,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(size),
        }
    }

    #[test]
    fn test_observation_needs_consecutive_matches() {
        let mut obs = Observation::new(3);
        assert_eq!(obs.observe(Ok(state(1))), None);
        assert_eq!(obs.observe(Ok(state(1))), None);
        // A change restarts the streak
        assert_eq!(obs.observe(Ok(state(2))), None);
        assert_eq!(obs.observe(Ok(state(2))), None);
        assert_eq!(obs.observe(Ok(state(2))), Some(Stability::Stable(state(2))));
    }

    #[test]
    fn test_observation_transient_error_resets() {
        let mut obs = Observation::new(2);
        assert_eq!(obs.observe(Ok(state(1))), None);
        let locked = io::Error::new(io::ErrorKind::PermissionDenied, "locked");
        assert_eq!(obs.observe(Err(locked)), None);
        assert_eq!(obs.observe(Ok(state(1))), None);
        assert_eq!(obs.observe(Ok(state(1))), Some(Stability::Stable(state(1))));
    }

    #[test]
    fn test_observation_missing_file_vanishes() {
        let mut obs = Observation::new(2);
        let gone = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(obs.observe(Err(gone)), Some(Stability::Vanished));
    }

    #[test]
    fn test_blocking_wait_on_settled_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.pdf");
        fs::write(&path, b"%PDF-1.7").unwrap();

        let tracker = PathStabilityTracker::new(2, 5, Duration::from_millis(10));
        match tracker.wait_blocking(&path) {
            Stability::Stable(st) => assert_eq!(st.size, 8),
            other => panic!("expected stable, got {other:?}"),
        }
    }

    #[test]
    fn test_blocking_wait_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let tracker = PathStabilityTracker::new(2, 5, Duration::from_millis(10));
        assert_eq!(
            tracker.wait_blocking(&dir.path().join("missing.pdf")),
            Stability::Vanished
        );
    }

    #[tokio::test]
    async fn test_growing_file_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("copying.pdf");
        fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            for _ in 0..200 {
                let mut f = OpenOptions::new().append(true).open(&writer_path).unwrap();
                f.write_all(b"more bytes").unwrap();
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        // Three samples 20ms apart cannot see two equal sizes while the writer runs
        let tracker = PathStabilityTracker::new(2, 2, Duration::from_millis(20));
        assert_eq!(tracker.wait(&path).await, Stability::TimedOut);
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_wait_returns_final_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.pdf");
        fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            for _ in 0..10 {
                let mut f = OpenOptions::new().append(true).open(&writer_path).unwrap();
                f.write_all(b"0123456789").unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let tracker = PathStabilityTracker::new(2, 50, Duration::from_millis(100));
        let outcome = tracker.wait(&path).await;
        writer.join().unwrap();
        assert_eq!(outcome, Stability::Stable(FileState::of(&path).unwrap()));
        assert_eq!(FileState::of(&path).unwrap().size, 101);
    }
}
