//! Running the external command-line tools (poppler utilities, tesseract).
//!
//! Every invocation is bounded by a timeout. The child's output pipes are
//! drained on helper threads so a chatty tool cannot block on a full pipe
//! while we wait for it.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Interval between exit checks of a running child.
const POLL_STEP: Duration = Duration::from_millis(25);

/// Errors from running an external tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("'{program}' was not found, is it installed and on PATH?")]
    NotFound { program: String },

    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {}s", after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("'{program}' failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Captured result of a successful run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Path of `name` inside `dir`, or the bare name for a PATH lookup.
pub fn locate(dir: Option<&Path>, name: &str) -> PathBuf {
    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Run `command` to completion, killing it after `timeout`.
///
/// A non-zero exit status is an error carrying the tool's stderr.
pub fn run(command: &mut Command, timeout: Duration) -> Result<ToolOutput, ToolError> {
    let program = command.get_program().to_string_lossy().into_owned();
    crate::debug_event!("tools", "run", "{command:?}");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound {
                    program: program.clone(),
                }
            } else {
                ToolError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_timeout(&mut child, timeout).map_err(|source| ToolError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = join_drain(stdout);
    let stderr = join_drain(stderr);

    match status {
        None => Err(ToolError::TimedOut {
            program,
            after: timeout,
        }),
        Some(status) if status.success() => Ok(ToolOutput { stdout, stderr }),
        Some(status) => Err(ToolError::Failed {
            program,
            status,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        }),
    }
}

/// Whether `program` can be started at all.
pub fn available(program: &Path, version_flag: &str) -> bool {
    Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// `Ok(None)` when the deadline passed; the child has been killed and reaped.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // Already exited between the checks is fine
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(POLL_STEP);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
