//! Failure records for items that could not be processed.
//!
//! Each failure produces a JSON record in the error directory, named after
//! the input (`<safe name>_<path hash>.json`), so a repeated failure of the
//! same input replaces its previous record. Inputs stay where they are;
//! an operator fixes the cause and re-touches the file to retry. With
//! `worker.copy_failed_inputs` a copy of the input is kept next to the record.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::mirror::{path_hash, write_atomic};
use crate::types::FileState;
use crate::worker::{FailureKind, ProcessError};

const RECORD_EXT: &str = "json";

/// Diagnostic record of one failed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub input: PathBuf,
    /// Input path relative to the watch root, when it is under it.
    pub relative: Option<PathBuf>,
    pub kind: FailureKind,
    pub detail: String,
    pub page: Option<usize>,
    pub failed_at: DateTime<Utc>,
    /// File state the item was enqueued with.
    pub state: Option<FileState>,
    /// Copy of the input kept alongside the record.
    pub copy: Option<PathBuf>,
}

/// Writes and lists failure records.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    dir: PathBuf,
    watch_root: PathBuf,
    copy_inputs: bool,
}

impl ErrorSink {
    pub fn new(dir: impl Into<PathBuf>, watch_root: impl Into<PathBuf>, copy_inputs: bool) -> Self {
        Self {
            dir: dir.into(),
            watch_root: watch_root.into(),
            copy_inputs,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record the failure of `input` and return the record path.
    pub fn record_failure(
        &self,
        input: &Path,
        state: Option<FileState>,
        error: &ProcessError,
    ) -> std::io::Result<PathBuf> {
        self.record(input, state, error.kind(), &error.to_string(), error.page())
    }

    pub fn record(
        &self,
        input: &Path,
        state: Option<FileState>,
        kind: FailureKind,
        detail: &str,
        page: Option<usize>,
    ) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let base = format!("{}_{}", safe_name(input), path_hash(input));

        let copy = if self.copy_inputs {
            let ext = input
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let target = self.dir.join(format!("{base}{ext}"));
            match fs::copy(input, &target) {
                Ok(_) => Some(target),
                Err(e) => {
                    tracing::warn!("[errors] cannot copy {}: {e}", input.display());
                    None
                }
            }
        } else {
            None
        };

        let record = FailureRecord {
            input: input.to_path_buf(),
            relative: input
                .strip_prefix(&self.watch_root)
                .ok()
                .map(Path::to_path_buf),
            kind,
            detail: detail.to_string(),
            page,
            failed_at: Utc::now(),
            state,
            copy,
        };

        let path = self.dir.join(format!("{base}.{RECORD_EXT}"));
        let json = serde_json::to_vec_pretty(&record).map_err(std::io::Error::other)?;
        write_atomic(&path, &json)?;

        tracing::error!(
            "[errors] {} failed ({kind}{}): {detail} -> {}",
            input.display(),
            page.map(|p| format!(", page {p}")).unwrap_or_default(),
            path.display()
        );
        Ok(path)
    }

    /// All readable records, newest first.
    pub fn list(&self) -> std::io::Result<Vec<FailureRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records: Vec<FailureRecord> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXT))
            .filter_map(|path| {
                let parsed = fs::read(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()));
                match parsed {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!("[errors] skipping unreadable record {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect();
        records.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(records)
    }
}

/// File name with everything outside `[A-Za-z0-9._-]` replaced by `_`.
fn safe_name(path: &Path) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static pattern"));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    unsafe_chars.replace_all(&name, "_").into_owned()
}
