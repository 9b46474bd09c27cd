//! Core types shared by the watcher, the queue and the workers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Snapshot of a file's size and modification time.
///
/// Two snapshots of the same path compare equal when the file has not been
/// written between them. A file whose snapshot holds still across the
/// stabilization window is considered fully written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileState {
    pub size: u64,
    pub modified: SystemTime,
}

impl FileState {
    /// Read the current state of `path`, following links.
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            modified: meta.modified()?,
        })
    }
}

/// One document ready to be processed.
///
/// Identity is the pair (path, state): the same path with a different state
/// is a different work item, because the file changed and must be redone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub path: PathBuf,
    pub state: FileState,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>, state: FileState) -> Self {
        Self {
            path: path.into(),
            state,
        }
    }

    /// Stable content key for this (path, state) pair.
    ///
    /// Used by the spool queue for file names; identical items map to the same key.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(self.state.size.to_le_bytes());
        let nanos = self
            .state
            .modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        hasher.update(nanos.to_le_bytes());
        short_hex(&hasher.finalize(), 16)
    }

    /// Lowercased extension of the input, if any.
    pub fn extension(&self) -> Option<String> {
        extension_lower(&self.path)
    }
}

/// Kind of a filesystem entry seen during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Symbolic link, junction, mount point or other reparse-style redirect.
    Link,
}

/// A filesystem entry produced by the tree walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub depth: usize,
}

/// Lowercased file extension without the leading dot.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// First `chars` hex digits of a digest.
pub(crate) fn short_hex(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}
