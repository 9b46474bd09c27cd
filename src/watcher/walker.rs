//! Pruned recursive traversal of the watch root.
//!
//! Pruning happens top-down before a directory is entered:
//! - directories (and files) whose name is in the exclusion set are skipped,
//! - link-like directories (symlinks, junctions, mount points) are skipped
//!   unless `follow_links` is set.
//!
//! The walk is iterative (walkdir keeps an explicit stack), so pathologically
//! deep trees do not grow the native stack. Errors on one subtree are logged
//! and the walk carries on with the rest of the tree.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::path::{Component, Path};
use std::sync::Arc;

use walkdir::{DirEntry, WalkDir};

use crate::config::WatchConfig;
use crate::types::{EntryKind, TraversalEntry};

/// Walks a directory tree applying exclusion and link policies.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    /// Lowercased excluded names.
    excluded: Arc<HashSet<String>>,
    follow_links: bool,
}

impl TreeWalker {
    pub fn new<S: AsRef<str>>(excluded: impl IntoIterator<Item = S>, follow_links: bool) -> Self {
        Self {
            excluded: Arc::new(
                excluded
                    .into_iter()
                    .map(|name| name.as_ref().trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect(),
            ),
            follow_links,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(&config.excluded_names, config.follow_links)
    }

    pub fn follows_links(&self) -> bool {
        self.follow_links
    }

    /// Case-insensitive match against the exclusion set.
    pub fn is_excluded(&self, name: &OsStr) -> bool {
        self.excluded
            .contains(&name.to_string_lossy().to_lowercase())
    }

    /// Lazily walk `root`, yielding file and link entries.
    ///
    /// Directories are never yielded; their files are.
    pub fn walk(&self, root: &Path) -> impl Iterator<Item = TraversalEntry> + 'static {
        let walker = self.clone();
        let root_dev = device_of(root);

        WalkDir::new(root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_entry(move |entry| walker.keep(entry, root_dev))
            .filter_map(|result| match result {
                Ok(entry) => to_traversal_entry(&entry),
                Err(e) => {
                    let at = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::warn!("[walker] skipping unreadable entry at {at}: {e}");
                    None
                }
            })
    }

    /// Whether a notified `path` under `root` is visible under the pruning rules.
    ///
    /// Notification backends report paths anywhere below the watch, including
    /// inside excluded or linked directories; this applies the same policy the
    /// walk applies.
    pub fn admits(&self, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };

        let root_dev = device_of(root);
        let mut current = root.to_path_buf();
        for component in relative.components() {
            let Component::Normal(name) = component else {
                return false;
            };
            if self.is_excluded(name) {
                return false;
            }
            current.push(name);
            if !self.follow_links {
                match std::fs::symlink_metadata(&current) {
                    Ok(meta) => {
                        if is_link_like(&meta, root_dev) {
                            return false;
                        }
                    }
                    // Vanished; nothing to enqueue either way
                    Err(_) => return false,
                }
            }
        }
        true
    }

    /// Pruning decision for one entry, applied before descending.
    fn keep(&self, entry: &DirEntry, root_dev: Option<u64>) -> bool {
        if entry.depth() == 0 {
            return true;
        }

        if self.is_excluded(entry.file_name()) {
            crate::debug_event!("walker", "skip excluded", "{}", entry.path().display());
            return false;
        }

        if self.follow_links {
            return true;
        }

        let link_like = entry.path_is_symlink()
            || entry
                .metadata()
                .map(|meta| is_link_like(&meta, root_dev))
                // Unreadable metadata: do not risk descending
                .unwrap_or(true);
        if link_like {
            if entry.file_type().is_dir() || entry.path_is_symlink() {
                crate::log_event!("walker", "skip link-like", "{}", entry.path().display());
            }
            return false;
        }

        true
    }
}

fn to_traversal_entry(entry: &DirEntry) -> Option<TraversalEntry> {
    let file_type = entry.file_type();
    let kind = if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_symlink() {
        EntryKind::Link
    } else {
        // Directories, sockets, fifos and devices are not documents
        return None;
    };

    Some(TraversalEntry {
        path: entry.path().to_path_buf(),
        kind,
        depth: entry.depth(),
    })
}

/// Symlink, reparse point, or a directory on another device than the root.
fn is_link_like(meta: &Metadata, root_dev: Option<u64>) -> bool {
    if meta.file_type().is_symlink() || is_reparse_point(meta) {
        return true;
    }
    match (meta.is_dir(), root_dev, metadata_device(meta)) {
        (true, Some(root), Some(dev)) => root != dev,
        _ => false,
    }
}

#[cfg(windows)]
fn is_reparse_point(meta: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0400;
    meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0
}

#[cfg(not(windows))]
fn is_reparse_point(_meta: &Metadata) -> bool {
    false
}

#[cfg(unix)]
fn metadata_device(meta: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.dev())
}

#[cfg(not(unix))]
fn metadata_device(_meta: &Metadata) -> Option<u64> {
    None
}

fn device_of(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .and_then(|meta| metadata_device(&meta))
}
