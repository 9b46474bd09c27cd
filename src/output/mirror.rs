//! Input path → output path mapping and atomic artifact writes.
//!
//! `<watch_root>/a/b/scan.pdf` maps to `<output_root>/a/b/scan.txt` and
//! `<output_root>/a/b/scan.pdf`. Directory mirroring already keeps
//! same-named files from different folders apart; the optional path-hash
//! suffix (`scan_1a2b3c4d.txt`) also separates inputs in one folder that
//! differ only by extension.
//!
//! Artifacts are written to a temporary file in the destination directory and
//! renamed into place, so readers never see a partial file. Intermediate
//! directories are created as needed and left in place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::recognition::BackendError;
use crate::types::short_hex;

/// Errors writing an artifact.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot produce {path}: {source}")]
    Assemble {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

/// Kind of output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Text,
    Pdf,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Text => "txt",
            ArtifactKind::Pdf => "pdf",
        }
    }
}

/// Maps inputs under the watch root into the output root.
#[derive(Debug, Clone)]
pub struct OutputMirror {
    watch_root: PathBuf,
    output_root: PathBuf,
    hash_suffix: bool,
}

impl OutputMirror {
    pub fn new(watch_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>, hash_suffix: bool) -> Self {
        Self {
            watch_root: watch_root.into(),
            output_root: output_root.into(),
            hash_suffix,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory of `input` relative to the watch root.
    ///
    /// Inputs outside the watch root map to the output root itself.
    pub fn relative_dir(&self, input: &Path) -> PathBuf {
        match input.parent().map(|dir| dir.strip_prefix(&self.watch_root)) {
            Some(Ok(relative)) => relative.to_path_buf(),
            _ => {
                crate::debug_event!("mirror", "outside watch root", "{}", input.display());
                PathBuf::new()
            }
        }
    }

    /// Output file stem, with the path-hash suffix when enabled.
    pub fn output_stem(&self, input: &Path) -> String {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        if self.hash_suffix {
            format!("{stem}_{}", path_hash(input))
        } else {
            stem
        }
    }

    pub fn output_path(&self, input: &Path, kind: ArtifactKind) -> PathBuf {
        self.output_root
            .join(self.relative_dir(input))
            .join(format!("{}.{}", self.output_stem(input), kind.extension()))
    }

    /// Atomically write the text artifact for `input`.
    pub fn write_text(&self, input: &Path, text: &str) -> Result<PathBuf, OutputError> {
        let target = self.output_path(input, ArtifactKind::Text);
        write_atomic(&target, text.as_bytes()).map_err(|source| OutputError::Io {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }

    /// Atomically produce the PDF artifact for `input` with `produce`, which
    /// writes the complete document to the path it is given.
    pub fn write_pdf_with(
        &self,
        input: &Path,
        produce: impl FnOnce(&Path) -> Result<(), BackendError>,
    ) -> Result<PathBuf, OutputError> {
        let target = self.output_path(input, ArtifactKind::Pdf);
        let io_err = |source| OutputError::Io {
            path: target.clone(),
            source,
        };

        let staged = staging_file(&target).map_err(io_err)?;
        produce(staged.path()).map_err(|source| OutputError::Assemble {
            path: target.clone(),
            source,
        })?;
        staged.persist(&target).map_err(|e| io_err(e.error))?;
        Ok(target)
    }
}

/// Write `bytes` to `target` via a temporary file and a rename.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut staged = staging_file(target)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Temporary file next to `target`, creating the directory chain first.
fn staging_file(target: &Path) -> std::io::Result<NamedTempFile> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    tempfile::Builder::new()
        .prefix(".ocrdrop-")
        .suffix(".part")
        .tempfile_in(dir)
}

/// First 8 hex digits of SHA-256 over the path.
pub(crate) fn path_hash(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    short_hex(&digest, 8)
}
