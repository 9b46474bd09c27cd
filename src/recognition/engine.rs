//! Recognition engine seam and the tesseract adapter.
//!
//! The engine is an opaque blocking call: raster image, language set and
//! options in; recognized text and, on request, a single-page searchable PDF
//! out. It is never cancelled mid-call; the adapter bounds each call with a
//! timeout instead.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;

use super::document::{PdfFragment, RasterImage};
use crate::tools::{self, ToolError};

/// Errors from a recognition call.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Recognition timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Recognition engine is unavailable: {0}")]
    Unavailable(String),

    #[error("Recognition failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check one language code: `[A-Za-z0-9_]` segments joined by `+`.
pub fn validate_language(lang: &str) -> Result<(), String> {
    let valid = !lang.is_empty()
        && lang.split('+').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(format!(
            "'{lang}' is not a valid language code (expected e.g. 'eng' or 'rus+eng')"
        ))
    }
}

/// Languages passed to the engine, e.g. `rus+eng`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSet(Vec<String>);

impl LanguageSet {
    pub fn new<S: AsRef<str>>(languages: impl IntoIterator<Item = S>) -> Result<Self, String> {
        let mut codes = Vec::new();
        for lang in languages {
            let lang = lang.as_ref().trim();
            validate_language(lang)?;
            codes.extend(lang.split('+').map(str::to_string));
        }
        if codes.is_empty() {
            return Err("at least one language is required".to_string());
        }
        Ok(Self(codes))
    }

    pub fn codes(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("+"))
    }
}

/// Extra engine arguments, whitespace separated (`--psm 6 --oem 1`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions(Vec<String>);

impl EngineOptions {
    pub fn parse(options: &str) -> Self {
        Self(options.split_whitespace().map(str::to_string).collect())
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }
}

/// Result of recognizing one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
    pub pdf: Option<PdfFragment>,
}

/// The external OCR engine.
pub trait RecognitionEngine: Send + Sync {
    /// Recognize `image`. With `want_pdf`, a single-page searchable PDF must
    /// be returned as well.
    fn recognize(
        &self,
        image: &RasterImage,
        languages: &LanguageSet,
        options: &EngineOptions,
        want_pdf: bool,
    ) -> Result<Recognition, EngineError>;
}

/// Tesseract command-line adapter.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    program: PathBuf,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        tools::available(&self.program, "--version")
    }

    /// Installed language packs, from `tesseract --list-langs`.
    pub fn installed_languages(&self) -> Result<Vec<String>, EngineError> {
        let output = tools::run(
            Command::new(&self.program).arg("--list-langs"),
            Duration::from_secs(30),
        )
        .map_err(|e| self.map_error(e))?;
        // Older versions print the list on stderr
        let listing = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&listing)
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn map_error(&self, e: ToolError) -> EngineError {
        match e {
            ToolError::TimedOut { after, .. } => EngineError::Timeout(after),
            ToolError::NotFound { .. } | ToolError::Spawn { .. } => {
                EngineError::Unavailable(e.to_string())
            }
            ToolError::Failed { .. } => EngineError::Failed(e.to_string()),
        }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn recognize(
        &self,
        image: &RasterImage,
        languages: &LanguageSet,
        options: &EngineOptions,
        want_pdf: bool,
    ) -> Result<Recognition, EngineError> {
        let scratch = TempDir::new()?;
        let input = scratch.path().join(format!("input.{}", image.format));
        let base = scratch.path().join("output");
        fs::write(&input, &image.data)?;

        let mut command = Command::new(&self.program);
        command
            .arg(&input)
            .arg(&base)
            .arg("-l")
            .arg(languages.to_string());
        if let Some(dpi) = image.dpi {
            command.arg("--dpi").arg(dpi.to_string());
        }
        command.args(options.args()).arg("txt");
        if want_pdf {
            command.arg("pdf");
        }

        tools::run(&mut command, self.timeout).map_err(|e| self.map_error(e))?;

        let text = fs::read_to_string(base.with_extension("txt"))?;
        let pdf = if want_pdf {
            Some(PdfFragment(fs::read(base.with_extension("pdf"))?))
        } else {
            None
        };

        Ok(Recognition { text, pdf })
    }
}
