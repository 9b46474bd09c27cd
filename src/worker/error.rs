//! Per-item failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::OutputError;
use crate::recognition::{EngineError, RenderError};

/// Why an item failed, as recorded in the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Extension the worker cannot process.
    Unsupported,
    /// The input could not be read.
    Input,
    /// Opening the document or extracting/rasterizing a page failed.
    Extraction,
    /// The recognition engine failed.
    Recognition,
    /// The engine or the whole item exceeded its time limit.
    Timeout,
    /// Writing an artifact failed.
    Output,
    /// Processing panicked.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Unsupported => "unsupported",
            FailureKind::Input => "input",
            FailureKind::Extraction => "extraction",
            FailureKind::Recognition => "recognition",
            FailureKind::Timeout => "timeout",
            FailureKind::Output => "output",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one work item.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Processing panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessError::Render(e) => match e {
                RenderError::Unsupported(_) => FailureKind::Unsupported,
                RenderError::Input(_) => FailureKind::Input,
                RenderError::Open(source) | RenderError::Extraction { source, .. } => {
                    if source.is_timeout() {
                        FailureKind::Timeout
                    } else {
                        FailureKind::Extraction
                    }
                }
                RenderError::Recognition {
                    source: EngineError::Timeout(_),
                    ..
                }
                | RenderError::TimedOut { .. } => FailureKind::Timeout,
                RenderError::Recognition { .. } | RenderError::MissingFragment { .. } => {
                    FailureKind::Recognition
                }
            },
            ProcessError::Output(_) => FailureKind::Output,
            ProcessError::Panicked(_) => FailureKind::Internal,
        }
    }

    /// Failing page index, when known.
    pub fn page(&self) -> Option<usize> {
        match self {
            ProcessError::Render(e) => e.page(),
            ProcessError::Output(_) | ProcessError::Panicked(_) => None,
        }
    }
}
