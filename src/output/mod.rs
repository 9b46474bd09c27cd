//! Writing results: mirrored output artifacts and failure records.

pub mod error_sink;
pub mod mirror;

pub use error_sink::{ErrorSink, FailureRecord};
pub use mirror::{ArtifactKind, OutputError, OutputMirror, write_atomic};
