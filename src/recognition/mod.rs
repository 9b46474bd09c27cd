//! Hybrid text-layer / OCR recognition of one document.
//!
//! ```text
//! PdfBackend ──> PageClassifier ──┬─ TEXT_LAYER ─> reading order ─> verbatim page
//!                                 └─ SCAN ───────> rasterize ─> RecognitionEngine
//!                                                          │
//!                              TextNormalizer <── text ────┴── PdfFragment ──> assembly
//! ```

pub mod backend;
pub mod classifier;
pub mod document;
pub mod engine;
pub mod layout;
pub mod normalize;
pub mod render;

pub use backend::{AssemblyPage, BackendError, PdfBackend, PdfDocument, PopplerBackend};
pub use classifier::PageClassifier;
pub use document::{
    BoundingBox, IMAGE_EXTENSIONS, InputKind, PageDecision, PdfFragment, RasterImage, TextBlock,
};
pub use engine::{
    EngineError, EngineOptions, LanguageSet, Recognition, RecognitionEngine, TesseractEngine,
};
pub use normalize::TextNormalizer;
pub use render::{HybridRenderer, RenderError, RenderOptions, RenderedDocument, RenderedPage};
