//! Hybrid rendering of one input document.
//!
//! PDF pages are classified one by one. Text-layer pages keep their original
//! content (their blocks only feed the text artifact); scan pages are
//! rasterized at the configured resolution and recognized. Images skip
//! classification and go to the engine whole.
//!
//! Any page failure fails the whole document. No partial output is produced;
//! the error names the lowest failing page.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use super::backend::{AssemblyPage, BackendError, PdfBackend, PdfDocument};
use super::classifier::PageClassifier;
use super::document::{InputKind, PageDecision, PdfFragment, RasterImage};
use super::engine::{EngineError, EngineOptions, LanguageSet, RecognitionEngine};
use super::layout::reading_order;
use super::normalize::TextNormalizer;
use crate::types::extension_lower;
use crate::worker::{Deadline, DeadlineExceeded};

/// Errors from rendering one document.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Unsupported input type '{0}'")]
    Unsupported(String),

    #[error("Cannot read input: {0}")]
    Input(#[source] std::io::Error),

    #[error(transparent)]
    Open(BackendError),

    #[error("Page {page}: {source}")]
    Extraction {
        page: usize,
        #[source]
        source: BackendError,
    },

    #[error("Page {page}: {source}")]
    Recognition {
        page: usize,
        #[source]
        source: EngineError,
    },

    #[error("Page {page}: engine returned no searchable PDF")]
    MissingFragment { page: usize },

    #[error("Processing time limit reached before page {page}")]
    TimedOut { page: usize },
}

impl RenderError {
    /// Index of the failing page, when the failure belongs to one.
    pub fn page(&self) -> Option<usize> {
        match self {
            RenderError::Extraction { page, .. }
            | RenderError::Recognition { page, .. }
            | RenderError::MissingFragment { page }
            | RenderError::TimedOut { page } => Some(*page),
            RenderError::Unsupported(_) | RenderError::Input(_) | RenderError::Open(_) => None,
        }
    }
}

impl From<DeadlineExceeded> for RenderError {
    fn from(e: DeadlineExceeded) -> Self {
        RenderError::TimedOut { page: e.page }
    }
}

/// Knobs for one renderer.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub languages: LanguageSet,
    pub engine_options: EngineOptions,
    /// Ask the engine for searchable PDF fragments.
    pub want_pdf: bool,
    /// Scan pages recognized concurrently; 1 is sequential.
    pub page_threads: usize,
}

/// One page of the result, in original position.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub index: usize,
    pub decision: PageDecision,
    /// Normalized page text.
    pub text: String,
    /// Recognized page, present for scan pages when PDF output was requested.
    pub fragment: Option<PdfFragment>,
}

/// A fully rendered document, ready to be written out.
pub struct RenderedDocument {
    pub kind: InputKind,
    pub pages: Vec<RenderedPage>,
    /// Source handle for verbatim page copies.
    source: Option<Box<dyn PdfDocument>>,
}

impl std::fmt::Debug for RenderedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedDocument")
            .field("kind", &self.kind)
            .field("pages", &self.pages.len())
            .finish()
    }
}

impl RenderedDocument {
    /// Text artifact content: page texts in order, separated by a blank line.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn count(&self, decision: PageDecision) -> usize {
        self.pages.iter().filter(|p| p.decision == decision).count()
    }

    /// Write the searchable PDF to `target`.
    ///
    /// Text-layer pages are copied from the source; scan pages are spliced in
    /// from their recognized fragments at their original positions.
    pub fn write_pdf(&self, target: &Path) -> Result<(), BackendError> {
        match (&self.source, self.kind) {
            (Some(source), InputKind::Pdf) => {
                let mut parts = Vec::with_capacity(self.pages.len());
                for page in &self.pages {
                    parts.push(match (page.decision, &page.fragment) {
                        (PageDecision::TextLayer, _) => AssemblyPage::Original(page.index),
                        (PageDecision::Scan, Some(fragment)) => AssemblyPage::Fragment(fragment),
                        (PageDecision::Scan, None) => {
                            return Err(BackendError::Assemble(format!(
                                "page {} has no recognized PDF",
                                page.index
                            )));
                        }
                    });
                }
                source.assemble(&parts, target)
            }
            _ => {
                let fragment = self
                    .pages
                    .first()
                    .and_then(|page| page.fragment.as_ref())
                    .ok_or_else(|| BackendError::Assemble("image has no recognized PDF".to_string()))?;
                std::fs::write(target, fragment.as_bytes())?;
                Ok(())
            }
        }
    }
}

/// Executes per-page decisions and assembles the result in page order.
pub struct HybridRenderer {
    backend: Arc<dyn PdfBackend>,
    engine: Arc<dyn RecognitionEngine>,
    classifier: PageClassifier,
    normalizer: TextNormalizer,
    options: RenderOptions,
    pool: Option<rayon::ThreadPool>,
}

impl HybridRenderer {
    pub fn new(
        backend: Arc<dyn PdfBackend>,
        engine: Arc<dyn RecognitionEngine>,
        classifier: PageClassifier,
        options: RenderOptions,
    ) -> Self {
        let pool = if options.page_threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(options.page_threads)
                .thread_name(|i| format!("ocr-page-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!("[render] page pool unavailable, recognizing sequentially: {e}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            backend,
            engine,
            classifier,
            normalizer: TextNormalizer::new(),
            options,
            pool,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Render the document at `path`.
    ///
    /// `deadline` is checked at every page boundary.
    pub fn render(&self, path: &Path, deadline: &Deadline) -> Result<RenderedDocument, RenderError> {
        match InputKind::of(path) {
            Some(InputKind::Pdf) => self.render_pdf(path, deadline),
            Some(InputKind::Image) => self.render_image(path, deadline),
            None => Err(RenderError::Unsupported(
                extension_lower(path).unwrap_or_else(|| "(none)".to_string()),
            )),
        }
    }

    fn render_image(&self, path: &Path, deadline: &Deadline) -> Result<RenderedDocument, RenderError> {
        deadline.check(0)?;
        let image = RasterImage {
            data: std::fs::read(path).map_err(RenderError::Input)?,
            format: extension_lower(path).unwrap_or_else(|| "png".to_string()),
            dpi: None,
        };

        crate::debug_event!("render", "image", "{}", path.display());
        let page = self.recognize(0, &image)?;
        Ok(RenderedDocument {
            kind: InputKind::Image,
            pages: vec![page],
            source: None,
        })
    }

    fn render_pdf(&self, path: &Path, deadline: &Deadline) -> Result<RenderedDocument, RenderError> {
        let doc = self.backend.open(path).map_err(RenderError::Open)?;
        let page_count = doc.page_count();
        if page_count == 0 {
            return Err(RenderError::Open(BackendError::Open {
                path: path.to_path_buf(),
                reason: "document has no pages".to_string(),
            }));
        }

        let mut pages: Vec<Option<RenderedPage>> = Vec::with_capacity(page_count);
        let mut scans = Vec::new();
        for index in 0..page_count {
            deadline.check(index)?;
            let blocks = doc
                .text_blocks(index)
                .map_err(|source| RenderError::Extraction { page: index, source })?;

            match self.classifier.classify(&blocks) {
                PageDecision::TextLayer => {
                    let text = reading_order(blocks)
                        .iter()
                        .map(|block| self.normalizer.normalize(&block.text))
                        .filter(|text| !text.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    pages.push(Some(RenderedPage {
                        index,
                        decision: PageDecision::TextLayer,
                        text,
                        fragment: None,
                    }));
                }
                PageDecision::Scan => {
                    scans.push(index);
                    pages.push(None);
                }
            }
        }

        crate::log_event!(
            "render",
            "classified",
            "{}: {page_count} pages, {} to recognize",
            path.display(),
            scans.len()
        );

        let doc_ref: &dyn PdfDocument = doc.as_ref();
        let recognized: Vec<Result<RenderedPage, RenderError>> = match &self.pool {
            Some(pool) if scans.len() > 1 => pool.install(|| {
                scans
                    .par_iter()
                    .map(|&index| self.scan_page(doc_ref, index, deadline))
                    .collect()
            }),
            _ => {
                let mut results = Vec::with_capacity(scans.len());
                for &index in &scans {
                    let result = self.scan_page(doc_ref, index, deadline);
                    let failed = result.is_err();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                results
            }
        };

        // Results are in page order, so the first error is the lowest page
        for result in recognized {
            let page = result?;
            let index = page.index;
            pages[index] = Some(page);
        }

        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| page.ok_or(RenderError::TimedOut { page: index }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RenderedDocument {
            kind: InputKind::Pdf,
            pages,
            source: Some(doc),
        })
    }

    fn scan_page(
        &self,
        doc: &dyn PdfDocument,
        index: usize,
        deadline: &Deadline,
    ) -> Result<RenderedPage, RenderError> {
        deadline.check(index)?;
        let image = doc
            .rasterize(index, self.options.dpi)
            .map_err(|source| RenderError::Extraction { page: index, source })?;
        self.recognize(index, &image)
    }

    fn recognize(&self, index: usize, image: &RasterImage) -> Result<RenderedPage, RenderError> {
        let recognition = self
            .engine
            .recognize(
                image,
                &self.options.languages,
                &self.options.engine_options,
                self.options.want_pdf,
            )
            .map_err(|source| RenderError::Recognition { page: index, source })?;

        if self.options.want_pdf && recognition.pdf.is_none() {
            return Err(RenderError::MissingFragment { page: index });
        }

        Ok(RenderedPage {
            index,
            decision: PageDecision::Scan,
            text: self.normalizer.normalize(&recognition.text),
            fragment: recognition.pdf,
        })
    }
}
