//! Shared fixtures for the integration tests.
//!
//! `FakeBackend` opens "PDF" fixtures that are JSON page descriptions, so page
//! classification and assembly can be asserted without poppler. `FakeEngine`
//! stands in for tesseract and records every call.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use ocrdrop::recognition::{
    AssemblyPage, BackendError, BoundingBox, EngineError, EngineOptions, HybridRenderer,
    LanguageSet, PageClassifier, PdfBackend, PdfDocument, PdfFragment, RasterImage, Recognition,
    RecognitionEngine, RenderOptions, TextBlock,
};

/// One page of a fixture document: its text-layer blocks, top to bottom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturePage {
    pub blocks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDocument {
    pub pages: Vec<FixturePage>,
}

/// Write a fixture "PDF" whose pages carry the given text layers.
pub fn write_fixture_pdf(path: &Path, pages: &[&[&str]]) {
    let doc = FixtureDocument {
        pages: pages
            .iter()
            .map(|blocks| FixturePage {
                blocks: blocks.iter().map(|b| b.to_string()).collect(),
            })
            .collect(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_vec(&doc).unwrap()).unwrap();
}

/// The assembled output: one entry per page, `original:<n>` or the fragment text.
pub fn read_assembled(path: &Path) -> Vec<String> {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[derive(Debug, Default)]
pub struct FakeBackend;

impl PdfBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
        let bytes = fs::read(path)?;
        let doc: FixtureDocument =
            serde_json::from_slice(&bytes).map_err(|e| BackendError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(FakeDocument { doc }))
    }
}

struct FakeDocument {
    doc: FixtureDocument,
}

impl FakeDocument {
    fn page(&self, page: usize) -> Result<&FixturePage, BackendError> {
        self.doc.pages.get(page).ok_or(BackendError::PageOutOfRange {
            page,
            count: self.doc.pages.len(),
        })
    }
}

impl PdfDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.doc.pages.len()
    }

    fn text_blocks(&self, page: usize) -> Result<Vec<TextBlock>, BackendError> {
        Ok(self
            .page(page)?
            .blocks
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let top = 100.0 * i as f64;
                TextBlock::new(text.clone(), BoundingBox::new(50.0, top, 500.0, top + 40.0))
            })
            .collect())
    }

    fn rasterize(&self, page: usize, dpi: u32) -> Result<RasterImage, BackendError> {
        self.page(page)?;
        Ok(RasterImage {
            data: format!("page-{page}").into_bytes(),
            format: "png".to_string(),
            dpi: Some(dpi),
        })
    }

    fn assemble(&self, pages: &[AssemblyPage<'_>], target: &Path) -> Result<(), BackendError> {
        let parts: Vec<String> = pages
            .iter()
            .map(|page| match page {
                AssemblyPage::Original(n) => format!("original:{n}"),
                AssemblyPage::Fragment(fragment) => {
                    String::from_utf8_lossy(fragment.as_bytes()).into_owned()
                }
            })
            .collect();
        fs::write(target, serde_json::to_vec(&parts).unwrap())?;
        Ok(())
    }
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub image: String,
    pub dpi: Option<u32>,
    pub languages: String,
}

/// Recognizes an image as `recognized <image bytes>`.
#[derive(Debug, Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    /// Images whose bytes contain this marker time out.
    timeout_on: Option<String>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timing_out_on(marker: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            timeout_on: Some(marker.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }
}

impl RecognitionEngine for FakeEngine {
    fn recognize(
        &self,
        image: &RasterImage,
        languages: &LanguageSet,
        _options: &EngineOptions,
        want_pdf: bool,
    ) -> Result<Recognition, EngineError> {
        let content = String::from_utf8_lossy(&image.data).into_owned();
        self.calls.lock().push(EngineCall {
            image: content.clone(),
            dpi: image.dpi,
            languages: languages.to_string(),
        });

        if let Some(marker) = &self.timeout_on {
            if content.contains(marker.as_str()) {
                return Err(EngineError::Timeout(Duration::from_secs(900)));
            }
        }

        Ok(Recognition {
            text: format!("recognized\n{content}"),
            pdf: want_pdf.then(|| PdfFragment(format!("ocr:{content}").into_bytes())),
        })
    }
}

pub const TEST_DPI: u32 = 300;
pub const TEST_MIN_CHARS: usize = 16;

pub fn renderer(engine: Arc<FakeEngine>, page_threads: usize) -> HybridRenderer {
    HybridRenderer::new(
        Arc::new(FakeBackend),
        engine,
        PageClassifier::new(TEST_MIN_CHARS),
        RenderOptions {
            dpi: TEST_DPI,
            languages: LanguageSet::new(["rus+eng"]).unwrap(),
            engine_options: EngineOptions::parse("--psm 6"),
            want_pdf: true,
            page_threads,
        },
    )
}
