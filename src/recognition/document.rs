//! Document model shared by the extraction backend, the engine and the renderer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::extension_lower;

/// Image formats recognized directly, without page classification.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// What kind of input a path holds, judged by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Multi-page document, classified page by page.
    Pdf,
    /// A single raster image, always one scan page.
    Image,
}

impl InputKind {
    pub fn of(path: &Path) -> Option<Self> {
        let ext = extension_lower(path)?;
        if ext == "pdf" {
            Some(Self::Pdf)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else {
            None
        }
    }
}

/// Axis-aligned box in page coordinates, origin top-left, y growing down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn height(&self) -> f64 {
        (self.y_max - self.y_min).max(0.0)
    }

    /// Length of the vertical overlap with `other`.
    pub fn vertical_overlap(&self, other: &BoundingBox) -> f64 {
        (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0)
    }
}

/// One block of embedded text with its position on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BoundingBox,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// Per-page classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageDecision {
    /// Trust the embedded text and copy the page verbatim.
    TextLayer,
    /// Rasterize and recognize.
    Scan,
}

/// Encoded raster handed to the recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub data: Vec<u8>,
    /// File extension of the encoding, e.g. `png`.
    pub format: String,
    /// Resolution it was rendered at; `None` for images taken as-is.
    pub dpi: Option<u32>,
}

/// A single-page searchable PDF produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFragment(pub Vec<u8>);

impl PdfFragment {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
