//! PDF access: text extraction, page rasterization, output assembly.
//!
//! The renderer only talks to the [`PdfBackend`] / [`PdfDocument`] traits.
//! [`PopplerBackend`] implements them over the poppler command-line tools:
//! `pdfinfo`, `pdftotext -bbox-layout`, `pdftoppm`, `pdfseparate` and
//! `pdfunite`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tempfile::TempDir;
use thiserror::Error;

use super::document::{BoundingBox, PdfFragment, RasterImage, TextBlock};
use crate::tools::{self, ToolError};

/// Errors from the PDF backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Cannot open document {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("Text extraction failed: {0}")]
    Extract(String),

    #[error("Rasterization failed: {0}")]
    Rasterize(String),

    #[error("Assembling output failed: {0}")]
    Assemble(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::TimedOut(_))
    }
}

/// One page of the assembled output document.
#[derive(Debug, Clone, Copy)]
pub enum AssemblyPage<'a> {
    /// Page `n` of the source, copied as-is.
    Original(usize),
    /// A recognized page produced by the engine.
    Fragment(&'a PdfFragment),
}

/// Opens documents.
pub trait PdfBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError>;
}

/// An opened document.
pub trait PdfDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Text blocks of page `page` (0-based), in extraction order.
    fn text_blocks(&self, page: usize) -> Result<Vec<TextBlock>, BackendError>;

    /// Render page `page` to an image at `dpi`.
    fn rasterize(&self, page: usize, dpi: u32) -> Result<RasterImage, BackendError>;

    /// Write a new document made of `pages`, in order, to `target`.
    ///
    /// Original pages are copied without re-rendering.
    fn assemble(&self, pages: &[AssemblyPage<'_>], target: &Path) -> Result<(), BackendError>;
}

/// Poppler utilities backend.
#[derive(Debug, Clone)]
pub struct PopplerBackend {
    /// Directory holding the tools; `None` searches PATH.
    tool_dir: Option<PathBuf>,
    timeout: Duration,
}

impl PopplerBackend {
    pub fn new(tool_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self { tool_dir, timeout }
    }

    fn tool(&self, name: &str) -> PathBuf {
        tools::locate(self.tool_dir.as_deref(), name)
    }

    /// Names of the poppler tools this backend needs, with availability.
    pub fn probe(&self) -> Vec<(&'static str, bool)> {
        ["pdfinfo", "pdftotext", "pdftoppm", "pdfseparate", "pdfunite"]
            .into_iter()
            .map(|name| (name, tools::available(&self.tool(name), "-v")))
            .collect()
    }
}

impl PdfBackend for PopplerBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
        let open_err = |e: ToolError| BackendError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let info = tools::run(Command::new(self.tool("pdfinfo")).arg(path), self.timeout)
            .map_err(open_err)?;
        let page_count = parse_page_count(&String::from_utf8_lossy(&info.stdout)).ok_or_else(|| {
            BackendError::Open {
                path: path.to_path_buf(),
                reason: "pdfinfo reported no page count".to_string(),
            }
        })?;

        Ok(Box::new(PopplerDocument {
            backend: self.clone(),
            path: path.to_path_buf(),
            page_count,
            layout: OnceLock::new(),
        }))
    }
}

struct PopplerDocument {
    backend: PopplerBackend,
    path: PathBuf,
    page_count: usize,
    /// Blocks of every page, extracted on first use.
    layout: OnceLock<Result<Vec<Vec<TextBlock>>, String>>,
}

impl PopplerDocument {
    fn check_page(&self, page: usize) -> Result<(), BackendError> {
        if page < self.page_count {
            Ok(())
        } else {
            Err(BackendError::PageOutOfRange {
                page,
                count: self.page_count,
            })
        }
    }

    fn extract_layout(&self) -> Result<Vec<Vec<TextBlock>>, String> {
        let output = tools::run(
            Command::new(self.backend.tool("pdftotext"))
                .args(["-bbox-layout", "-enc", "UTF-8"])
                .arg(&self.path)
                .arg("-"),
            self.backend.timeout,
        )
        .map_err(|e| e.to_string())?;
        Ok(parse_bbox_layout(&String::from_utf8_lossy(&output.stdout)))
    }

    fn map_tool_error(e: ToolError, wrap: fn(String) -> BackendError) -> BackendError {
        match e {
            ToolError::TimedOut { .. } => BackendError::TimedOut(e.to_string()),
            other => wrap(other.to_string()),
        }
    }
}

impl PdfDocument for PopplerDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn text_blocks(&self, page: usize) -> Result<Vec<TextBlock>, BackendError> {
        self.check_page(page)?;
        let pages = self
            .layout
            .get_or_init(|| self.extract_layout())
            .as_ref()
            .map_err(|e| BackendError::Extract(e.clone()))?;
        // Pages without a text layer may be missing from the output
        Ok(pages.get(page).cloned().unwrap_or_default())
    }

    fn rasterize(&self, page: usize, dpi: u32) -> Result<RasterImage, BackendError> {
        self.check_page(page)?;
        let scratch = TempDir::new()?;
        let prefix = scratch.path().join("page");
        let number = (page + 1).to_string();
        let resolution = dpi.to_string();

        tools::run(
            Command::new(self.backend.tool("pdftoppm"))
                .args(["-f", number.as_str(), "-l", number.as_str()])
                .args(["-r", resolution.as_str()])
                .args(["-png", "-singlefile"])
                .arg(&self.path)
                .arg(&prefix),
            self.backend.timeout,
        )
        .map_err(|e| Self::map_tool_error(e, BackendError::Rasterize))?;

        Ok(RasterImage {
            data: fs::read(prefix.with_extension("png"))?,
            format: "png".to_string(),
            dpi: Some(dpi),
        })
    }

    fn assemble(&self, pages: &[AssemblyPage<'_>], target: &Path) -> Result<(), BackendError> {
        if pages.is_empty() {
            return Err(BackendError::Assemble("no pages to assemble".to_string()));
        }

        let scratch = TempDir::new()?;
        let mut parts = Vec::with_capacity(pages.len());
        for (position, page) in pages.iter().enumerate() {
            let part = scratch.path().join(format!("part-{position:06}.pdf"));
            match page {
                AssemblyPage::Original(n) => {
                    self.check_page(*n)?;
                    let number = (n + 1).to_string();
                    tools::run(
                        Command::new(self.backend.tool("pdfseparate"))
                            .args(["-f", number.as_str(), "-l", number.as_str()])
                            .arg(&self.path)
                            .arg(&part),
                        self.backend.timeout,
                    )
                    .map_err(|e| Self::map_tool_error(e, BackendError::Assemble))?;
                }
                AssemblyPage::Fragment(fragment) => fs::write(&part, fragment.as_bytes())?,
            }
            parts.push(part);
        }

        if let [single] = parts.as_slice() {
            fs::copy(single, target)?;
            return Ok(());
        }

        tools::run(
            Command::new(self.backend.tool("pdfunite"))
                .args(&parts)
                .arg(target),
            self.backend.timeout,
        )
        .map_err(|e| Self::map_tool_error(e, BackendError::Assemble))?;
        Ok(())
    }
}

fn parse_page_count(pdfinfo: &str) -> Option<usize> {
    pdfinfo
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

struct BboxPatterns {
    page: Regex,
    block: Regex,
    line: Regex,
    word: Regex,
}

fn bbox_patterns() -> &'static BboxPatterns {
    static PATTERNS: OnceLock<BboxPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| BboxPatterns {
        page: Regex::new(r"(?s)<page\b[^>]*>(.*?)</page>").expect("static pattern"),
        block: Regex::new(
            r#"(?s)<block xMin="([-\d.]+)" yMin="([-\d.]+)" xMax="([-\d.]+)" yMax="([-\d.]+)">(.*?)</block>"#,
        )
        .expect("static pattern"),
        line: Regex::new(r"(?s)<line\b[^>]*>(.*?)</line>").expect("static pattern"),
        word: Regex::new(r"(?s)<word\b[^>]*>(.*?)</word>").expect("static pattern"),
    })
}

/// Parse `pdftotext -bbox-layout` XHTML into per-page blocks.
///
/// Words of a line are joined with spaces, lines of a block with newlines.
fn parse_bbox_layout(xhtml: &str) -> Vec<Vec<TextBlock>> {
    let patterns = bbox_patterns();

    patterns
        .page
        .captures_iter(xhtml)
        .map(|page| {
            patterns
                .block
                .captures_iter(&page[1])
                .map(|block| {
                    let coord = |i: usize| block[i].parse::<f64>().unwrap_or(0.0);
                    let text = patterns
                        .line
                        .captures_iter(&block[5])
                        .map(|line| {
                            patterns
                                .word
                                .captures_iter(&line[1])
                                .map(|word| unescape(&word[1]))
                                .collect::<Vec<_>>()
                                .join(" ")
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    TextBlock::new(text, BoundingBox::new(coord(1), coord(2), coord(3), coord(4)))
                })
                .collect()
        })
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<body>
<doc>
  <page width="612.000000" height="792.000000">
    <flow>
      <block xMin="72.000000" yMin="70.500000" xMax="300.250000" yMax="98.000000">
        <line xMin="72.000000" yMin="70.500000" xMax="300.250000" yMax="82.000000">
          <word xMin="72.000000" yMin="70.500000" xMax="110.000000" yMax="82.000000">Invoice</word>
          <word xMin="112.000000" yMin="70.500000" xMax="150.000000" yMax="82.000000">#42</word>
        </line>
        <line xMin="72.000000" yMin="86.000000" xMax="200.000000" yMax="98.000000">
          <word xMin="72.000000" yMin="86.000000" xMax="200.000000" yMax="98.000000">A&amp;B&lt;C&gt;</word>
        </line>
      </block>
    </flow>
  </page>
  <page width="612.000000" height="792.000000">
  </page>
</doc>
</body>
</html>"#;

    #[test]
    fn test_parse_bbox_layout() {
        let pages = parse_bbox_layout(SAMPLE);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 1);
        assert_eq!(pages[0][0].text, "Invoice #42\nA&B<C>");
        assert_eq!(pages[0][0].bbox, BoundingBox::new(72.0, 70.5, 300.25, 98.0));
        assert!(pages[1].is_empty());
    }

    #[test]
    fn test_parse_page_count() {
        let info = "Title:          scan\nProducer:       x\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(info), Some(12));
        assert_eq!(parse_page_count("garbage"), None);
    }

    #[test]
    fn test_unescape_amp_last() {
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }
}
