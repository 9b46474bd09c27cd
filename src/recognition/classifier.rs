//! Text-layer trust decision per page.
//!
//! The rule is a character-count threshold over the page's extracted blocks.
//! It ignores layout quality and garbled encodings; sparse but genuine text
//! layers (a form with a handful of printed words) fall below the threshold
//! and are recognized from the image instead. The threshold is an operator
//! setting (`recognition.text_min_chars`).

use super::document::{PageDecision, TextBlock};

#[derive(Debug, Clone, Copy)]
pub struct PageClassifier {
    min_chars: usize,
}

impl PageClassifier {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// `TextLayer` iff the trimmed blocks hold at least `min_chars` characters.
    pub fn classify(&self, blocks: &[TextBlock]) -> PageDecision {
        if text_chars(blocks) >= self.min_chars {
            PageDecision::TextLayer
        } else {
            PageDecision::Scan
        }
    }
}

/// Characters across all blocks, each block trimmed first.
pub fn text_chars(blocks: &[TextBlock]) -> usize {
    blocks.iter().map(|b| b.text.trim().chars().count()).sum()
}
