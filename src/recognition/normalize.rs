//! Cleanup of extracted and recognized text before it is written out.
//!
//! Steps, in order:
//! 1. line endings to `\n`, every other whitespace variant (tab, NBSP, the
//!    Unicode spaces) to a plain space
//! 2. a word broken by a hyphen at a line end is joined back together
//! 3. a single line break becomes a space; two or more become one paragraph
//!    break (`\n\n`)
//! 4. runs of spaces collapse to one; the result is trimmed
//!
//! The output contains no character the steps would change again, so
//! normalizing twice equals normalizing once.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

static HYPHEN_BREAK: OnceLock<Regex> = OnceLock::new();
static LINE_BREAKS: OnceLock<Regex> = OnceLock::new();
static SPACE_RUN: OnceLock<Regex> = OnceLock::new();

fn hyphen_break() -> &'static Regex {
    HYPHEN_BREAK.get_or_init(|| Regex::new(r"(\w)-[ ]*\n[ ]*(\w)").expect("static pattern"))
}

fn line_breaks() -> &'static Regex {
    LINE_BREAKS.get_or_init(|| Regex::new(r"[ ]*\n(?:[ ]*\n)*[ ]*").expect("static pattern"))
}

fn space_run() -> &'static Regex {
    SPACE_RUN.get_or_init(|| Regex::new(r" {2,}").expect("static pattern"))
}

/// Paragraph-preserving text normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer;

impl TextNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, text: &str) -> String {
        normalize(text)
    }
}

/// Normalize `text`; see the module docs for the rules.
pub fn normalize(text: &str) -> String {
    let mut text = unify_whitespace(text);

    // A join can expose the next break ("a-\nb-\nc"), so repeat until stable
    loop {
        match hyphen_break().replace_all(&text, "${1}${2}") {
            Cow::Owned(joined) => text = joined,
            Cow::Borrowed(_) => break,
        }
    }

    let text = line_breaks().replace_all(&text, |caps: &Captures| {
        if caps[0].matches('\n').count() > 1 {
            "\n\n"
        } else {
            " "
        }
    });
    let text = space_run().replace_all(&text, " ");

    text.trim().to_string()
}

fn unify_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\n' | '\u{2028}' | '\u{2029}' => out.push('\n'),
            c if c.is_whitespace() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
