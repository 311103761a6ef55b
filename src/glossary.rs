//! Glossary preservation.
//!
//! Protected terms are wrapped in `<span translate="no">` before text goes to a
//! provider; both supported providers leave such spans untouched when called in
//! HTML mode. The wrapper is stripped from the translated text afterwards.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

pub const MARKER_OPEN: &str = r#"<span translate="no">"#;
pub const MARKER_CLOSE: &str = "</span>";

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span\s+translate\s*=\s*["']no["']\s*>(.*?)</span\s*>"#)
        .expect("marker pattern is valid")
});

/// Compiled matcher for one tenant's preserve list
#[derive(Debug, Clone)]
pub struct Glossary {
    pattern: Regex,
}

impl Glossary {
    /// `None` when there is nothing to preserve
    pub fn new(terms: &[String]) -> Option<Self> {
        let mut terms: Vec<&str> = terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return None;
        }

        // Longest first so "Acme Cloud" wins over "Acme" at the same position
        terms.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        });
        terms.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

        let alternatives = terms
            .iter()
            .map(|term| bounded(term))
            .collect::<Vec<_>>()
            .join("|");

        match Regex::new(&format!("(?i)(?:{})", alternatives)) {
            Ok(pattern) => Some(Self { pattern }),
            Err(e) => {
                warn!("Glossary with {} terms could not be compiled: {}", terms.len(), e);
                None
            }
        }
    }

    /// Wrap every occurrence of a preserved term, keeping its original casing
    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &regex::Captures| {
                format!("{}{}{}", MARKER_OPEN, &caps[0], MARKER_CLOSE)
            })
            .into_owned()
    }
}

// Word boundaries only make sense next to word characters ("C++" ends in a symbol)
fn bounded(term: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let escaped = regex::escape(term);
    let start = if term.chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let end = if term.chars().last().is_some_and(is_word) { r"\b" } else { "" };
    format!("{}{}{}", start, escaped, end)
}

/// Wrap preserved terms in `text`; returns the input unchanged for an empty list
pub fn apply_glossary(text: &str, terms: &[String]) -> String {
    match Glossary::new(terms) {
        Some(glossary) => glossary.apply(text),
        None => text.to_string(),
    }
}

/// Strip preservation markers, keeping the protected text
pub fn remove_glossary_markers(text: &str) -> String {
    if !has_markers(text) {
        return text.to_string();
    }
    MARKER_PATTERN.replace_all(text, "$1").into_owned()
}

pub fn has_markers(text: &str) -> bool {
    MARKER_PATTERN.is_match(text)
}

/// Escape masked text for a provider running in HTML mode.
///
/// Everything except the markers themselves is entity-escaped, protected
/// terms included, so literal `<`, `&` and quotes survive the round trip.
pub fn to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in MARKER_PATTERN.captures_iter(text) {
        let (Some(whole), Some(term)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&escape_html(&text[last..whole.start()]));
        out.push_str(MARKER_OPEN);
        out.push_str(&escape_html(term.as_str()));
        out.push_str(MARKER_CLOSE);
        last = whole.end();
    }
    out.push_str(&escape_html(&text[last..]));
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
