use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

/// One way of locating review text in a parsed listing page.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when nothing matched, so the next strategy gets a turn.
    /// `Ok(Some(_))` carries the raw text of every matched element.
    fn try_extract(&self, document: &Html) -> Result<Option<Vec<String>>>;
}

/// A single CSS selector. Parsed at evaluation time, so a malformed selector
/// only takes itself out of the chain.
pub struct SelectorStrategy {
    css: String,
}

impl SelectorStrategy {
    pub fn new(css: impl Into<String>) -> Self {
        Self { css: css.into() }
    }
}

impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &str {
        &self.css
    }

    fn try_extract(&self, document: &Html) -> Result<Option<Vec<String>>> {
        let selector = Selector::parse(&self.css)
            .map_err(|e| anyhow!("invalid selector `{}`: {}", self.css, e))?;

        let texts: Vec<String> = document.select(&selector).map(element_text).collect();
        if texts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(texts))
        }
    }
}

/// Text nodes of an element, each trimmed, joined with single spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ──
