use scraper::Html;
use tracing::{debug, info, warn};

use super::strategy::{ExtractionStrategy, SelectorStrategy};
use super::{ExtractedReview, PageExtractor};

/// Ordered fallback over extraction strategies. The first strategy that
/// matches anything decides the page; later ones are never consulted.
pub struct ContentExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_length: usize,
}

/// Outcome of one strategy when all of them are evaluated side by side.
#[derive(Debug)]
pub struct StrategyReport {
    pub name: String,
    pub matched: usize,
    pub samples: Vec<String>,
    pub error: Option<String>,
}

impl ContentExtractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, min_length: usize) -> Self {
        Self {
            strategies,
            min_length,
        }
    }

    pub fn from_selectors(selectors: &[String], min_length: usize) -> Self {
        let strategies = selectors
            .iter()
            .map(|css| Box::new(SelectorStrategy::new(css.as_str())) as Box<dyn ExtractionStrategy>)
            .collect();
        Self::new(strategies, min_length)
    }

    pub fn extract(&self, document: &Html) -> Vec<String> {
        for strategy in &self.strategies {
            match strategy.try_extract(document) {
                Ok(Some(blocks)) => {
                    let matched = blocks.len();
                    let kept: Vec<String> = blocks
                        .into_iter()
                        .map(|b| b.trim().to_string())
                        .filter(|b| !b.is_empty() && b.chars().count() >= self.min_length)
                        .collect();
                    info!(
                        "Found {} reviews using selector: {} ({} kept)",
                        matched,
                        strategy.name(),
                        kept.len()
                    );
                    return kept;
                }
                Ok(None) => debug!("No match for selector: {}", strategy.name()),
                Err(e) => warn!("Error with selector {}: {}", strategy.name(), e),
            }
        }
        Vec::new()
    }

    /// Evaluate every strategy without short-circuiting.
    pub fn diagnose(&self, document: &Html, sample_count: usize) -> Vec<StrategyReport> {
        self.strategies
            .iter()
            .map(|strategy| match strategy.try_extract(document) {
                Ok(found) => {
                    let found = found.unwrap_or_default();
                    StrategyReport {
                        name: strategy.name().to_string(),
                        matched: found.len(),
                        samples: found.into_iter().take(sample_count).collect(),
                        error: None,
                    }
                }
                Err(e) => StrategyReport {
                    name: strategy.name().to_string(),
                    matched: 0,
                    samples: Vec::new(),
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }
}

impl PageExtractor for ContentExtractor {
    fn extract_page(&self, html: &str) -> Vec<ExtractedReview> {
        let document = Html::parse_document(html);
        self.extract(&document)
            .into_iter()
            .map(|text| ExtractedReview { text, meta: None })
            .collect()
    }
}

// ── Tests ──
