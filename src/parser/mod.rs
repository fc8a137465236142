pub mod extractor;
pub mod payload;
pub mod strategy;

use crate::config::{ExtractionMode, ScraperConfig};
use crate::review::ReviewMeta;
use extractor::ContentExtractor;
use payload::PayloadExtractor;

/// Review text found on one page, plus whatever metadata the source exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReview {
    pub text: String,
    pub meta: Option<ReviewMeta>,
}

/// Turns one fetched listing page into reviews. Never fails: a page that
/// cannot be understood simply yields nothing.
pub trait PageExtractor: Send + Sync {
    fn extract_page(&self, html: &str) -> Vec<ExtractedReview>;
}

pub fn build_extractor(config: &ScraperConfig) -> Box<dyn PageExtractor> {
    match config.mode {
        ExtractionMode::Markup => Box::new(ContentExtractor::from_selectors(
            &config.selectors,
            config.min_review_length,
        )),
        ExtractionMode::Payload => Box::new(PayloadExtractor::new()),
    }
}
