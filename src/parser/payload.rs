use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ExtractedReview, PageExtractor};
use crate::review::ReviewMeta;

/// `window.__PRELOADED_STATE__ = JSON.parse("<escaped json>");`
static STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)window\.__PRELOADED_STATE__\s*=\s*JSON\.parse\("((?:[^"\\]|\\.)*)"\)"#)
        .unwrap()
});

/// Reads reviews out of the serialized store the site ships for hydration,
/// instead of scraping the rendered markup.
#[derive(Default)]
pub struct PayloadExtractor;

impl PayloadExtractor {
    pub fn new() -> Self {
        Self
    }

    /// The decoded state blob, or `None` when the page carries none.
    pub fn parse_state(&self, html: &str) -> Result<Option<Value>> {
        let Some(caps) = STATE_RE.captures(html) else {
            return Ok(None);
        };
        let json = unescape_js_string(&caps[1]);
        let state = serde_json::from_str(&json).context("Preloaded state is not valid JSON")?;
        Ok(Some(state))
    }

    pub fn reviews_from_state(&self, state: &Value) -> Vec<ExtractedReview> {
        let Some(entities) = state
            .get("entities")
            .and_then(|e| e.get("REVIEWS"))
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };

        entities
            .values()
            .filter(|r| r.get("status").and_then(Value::as_str) == Some("success"))
            .filter_map(project_review)
            .collect()
    }
}

impl PageExtractor for PayloadExtractor {
    fn extract_page(&self, html: &str) -> Vec<ExtractedReview> {
        match self.parse_state(html) {
            Ok(Some(state)) => {
                let reviews = self.reviews_from_state(&state);
                debug!("Preloaded state yielded {} reviews", reviews.len());
                reviews
            }
            Ok(None) => {
                debug!("No preloaded state found");
                Vec::new()
            }
            Err(e) => {
                warn!("{:#}", e);
                Vec::new()
            }
        }
    }
}

fn project_review(entry: &Value) -> Option<ExtractedReview> {
    let text = entry
        .get("reviewText")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return None;
    }

    let meta = ReviewMeta {
        review_id: scalar(entry, "reviewId"),
        author: scalar(entry, "userName"),
        rating: scalar(entry, "ratingV2"),
        posted_at: scalar(entry, "timestamp"),
        experience: scalar(entry, "experience"),
        like_count: count(entry, "likeCount"),
        comment_count: count(entry, "commentCount"),
        review_url: scalar(entry, "reviewUrl"),
    };

    Some(ExtractedReview {
        text: text.to_string(),
        meta: Some(meta),
    })
}

/// Strings and numbers as text; empty strings and everything else as absent.
fn scalar(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count(entry: &Value, key: &str) -> u64 {
    match entry.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Decode a JS double-quoted string body. JSON string rules cover what the
/// site emits; anything else falls back to undoing the two common escapes.
fn unescape_js_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw))
        .unwrap_or_else(|_| raw.replace("\\\"", "\"").replace("\\\\", "\\"))
}

// ── Tests ──
