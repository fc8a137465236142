use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;

/// Rating labels the listing markup glues onto review text ("RATED 4.0 ...").
static RATING_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(?:RATED|Rated)\s").unwrap());

/// One review as collected from a listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub source_identifier: String,
    pub page: u32,
    pub raw_text: String,
    pub collected_at: DateTime<Utc>,
    /// Only the payload extractor knows more than the text.
    pub meta: Option<ReviewMeta>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewMeta {
    pub review_id: Option<String>,
    pub author: Option<String>,
    pub rating: Option<String>,
    pub posted_at: Option<String>,
    pub experience: Option<String>,
    pub like_count: u64,
    pub comment_count: u64,
    pub review_url: Option<String>,
}

impl ReviewRecord {
    pub fn text_len(&self) -> usize {
        self.raw_text.chars().count()
    }
}

/// Drop records that are too short, whitespace-only, or carry no letters.
pub fn validate(records: Vec<ReviewRecord>, min_length: usize) -> Vec<ReviewRecord> {
    let before = records.len();
    let valid: Vec<ReviewRecord> = records
        .into_iter()
        .filter(|r| is_valid_text(&r.raw_text, min_length))
        .collect();
    info!("Filtered {} invalid reviews", before - valid.len());
    valid
}

/// Measured on the normalized form: dedup rewrites survivors to that form, and
/// they must still clear `min_length` afterwards.
fn is_valid_text(text: &str, min_length: usize) -> bool {
    let normalized = clean_review_text(text);
    if normalized.is_empty() || normalized.chars().count() < min_length {
        return false;
    }
    normalized.chars().any(char::is_alphabetic)
}

/// Keep the first record for each distinct text, normalizing survivors in place.
///
/// The key is the normalized text, so two inputs that only differed in
/// whitespace or rating artifacts cannot both survive.
pub fn deduplicate(records: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
    let before = records.len();
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(records.len());

    for mut record in records {
        let cleaned = clean_review_text(&record.raw_text);
        if cleaned.is_empty() || !seen.insert(cleaned.clone()) {
            continue;
        }
        record.raw_text = cleaned;
        unique.push(record);
    }

    info!("Removed {} duplicate reviews", before - unique.len());
    unique
}

/// Collapse whitespace runs and strip rating-label tokens.
pub fn clean_review_text(text: &str) -> String {
    let collapsed = collapse_ws(text);
    // Artifacts can be adjacent ("RATED Rated ..."), so strip until stable.
    let mut current = collapsed;
    loop {
        let stripped = RATING_PREFIX_RE.replace_all(&current, " ");
        let next = collapse_ws(&stripped);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ──
