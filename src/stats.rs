use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::review::ReviewRecord;

const POSITIVE_WORDS: [&str; 10] = [
    "good", "great", "excellent", "amazing", "delicious", "tasty", "awesome", "wonderful",
    "fantastic", "perfect",
];
const NEGATIVE_WORDS: [&str; 9] = [
    "bad", "poor", "terrible", "awful", "disappointing", "horrible", "worst", "pathetic",
    "disgusting",
];

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-z]{3,}\b").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierCount {
    pub identifier: String,
    pub count: usize,
}

/// The `<output stem>_stats.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_reviews: usize,
    pub distinct_identifiers: usize,
    pub avg_reviews_per_identifier: f64,
    pub avg_review_length: f64,
    pub median_review_length: f64,
    pub min_review_length: usize,
    pub max_review_length: usize,
    pub top_identifiers: Vec<IdentifierCount>,
    pub generated_at: DateTime<Utc>,
}

impl SummaryStats {
    pub fn compute(records: &[ReviewRecord], top_n: usize) -> Self {
        let mut lengths: Vec<usize> = records.iter().map(ReviewRecord::text_len).collect();
        lengths.sort_unstable();

        let per_identifier = identifier_counts(records);
        let total = records.len();
        let distinct = per_identifier.len();

        Self {
            total_reviews: total,
            distinct_identifiers: distinct,
            avg_reviews_per_identifier: round2(ratio(total as f64, distinct)),
            avg_review_length: round2(ratio(lengths.iter().sum::<usize>() as f64, total)),
            median_review_length: round2(quantile(&lengths, 0.5)),
            min_review_length: lengths.first().copied().unwrap_or(0),
            max_review_length: lengths.last().copied().unwrap_or(0),
            top_identifiers: per_identifier.into_iter().take(top_n).collect(),
            generated_at: Utc::now(),
        }
    }
}

/// Per-identifier record counts, count desc then identifier asc.
pub fn identifier_counts(records: &[ReviewRecord]) -> Vec<IdentifierCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for r in records {
        *counts.entry(r.source_identifier.as_str()).or_default() += 1;
    }
    let mut sorted: Vec<IdentifierCount> = counts
        .into_iter()
        .map(|(identifier, count)| IdentifierCount {
            identifier: identifier.to_string(),
            count,
        })
        .collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.identifier.cmp(&b.identifier)));
    sorted
}

pub fn write_stats(path: &Path, stats: &SummaryStats) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    fs::write(path, json).with_context(|| format!("Failed writing stats to {}", path.display()))
}

/// Linear interpolation between closest ranks; `sorted` must be ascending.
pub fn quantile(sorted: &[usize], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
}

fn ratio(num: f64, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num / den as f64
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ── Keyword analysis ──

#[derive(Debug, Default)]
pub struct KeywordReport {
    /// Listed words that occur at least once, in list order.
    pub positive: Vec<(String, usize)>,
    pub negative: Vec<(String, usize)>,
    /// Most frequent words longer than three letters.
    pub most_common: Vec<(String, usize)>,
}

pub fn keyword_report(records: &[ReviewRecord], common_n: usize) -> KeywordReport {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for r in records {
        let lower = r.raw_text.to_lowercase();
        for m in WORD_RE.find_iter(&lower) {
            *counts.entry(m.as_str().to_string()).or_default() += 1;
        }
    }

    let present = |words: &[&str]| -> Vec<(String, usize)> {
        words
            .iter()
            .filter_map(|w| counts.get(*w).map(|c| (w.to_string(), *c)))
            .collect()
    };
    let positive = present(&POSITIVE_WORDS);
    let negative = present(&NEGATIVE_WORDS);

    let mut most_common: Vec<(String, usize)> = counts
        .iter()
        .filter(|(w, _)| w.len() > 3)
        .map(|(w, c)| (w.clone(), *c))
        .collect();
    most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    most_common.truncate(common_n);

    KeywordReport {
        positive,
        negative,
        most_common,
    }
}

// ── Printing ──

pub fn print_summary(stats: &SummaryStats) {
    println!("=== Basic Statistics ===");
    println!("Total reviews:          {}", stats.total_reviews);
    println!("Unique restaurants:     {}", stats.distinct_identifiers);
    println!("Avg reviews/restaurant: {:.2}", stats.avg_reviews_per_identifier);
    println!("Avg review length:      {:.2} chars", stats.avg_review_length);
    println!("Median review length:   {:.2} chars", stats.median_review_length);
}

pub fn print_length_distribution(records: &[ReviewRecord]) {
    let mut lengths: Vec<usize> = records.iter().map(ReviewRecord::text_len).collect();
    lengths.sort_unstable();

    println!("\n=== Review Length Distribution ===");
    println!("Min length:      {}", lengths.first().copied().unwrap_or(0));
    println!("Max length:      {}", lengths.last().copied().unwrap_or(0));
    println!("25th percentile: {:.2}", quantile(&lengths, 0.25));
    println!("75th percentile: {:.2}", quantile(&lengths, 0.75));
}

pub fn print_top_identifiers(stats: &SummaryStats) {
    println!("\n=== Top {} Restaurants by Review Count ===", stats.top_identifiers.len());
    for (i, entry) in stats.top_identifiers.iter().enumerate() {
        println!("{:>3}. {} ({} reviews)", i + 1, display_name(&entry.identifier), entry.count);
    }
}

pub fn print_keywords(report: &KeywordReport) {
    println!("\n=== Common Keywords ===");
    println!("Positive indicators:");
    for (word, count) in &report.positive {
        println!("  {}: {} mentions", word, count);
    }
    println!("Negative indicators:");
    for (word, count) in &report.negative {
        println!("  {}: {} mentions", word, count);
    }
    println!("Most common words:");
    for (word, count) in &report.most_common {
        println!("  {}: {}", word, count);
    }
}

/// Last path segment of an identifier URL, de-slugged and title-cased.
pub fn display_name(identifier: &str) -> String {
    let slug = identifier
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(identifier);
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ── Tests ──
