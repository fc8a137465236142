use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::review::{ReviewMeta, ReviewRecord};

const BASE_COLUMNS: [&str; 6] = [
    "source_identifier",
    "page",
    "review",
    "collected_at",
    "processed_at",
    "review_length",
];

/// Appended when any record came from the structured payload.
const META_COLUMNS: [&str; 8] = [
    "review_id",
    "author",
    "rating",
    "posted_at",
    "experience",
    "like_count",
    "comment_count",
    "review_url",
];

// ── Input ──

/// Distinct non-empty values of the `url` column, in order of first appearance.
pub fn load_identifiers(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Error reading CSV file {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let Some(url_idx) = headers.iter().position(|h| h.trim() == "url") else {
        bail!("{} has no `url` column", path.display());
    };

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("Malformed row in {}", path.display()))?;
        let Some(url) = row.get(url_idx).map(str::trim) else {
            continue;
        };
        if !url.is_empty() && seen.insert(url.to_string()) {
            urls.push(url.to_string());
        }
    }

    info!("Successfully loaded {} unique URLs from {}", urls.len(), path.display());
    Ok(urls)
}

// ── Export ──

/// Write the tabular export, replacing any previous file at `path`.
pub fn write_reviews(path: &Path, records: &[ReviewRecord], processed_at: DateTime<Utc>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let with_meta = records.iter().any(|r| r.meta.is_some());
    let tmp = tmp_path(path);
    {
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;

        let mut header: Vec<&str> = BASE_COLUMNS.to_vec();
        if with_meta {
            header.extend(META_COLUMNS);
        }
        writer.write_record(&header)?;

        let processed = processed_at.to_rfc3339();
        for r in records {
            let mut row = vec![
                r.source_identifier.clone(),
                r.page.to_string(),
                r.raw_text.clone(),
                r.collected_at.to_rfc3339(),
                processed.clone(),
                r.text_len().to_string(),
            ];
            if with_meta {
                row.extend(meta_cells(r.meta.as_ref()));
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed replacing {}", path.display()))?;
    Ok(())
}

fn meta_cells(meta: Option<&ReviewMeta>) -> Vec<String> {
    let Some(m) = meta else {
        return vec![String::new(); META_COLUMNS.len()];
    };
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    vec![
        opt(&m.review_id),
        opt(&m.author),
        opt(&m.rating),
        opt(&m.posted_at),
        opt(&m.experience),
        m.like_count.to_string(),
        m.comment_count.to_string(),
        opt(&m.review_url),
    ]
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// One row of an export as read back from disk.
#[derive(Debug, Deserialize)]
pub struct ExportRow {
    pub source_identifier: String,
    pub page: u32,
    pub review: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_length: Option<usize>,
    #[serde(default)]
    pub review_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub posted_at: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub comment_count: Option<u64>,
    #[serde(default)]
    pub review_url: Option<String>,
}

impl ExportRow {
    /// The stored `review_length` no longer matches the text, e.g. after a hand edit.
    pub fn length_mismatch(&self) -> bool {
        self.review_length
            .is_some_and(|n| n != self.review.chars().count())
    }

    pub fn into_record(self) -> ReviewRecord {
        let has_meta = self.review_id.is_some()
            || self.author.is_some()
            || self.rating.is_some()
            || self.review_url.is_some();
        let meta = has_meta.then(|| ReviewMeta {
            review_id: self.review_id,
            author: self.author,
            rating: self.rating,
            posted_at: self.posted_at,
            experience: self.experience,
            like_count: self.like_count.unwrap_or(0),
            comment_count: self.comment_count.unwrap_or(0),
            review_url: self.review_url,
        });
        ReviewRecord {
            source_identifier: self.source_identifier,
            page: self.page,
            raw_text: self.review,
            collected_at: self.collected_at,
            meta,
        }
    }
}

pub fn read_reviews(path: &Path) -> Result<Vec<ExportRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open export {}", path.display()))?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<ExportRow>, _>>()
        .with_context(|| format!("Malformed export {}", path.display()))?;
    Ok(rows)
}

/// `true` when a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed removing {}", path.display())),
    }
}

// ── Tests ──
