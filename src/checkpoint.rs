use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info};

pub const SCHEMA_VERSION: u32 = 1;

/// Snapshot of run progress. Every field defaults, so older or partial
/// checkpoint files still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointState {
    pub schema_version: u32,
    #[serde(alias = "processed_urls")]
    pub processed_identifiers: Vec<String>,
    #[serde(alias = "total_reviews")]
    pub review_count: usize,
    pub last_processed: Option<String>,
    #[serde(alias = "timestamp", deserialize_with = "lenient_timestamp")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Naive, garbled or non-string timestamps become `None` instead of failing the load.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifiers already processed by an earlier run, in processing order.
    pub fn load(&self) -> Vec<String> {
        self.load_state().processed_identifiers
    }

    /// Missing or unreadable checkpoints load as empty state.
    pub fn load_state(&self) -> CheckpointState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return CheckpointState::default(),
            Err(e) => {
                error!("Error reading checkpoint {}: {}", self.path.display(), e);
                return CheckpointState::default();
            }
        };

        match serde_json::from_str::<CheckpointState>(&raw) {
            Ok(state) => {
                info!(
                    "Checkpoint loaded: {} URLs already processed",
                    state.processed_identifiers.len()
                );
                state
            }
            Err(e) => {
                error!("Error loading checkpoint {}: {}", self.path.display(), e);
                CheckpointState::default()
            }
        }
    }

    /// Replace the checkpoint with a full snapshot (write temp file, then rename).
    pub fn save(&self, processed_identifiers: &[String], review_count: usize) -> Result<()> {
        let state = CheckpointState {
            schema_version: SCHEMA_VERSION,
            processed_identifiers: processed_identifiers.to_vec(),
            review_count,
            last_processed: processed_identifiers.last().cloned(),
            saved_at: Some(Utc::now()),
        };
        let json = serde_json::to_string_pretty(&state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed writing checkpoint temp {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed replacing checkpoint {}", self.path.display()))?;

        info!(
            "Checkpoint saved: {} URLs processed, {} reviews collected",
            processed_identifiers.len(),
            review_count
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed removing {}", self.path.display())),
        }
    }
}

// ── Tests ──
