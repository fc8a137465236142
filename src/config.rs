use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::fetch::RetryPolicy;

pub const ENV_PREFIX: &str = "REVIEWS";
pub const DEFAULT_CONFIG_FILE: &str = "scraper.toml";

const MAX_DELAY_SECS: f64 = 3600.0;
const MAX_BACKOFF_SECS: f64 = 600.0;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Review selectors, most specific first. The hashed class names come from the
/// site's styled-components output and drift between deploys, hence the tail of
/// progressively broader patterns.
const DEFAULT_SELECTORS: &[&str] = &[
    "p.sc-1hez2tp-0.sc-hfLElm.hreYiP",
    "p.sc-1hez2tp-0.hreYiP",
    "p.hreYiP",
    "div.sc-dgAbBl.ceFzZe p",
    "section.sc-jOnSTu.cfrSOJ p",
    r#"div[data-testid="review-text"]"#,
    "div.reviews-text",
    "p.review-text",
    "div.review-content p",
    r#"[class*="review"] p"#,
    r#"div[class*="review-text"]"#,
    r#"p[class*="review"]"#,
];

/// Which of the two page extraction paths a run uses. They are alternatives,
/// never chained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// CSS selector fallback chain over the rendered markup.
    Markup,
    /// The `__PRELOADED_STATE__` JSON blob embedded in a script tag.
    Payload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Table with a `url` column listing the restaurants to crawl.
    pub input_file: PathBuf,
    /// Final CSV export. The intermediate copy and stats document sit next to it.
    pub output_file: PathBuf,
    pub checkpoint_file: PathBuf,
    /// Review pages fetched per restaurant at most.
    pub max_pages: u32,
    /// Politeness delay bounds, drawn uniformly before every page fetch.
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: f64,
    pub retry_statuses: Vec<u16>,
    /// Checkpoint and intermediate export cadence, in identifiers.
    pub chunk_size: usize,
    /// Minimum review length in characters.
    pub min_review_length: usize,
    /// Appended to a restaurant URL to reach its review listing.
    pub review_suffix: String,
    pub selectors: Vec<String>,
    pub mode: ExtractionMode,
    /// Identifiers listed in the stats document's leaderboard.
    pub top_n: usize,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("zomato.csv"),
            output_file: PathBuf::from("zomato_reviews_from_urls.csv"),
            checkpoint_file: PathBuf::from("scraping_checkpoint.json"),
            max_pages: 5,
            delay_min_secs: 1.0,
            delay_max_secs: 3.0,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_secs: 1.0,
            retry_statuses: vec![429, 500, 502, 503, 504],
            chunk_size: 10,
            min_review_length: 20,
            review_suffix: "/reviews".to_string(),
            selectors: DEFAULT_SELECTORS.iter().map(|s| s.to_string()).collect(),
            mode: ExtractionMode::Markup,
            top_n: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ScraperConfig {
    /// Layer an optional TOML file under `REVIEWS_*` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("retry_statuses"),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let cfg: ScraperConfig = settings
            .try_deserialize()
            .context("Invalid scraper configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            bail!("max_pages must be at least 1");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        check_secs("delay_min_secs", self.delay_min_secs, MAX_DELAY_SECS)?;
        check_secs("delay_max_secs", self.delay_max_secs, MAX_DELAY_SECS)?;
        check_secs("retry_backoff_secs", self.retry_backoff_secs, MAX_BACKOFF_SECS)?;
        if self.delay_min_secs > self.delay_max_secs {
            bail!(
                "delay_min_secs ({}) exceeds delay_max_secs ({})",
                self.delay_min_secs,
                self.delay_max_secs
            );
        }
        if self.mode == ExtractionMode::Markup && self.selectors.is_empty() {
            bail!("markup mode needs at least one selector");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_secs_f64(self.retry_backoff_secs),
            retry_statuses: self.retry_statuses.clone(),
        }
    }

    /// `temp_<output name>` alongside the final export.
    pub fn intermediate_file(&self) -> PathBuf {
        let name = self
            .output_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reviews.csv".to_string());
        self.output_file.with_file_name(format!("temp_{}", name))
    }

    /// `<output stem>_stats.json` alongside the final export.
    pub fn stats_file(&self) -> PathBuf {
        stats_path_for(&self.output_file)
    }
}

/// Finite and within `0..=max`.
fn check_secs(name: &str, value: f64, max: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=max).contains(&value) {
        bail!("{} must be between 0 and {} seconds, got {}", name, max, value);
    }
    Ok(())
}

pub fn stats_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reviews".to_string());
    output.with_file_name(format!("{}_stats.json", stem))
}

// ── Tests ──
