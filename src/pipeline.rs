use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use crate::checkpoint::CheckpointStore;
use crate::config::ScraperConfig;
use crate::crawler::PageCrawler;
use crate::export;
use crate::fetch::Fetcher;
use crate::parser::build_extractor;
use crate::review::{self, ReviewRecord};
use crate::stats::{self, SummaryStats};

/// Counts returned after a run completes.
#[derive(Debug)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    /// Records held before validation, including any seeded from an interrupted run.
    pub raw_records: usize,
    pub saved_records: usize,
    pub stats: SummaryStats,
}

pub struct Pipeline {
    config: ScraperConfig,
    crawler: PageCrawler,
    checkpoint: CheckpointStore,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(config: ScraperConfig, fetcher: Box<dyn Fetcher>) -> Self {
        let crawler = PageCrawler::new(fetcher, build_extractor(&config), &config);
        let checkpoint = CheckpointStore::new(config.checkpoint_file.clone());
        Self {
            config,
            crawler,
            checkpoint,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Forget earlier progress: checkpoint and intermediate export.
    pub fn reset(&self) -> Result<()> {
        self.checkpoint.clear()?;
        if export::remove_if_exists(&self.config.intermediate_file())? {
            info!("Removed intermediate export {}", self.config.intermediate_file().display());
        }
        Ok(())
    }

    pub async fn run(&self, identifiers: &[String]) -> Result<RunSummary> {
        let state = self.checkpoint.load_state();
        let done: HashSet<String> = state.processed_identifiers.iter().cloned().collect();
        let mut processed_ids = state.processed_identifiers;
        let mut records = if processed_ids.is_empty() {
            Vec::new()
        } else {
            self.seed_records()
        };
        let carried_count = state.review_count;
        let mut collected = 0usize;

        let total = identifiers.len();
        let mut skipped = 0usize;
        let mut processed = 0usize;
        let mut failed = 0usize;

        let pb = self.progress_bar(total)?;
        let intermediate = self.config.intermediate_file();

        let mut seen: HashSet<&str> = HashSet::new();
        for (i, identifier) in identifiers.iter().enumerate() {
            // repeats within one input count as skipped, keeping the checkpoint an ordered set
            if done.contains(identifier) || !seen.insert(identifier.as_str()) {
                skipped += 1;
            } else {
                pb.set_message(truncate_id(identifier));
                match self.process_identifier(identifier).await {
                    Ok(found) => {
                        info!("Collected {} reviews from {}", found.len(), identifier);
                        collected += found.len();
                        records.extend(found);
                        processed_ids.push(identifier.clone());
                        processed += 1;
                    }
                    Err(e) => {
                        warn!("Error processing {}: {:#}", identifier, e);
                        failed += 1;
                    }
                }
            }
            pb.inc(1);

            let position = i + 1;
            if position % self.config.chunk_size == 0 {
                self.checkpoint.save(&processed_ids, carried_count + collected)?;
                export::write_reviews(&intermediate, &records, Utc::now())?;
                info!(
                    "Saved intermediate results: {} reviews after {} URLs",
                    records.len(),
                    position
                );
            }
        }
        pb.finish_and_clear();

        self.checkpoint.save(&processed_ids, carried_count + collected)?;

        let raw_records = records.len();
        let cleaned = review::deduplicate(review::validate(records, self.config.min_review_length));
        let summary_stats = SummaryStats::compute(&cleaned, self.config.top_n);

        if cleaned.is_empty() {
            warn!("No reviews were collected!");
        } else {
            export::write_reviews(&self.config.output_file, &cleaned, Utc::now())?;
            stats::write_stats(&self.config.stats_file(), &summary_stats)?;
            info!(
                "Saved {} reviews to {}",
                cleaned.len(),
                self.config.output_file.display()
            );
        }
        export::remove_if_exists(&intermediate)?;

        Ok(RunSummary {
            total,
            skipped,
            processed,
            failed,
            raw_records,
            saved_records: cleaned.len(),
            stats: summary_stats,
        })
    }

    /// Anything returned as `Err` leaves the identifier unrecorded, so the
    /// next run retries it.
    async fn process_identifier(&self, identifier: &str) -> Result<Vec<ReviewRecord>> {
        let url = Url::parse(identifier).with_context(|| format!("Invalid URL {:?}", identifier))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Unsupported URL scheme {:?}", url.scheme());
        }
        info!("Scraping reviews from: {}", self.crawler.review_url(identifier));
        Ok(self.crawler.crawl(identifier).await)
    }

    /// Rows from an interrupted run's intermediate export, if one survived.
    fn seed_records(&self) -> Vec<ReviewRecord> {
        let path = self.config.intermediate_file();
        if !path.exists() {
            return Vec::new();
        }
        match export::read_reviews(&path) {
            Ok(rows) => {
                info!("Resuming with {} reviews from {}", rows.len(), path.display());
                rows.into_iter().map(export::ExportRow::into_record).collect()
            }
            Err(e) => {
                warn!("Ignoring unreadable intermediate export: {:#}", e);
                Vec::new()
            }
        }
    }

    fn progress_bar(&self, total: usize) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} (eta {eta}) {msg}")?
                .progress_chars("=> "),
        );
        Ok(pb)
    }
}

fn truncate_id(identifier: &str) -> String {
    const MAX: usize = 48;
    if identifier.chars().count() <= MAX {
        identifier.to_string()
    } else {
        let skip = identifier.chars().count() - MAX;
        format!("...{}", identifier.chars().skip(skip).collect::<String>())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::checkpoint::CheckpointState;
    use crate::fetch::stub::StubFetcher;
    use crate::fetch::FetchError;

    fn ident(n: usize) -> String {
        format!("https://site.example/city/place-{n}")
    }

    /// One page with one review unique to restaurant `n`.
    fn page_for(n: usize) -> String {
        format!(
            r#"<html><body><p class="sc-1hez2tp-0 hreYiP">Restaurant {n} served a memorable dinner</p></body></html>"#
        )
    }

    fn stub_for(ns: impl IntoIterator<Item = usize>) -> StubFetcher {
        ns.into_iter().fold(StubFetcher::new(), |f, n| {
            f.with_page(&format!("{}/reviews?page=1", ident(n)), &page_for(n))
        })
    }

    fn config(dir: &Path) -> ScraperConfig {
        ScraperConfig {
            output_file: dir.join("reviews.csv"),
            checkpoint_file: dir.join("checkpoint.json"),
            delay_min_secs: 0.0,
            delay_max_secs: 0.0,
            max_pages: 3,
            chunk_size: 10,
            ..Default::default()
        }
    }

    fn pipeline(cfg: &ScraperConfig, fetcher: impl Fetcher + 'static) -> Pipeline {
        Pipeline::new(cfg.clone(), Box::new(fetcher)).with_progress(false)
    }

    type Snapshot = (CheckpointState, Vec<export::ExportRow>);

    /// Captures the checkpoint and intermediate export the moment a trigger
    /// URL is requested, i.e. while the run is still in flight.
    struct SnapshotFetcher {
        inner: StubFetcher,
        trigger: String,
        checkpoint: CheckpointStore,
        intermediate: std::path::PathBuf,
        seen: Arc<Mutex<Option<Snapshot>>>,
    }

    #[async_trait]
    impl Fetcher for SnapshotFetcher {
        async fn get(&self, url: &str) -> Result<String, FetchError> {
            if url.starts_with(&self.trigger) {
                let mut seen = self.seen.lock().unwrap();
                if seen.is_none() {
                    let rows = export::read_reviews(&self.intermediate).unwrap();
                    *seen = Some((self.checkpoint.load_state(), rows));
                }
            }
            self.inner.get(url).await
        }
    }

    #[tokio::test]
    async fn chunked_checkpoint_then_final() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ids: Vec<String> = (1..=12).map(ident).collect();

        let seen = Arc::new(Mutex::new(None));
        let fetcher = SnapshotFetcher {
            inner: stub_for(1..=12),
            trigger: ident(11),
            checkpoint: CheckpointStore::new(cfg.checkpoint_file.clone()),
            intermediate: cfg.intermediate_file(),
            seen: Arc::clone(&seen),
        };

        let summary = pipeline(&cfg, fetcher).run(&ids).await.unwrap();

        let (mid_state, mid_rows) = seen.lock().unwrap().take().expect("snapshot taken");
        assert_eq!(mid_state.processed_identifiers, ids[..10].to_vec());
        assert_eq!(mid_state.review_count, 10);
        assert_eq!(mid_rows.len(), 10);
        let mid_sources: HashSet<&str> = mid_rows.iter().map(|r| r.source_identifier.as_str()).collect();
        assert_eq!(mid_sources, ids[..10].iter().map(String::as_str).collect::<HashSet<&str>>());

        let final_state = CheckpointStore::new(cfg.checkpoint_file.clone()).load_state();
        assert_eq!(final_state.processed_identifiers, ids);
        assert_eq!(final_state.last_processed.as_deref(), Some(ident(12).as_str()));
        assert!(!cfg.intermediate_file().exists());

        assert_eq!(summary.processed, 12);
        assert_eq!(summary.saved_records, 12);
        assert_eq!(export::read_reviews(&cfg.output_file).unwrap().len(), 12);
        assert!(cfg.stats_file().exists());
    }

    #[tokio::test]
    async fn rerun_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ids: Vec<String> = (1..=3).map(ident).collect();

        pipeline(&cfg, stub_for(1..=3)).run(&ids).await.unwrap();

        let second = stub_for(1..=3);
        let log = second.request_log();
        let summary = pipeline(&cfg, second).run(&ids).await.unwrap();

        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.processed, 0);
        assert!(log.lock().unwrap().is_empty());
        // the first run's export is left alone
        assert_eq!(export::read_reviews(&cfg.output_file).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn repeated_identifier_crawled_once() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ids = vec![ident(1), ident(1), ident(2)];

        let fetcher = stub_for([1, 2]);
        let log = fetcher.request_log();
        let summary = pipeline(&cfg, fetcher).run(&ids).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(log.lock().unwrap().len(), 4);
        let state = CheckpointStore::new(cfg.checkpoint_file.clone()).load_state();
        assert_eq!(state.processed_identifiers, vec![ident(1), ident(2)]);
    }

    #[tokio::test]
    async fn invalid_identifier_not_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ids = vec![ident(1), "not a url".to_string(), "ftp://site.example/x".to_string()];

        let summary = pipeline(&cfg, stub_for([1])).run(&ids).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 2);
        let state = CheckpointStore::new(cfg.checkpoint_file.clone()).load_state();
        assert_eq!(state.processed_identifiers, vec![ident(1)]);
    }

    #[tokio::test]
    async fn unreachable_identifier_still_processed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ids = vec![ident(1), ident(2)];

        // nothing served for #2: crawl stops on the 404 with no records
        let summary = pipeline(&cfg, stub_for([1])).run(&ids).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.saved_records, 1);
        let state = CheckpointStore::new(cfg.checkpoint_file.clone()).load_state();
        assert_eq!(state.processed_identifiers, ids);
    }

    #[tokio::test]
    async fn resume_seeds_from_intermediate_export() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ids: Vec<String> = (1..=3).map(ident).collect();

        // an interrupted run left #1 checkpointed with its rows in the intermediate export
        CheckpointStore::new(cfg.checkpoint_file.clone())
            .save(&ids[..1], 1)
            .unwrap();
        let earlier = ReviewRecord {
            source_identifier: ident(1),
            page: 1,
            raw_text: "Restaurant 1 served a memorable dinner".into(),
            collected_at: Utc::now(),
            meta: None,
        };
        export::write_reviews(&cfg.intermediate_file(), &[earlier], Utc::now()).unwrap();

        let fetcher = stub_for(2..=3);
        let log = fetcher.request_log();
        let summary = pipeline(&cfg, fetcher).run(&ids).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.raw_records, 3);
        assert_eq!(summary.saved_records, 3);
        assert!(log.lock().unwrap().iter().all(|u| !u.starts_with(&ident(1))));

        let state = CheckpointStore::new(cfg.checkpoint_file.clone()).load_state();
        assert_eq!(state.review_count, 3);
        assert!(!cfg.intermediate_file().exists());
    }

    #[tokio::test]
    async fn final_output_is_validated_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScraperConfig {
            min_review_length: 10,
            ..config(dir.path())
        };
        let html = r#"<html><body>
            <p class="sc-1hez2tp-0 hreYiP">Great food! Loved it.</p>
            <p class="sc-1hez2tp-0 hreYiP">Great   food! Loved it.</p>
            <p class="sc-1hez2tp-0 hreYiP">Bad</p>
            <p class="sc-1hez2tp-0 hreYiP">Amazing experience with excellent service</p>
        </body></html>"#;
        let fetcher = StubFetcher::new().with_page(&format!("{}/reviews?page=1", ident(1)), html);

        let summary = pipeline(&cfg, fetcher).run(&[ident(1)]).await.unwrap();

        // "Bad" never leaves the extractor; the spaced duplicate falls to dedup
        assert_eq!(summary.raw_records, 3);
        assert_eq!(summary.saved_records, 2);
        let rows = export::read_reviews(&cfg.output_file).unwrap();
        assert_eq!(rows[0].review, "Great food! Loved it.");
        assert_eq!(rows[1].review, "Amazing experience with excellent service");
    }

    #[tokio::test]
    async fn reset_clears_progress() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        CheckpointStore::new(cfg.checkpoint_file.clone())
            .save(&[ident(1)], 4)
            .unwrap();
        std::fs::write(cfg.intermediate_file(), "source_identifier\n").unwrap();

        let p = pipeline(&cfg, StubFetcher::new());
        p.reset().unwrap();

        assert!(!cfg.checkpoint_file.exists());
        assert!(!cfg.intermediate_file().exists());
        p.reset().unwrap();
    }

    #[test]
    fn long_identifiers_truncated_from_left() {
        let long = format!("https://site.example/{}", "x".repeat(80));
        let shown = truncate_id(&long);
        assert!(shown.starts_with("..."));
        assert_eq!(shown.chars().count(), 51);
        assert_eq!(truncate_id("short"), "short");
    }
}
