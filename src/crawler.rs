use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::config::ScraperConfig;
use crate::fetch::Fetcher;
use crate::parser::PageExtractor;
use crate::review::ReviewRecord;

/// Review listing URL for a restaurant: one trailing `/` dropped, suffix appended.
pub fn review_url(identifier: &str, suffix: &str) -> String {
    let base = identifier.strip_suffix('/').unwrap_or(identifier);
    format!("{}{}", base, suffix)
}

pub fn page_url(review_url: &str, page: u32) -> String {
    format!("{}?page={}", review_url, page)
}

/// Walks one restaurant's review pages in order until a page is empty,
/// a fetch fails, or the page limit is reached.
pub struct PageCrawler {
    fetcher: Box<dyn Fetcher>,
    extractor: Box<dyn PageExtractor>,
    max_pages: u32,
    delay_min_secs: f64,
    delay_max_secs: f64,
    review_suffix: String,
}

impl PageCrawler {
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        extractor: Box<dyn PageExtractor>,
        config: &ScraperConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            max_pages: config.max_pages,
            delay_min_secs: config.delay_min_secs,
            delay_max_secs: config.delay_max_secs,
            review_suffix: config.review_suffix.clone(),
        }
    }

    pub fn review_url(&self, identifier: &str) -> String {
        review_url(identifier, &self.review_suffix)
    }

    /// Whatever was collected before stopping; never an error.
    pub async fn crawl(&self, identifier: &str) -> Vec<ReviewRecord> {
        let base = self.review_url(identifier);
        let mut records = Vec::new();

        for page in 1..=self.max_pages {
            let url = page_url(&base, page);
            self.politeness_delay().await;

            let body = match self.fetcher.get(&url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to fetch {}: {}", url, e);
                    break;
                }
            };

            let reviews = self.extractor.extract_page(&body);
            if reviews.is_empty() {
                info!("No reviews found on page {} for {}", page, identifier);
                break;
            }

            info!("Extracted {} reviews from page {}", reviews.len(), page);
            let collected_at = Utc::now();
            records.extend(reviews.into_iter().map(|r| ReviewRecord {
                source_identifier: identifier.to_string(),
                page,
                raw_text: r.text,
                collected_at,
                meta: r.meta,
            }));
        }

        records
    }

    async fn politeness_delay(&self) {
        if self.delay_max_secs <= 0.0 {
            return;
        }
        let secs = if self.delay_min_secs < self.delay_max_secs {
            rand::rng().random_range(self.delay_min_secs..=self.delay_max_secs)
        } else {
            self.delay_max_secs
        };
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::stub::StubFetcher;
    use crate::parser::extractor::ContentExtractor;
    use crate::parser::payload::PayloadExtractor;

    const ID: &str = "https://site.example/city/place-name";

    fn page(reviews: &[&str]) -> String {
        let body: String = reviews
            .iter()
            .map(|r| format!(r#"<p class="sc-1hez2tp-0 hreYiP">{}</p>"#, r))
            .collect();
        format!("<html><body>{}</body></html>", body)
    }

    fn config() -> ScraperConfig {
        ScraperConfig {
            delay_min_secs: 0.0,
            delay_max_secs: 0.0,
            max_pages: 5,
            min_review_length: 0,
            ..Default::default()
        }
    }

    fn crawler(fetcher: StubFetcher, config: &ScraperConfig) -> PageCrawler {
        let extractor = ContentExtractor::from_selectors(&config.selectors, config.min_review_length);
        PageCrawler::new(Box::new(fetcher), Box::new(extractor), config)
    }

    #[test]
    fn review_url_appends_suffix() {
        assert_eq!(
            review_url("https://site.example/city/place-name", "/reviews"),
            "https://site.example/city/place-name/reviews"
        );
        assert_eq!(
            review_url("https://site.example/city/place-name/", "/reviews"),
            "https://site.example/city/place-name/reviews"
        );
    }

    #[test]
    fn page_urls() {
        assert_eq!(page_url("https://s.example/a/reviews", 3), "https://s.example/a/reviews?page=3");
    }

    #[tokio::test]
    async fn stops_at_first_empty_page() {
        let fetcher = StubFetcher::new()
            .with_page(&format!("{ID}/reviews?page=1"), &page(&["one", "two"]))
            .with_page(&format!("{ID}/reviews?page=2"), &page(&["three"]))
            .with_page(&format!("{ID}/reviews?page=3"), "<html><body>No more</body></html>")
            .with_page(&format!("{ID}/reviews?page=4"), &page(&["never"]));
        let log = fetcher.request_log();
        let cfg = config();

        let records = crawler(fetcher, &cfg).crawl(ID).await;

        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().filter(|r| r.page == 1).count(), 2);
        assert_eq!(records.iter().filter(|r| r.page == 2).count(), 1);
        assert!(records.iter().all(|r| r.source_identifier == ID));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn bad_status_stops_crawl() {
        let fetcher = StubFetcher::new()
            .with_page(&format!("{ID}/reviews?page=1"), &page(&["one"]))
            .with_status(&format!("{ID}/reviews?page=2"), 403)
            .with_page(&format!("{ID}/reviews?page=3"), &page(&["three"]));
        let cfg = config();

        let records = crawler(fetcher, &cfg).crawl(ID).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].raw_text, "one");
    }

    #[tokio::test]
    async fn failure_on_first_page_is_empty() {
        let fetcher = StubFetcher::new().with_status(&format!("{ID}/reviews?page=1"), 500);
        let cfg = config();
        assert!(crawler(fetcher, &cfg).crawl(ID).await.is_empty());
    }

    #[tokio::test]
    async fn respects_page_limit() {
        let mut fetcher = StubFetcher::new();
        for n in 1..=5 {
            let text = format!("review {n}");
            fetcher = fetcher.with_page(&format!("{ID}/reviews?page={n}"), &page(&[text.as_str()]));
        }
        let log = fetcher.request_log();
        let cfg = ScraperConfig {
            max_pages: 2,
            ..config()
        };

        let records = crawler(fetcher, &cfg).crawl(ID).await;
        assert_eq!(records.len(), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![format!("{ID}/reviews?page=1"), format!("{ID}/reviews?page=2")]
        );
    }

    #[tokio::test]
    async fn trailing_slash_identifier() {
        let fetcher = StubFetcher::new().with_page(&format!("{ID}/reviews?page=1"), &page(&["one"]));
        let cfg = ScraperConfig {
            max_pages: 1,
            ..config()
        };
        let id = format!("{ID}/");
        let records = crawler(fetcher, &cfg).crawl(&id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_identifier, id);
    }

    #[tokio::test]
    async fn payload_mode_carries_meta() {
        let html = std::fs::read_to_string("tests/fixtures/preloaded_state.html").unwrap();
        let fetcher = StubFetcher::new().with_page(&format!("{ID}/reviews?page=1"), &html);
        let cfg = ScraperConfig {
            max_pages: 1,
            ..config()
        };
        let crawler = PageCrawler::new(Box::new(fetcher), Box::new(PayloadExtractor::new()), &cfg);

        let records = crawler.crawl(ID).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.meta.is_some()));
    }
}
