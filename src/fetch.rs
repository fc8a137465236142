use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::config::ScraperConfig;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("connection failed for {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Whether `policy` allows another attempt after this failure.
    pub fn is_transient(&self, policy: &RetryPolicy) -> bool {
        match self {
            FetchError::Status { status, .. } => policy.should_retry_status(*status),
            FetchError::Timeout { .. } | FetchError::Connect { .. } => true,
            FetchError::Request { .. } | FetchError::Body { .. } => false,
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if err.is_connect() {
            FetchError::Connect { url, source: err }
        } else {
            FetchError::Request { url, source: err }
        }
    }
}

/// Transport-level retry: which failures get another attempt, how many, and
/// how long to wait between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Exponential backoff for the zero-based `attempt` that just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Fetches one page body. A returned body always came from a 2xx response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            policy: config.retry_policy(),
        })
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let body = with_retry(&self.policy, || self.get_once(url)).await?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }
}

/// Run `attempt` until it succeeds, fails for good, or `policy` runs out of
/// retries. The last error is returned.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, mut attempt_fn: F) -> Result<String, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match attempt_fn().await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < policy.max_retries && e.is_transient(policy) => {
                let backoff = policy.delay_for(attempt);
                warn!(
                    "{} (attempt {}/{}), backing off {:.1}s",
                    e,
                    attempt + 1,
                    policy.max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}


// ── Tests ──
