//! HTTP client for marketplace pages with rate limiting, retry and response validation
//!
//! Every attempt waits on one shared rate limiter, rotates the client identity and
//! is cancellable at each suspension point.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::backoff::{BackoffPolicy, Delay, TokioDelay};
use crate::infrastructure::config::FetchConfig;
use crate::infrastructure::pipeline_error::{FetchError, FetchFailure};

static TITLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// A page body that passed validation
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
    pub attempts: u32,
}

/// Anything that can hand the pipeline a validated HTML page
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedPage, FetchFailure>;
}

struct AttemptFailure {
    error: FetchError,
    retry_after: Option<Duration>,
}

impl From<FetchError> for AttemptFailure {
    fn from(error: FetchError) -> Self {
        Self { error, retry_after: None }
    }
}

/// Rate-limited, retrying HTTP client
pub struct FetchClient {
    client: Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    config: FetchConfig,
    backoff: BackoffPolicy,
    delay: Arc<dyn Delay>,
    rotation: AtomicUsize,
}

impl FetchClient {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        Self::with_delay(config, Arc::new(TokioDelay))
    }

    /// Create a client whose backoff waits go through `delay`
    pub fn with_delay(config: FetchConfig, delay: Arc<dyn Delay>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .cookie_store(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .ok_or_else(|| anyhow::anyhow!("Rate limit must be greater than 0"))?,
        );

        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            backoff: BackoffPolicy::from_config(&config),
            config,
            delay,
            rotation: AtomicUsize::new(fastrand::usize(..1024)),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch and validate a page, retrying within the configured budget
    ///
    /// At most `max_retries + 1` attempts are made; the last error is returned
    /// when the budget is spent.
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedPage, FetchFailure> {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.attempt(url, attempt, cancel).await {
                Ok(mut page) => {
                    page.attempts = attempt;
                    if attempt > 1 {
                        info!(url, attempt, "Fetched after retry");
                    }
                    return Ok(page);
                }
                Err(failure) => failure,
            };

            if !self.should_retry(&failure.error) || attempt >= max_attempts {
                if attempt >= max_attempts && self.should_retry(&failure.error) {
                    warn!(url, attempts = attempt, error = %failure.error, "Retry budget exhausted");
                }
                return Err(FetchFailure {
                    error: failure.error,
                    attempts: attempt,
                });
            }

            let backoff = self.backoff.delay_for(attempt);
            let wait = failure
                .retry_after
                .map_or(backoff, |retry_after| retry_after.max(backoff).min(self.backoff.max));

            warn!(url, attempt, error = %failure.error, wait_ms = wait.as_millis(), "Attempt failed, backing off");

            if !self.delay.sleep(wait, cancel).await {
                return Err(FetchFailure {
                    error: FetchError::Cancelled { url: url.to_string() },
                    attempts: attempt,
                });
            }
        }
    }

    /// Single rate-limited GET returning raw bytes, for image downloads
    pub async fn fetch_bytes(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        let cancelled = || FetchError::Cancelled { url: url.to_string() };

        tokio::select! {
            () = self.rate_limiter.until_ready() => {},
            () = cancel.cancelled() => return Err(cancelled()),
        }

        let response = tokio::select! {
            result = self.client.get(url).headers(self.next_identity()).send() => {
                result.map_err(|e| FetchError::Network { url: url.to_string(), message: e.to_string() })?
            },
            () = cancel.cancelled() => return Err(cancelled()),
        };

        if response.status().as_u16() >= 400 {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = tokio::select! {
            result = response.bytes() => {
                result.map_err(|e| FetchError::Network { url: url.to_string(), message: e.to_string() })?
            },
            () = cancel.cancelled() => return Err(cancelled()),
        };

        if bytes.is_empty() {
            return Err(FetchError::EmptyResponse { url: url.to_string() });
        }
        Ok(bytes.to_vec())
    }

    fn should_retry(&self, error: &FetchError) -> bool {
        match error {
            FetchError::HttpStatus { status, .. } => self.config.retry_on_status.contains(status),
            other => other.is_transient(),
        }
    }

    /// Rotating User-Agent / Accept-Language pair
    fn next_identity(&self) -> HeaderMap {
        let turn = self.rotation.fetch_add(1, Ordering::Relaxed);
        let mut headers = HeaderMap::new();

        if let Some(agent) = pick(&self.config.user_agents, turn).and_then(|v| v.parse().ok()) {
            headers.insert(USER_AGENT, agent);
        }
        if let Some(language) = pick(&self.config.accept_languages, turn).and_then(|v| v.parse().ok()) {
            headers.insert(ACCEPT_LANGUAGE, language);
        }
        headers.insert(ACCEPT, reqwest::header::HeaderValue::from_static(ACCEPT_HTML));
        headers
    }

    async fn attempt(&self, url: &str, attempt: u32, cancel: &CancellationToken) -> Result<FetchedPage, AttemptFailure> {
        let cancelled = || AttemptFailure::from(FetchError::Cancelled { url: url.to_string() });

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        tokio::select! {
            () = self.rate_limiter.until_ready() => {},
            () = cancel.cancelled() => return Err(cancelled()),
        }

        debug!(url, attempt, "Fetching page");

        let response = tokio::select! {
            result = self.client.get(url).headers(self.next_identity()).send() => {
                result.map_err(|e| FetchError::Network { url: url.to_string(), message: e.to_string() })?
            },
            () = cancel.cancelled() => return Err(cancelled()),
        };

        let status = response.status();
        let final_url = response.url().to_string();

        if status.as_u16() >= 400 {
            let retry_after = (status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE)
                .then(|| response.headers().get(RETRY_AFTER))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(AttemptFailure {
                error: FetchError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                },
                retry_after,
            });
        }

        let body = tokio::select! {
            result = response.text() => {
                result.map_err(|e| FetchError::Network { url: url.to_string(), message: e.to_string() })?
            },
            () = cancel.cancelled() => return Err(cancelled()),
        };

        self.validate_body(url, &body)?;

        debug!(url, attempt, bytes = body.len(), "Fetched page");
        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            body,
            attempts: attempt,
        })
    }

    /// Empty, too short, or an error page dressed up as 200
    fn validate_body(&self, url: &str, body: &str) -> Result<(), FetchError> {
        if body.trim().is_empty() {
            return Err(FetchError::EmptyResponse { url: url.to_string() });
        }

        if body.len() < self.config.min_body_bytes {
            return Err(FetchError::SuspiciousResponse {
                url: url.to_string(),
                reason: format!("body is {} bytes, expected at least {}", body.len(), self.config.min_body_bytes),
            });
        }

        if let Some(marker) = error_page_marker(body, &self.config.error_page_markers) {
            return Err(FetchError::SuspiciousResponse {
                url: url.to_string(),
                reason: format!("page title looks like an error page ({marker})"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PageSource for FetchClient {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedPage, FetchFailure> {
        Self::fetch(self, url, cancel).await
    }
}

fn pick(pool: &[String], turn: usize) -> Option<&str> {
    if pool.is_empty() {
        None
    } else {
        Some(pool[turn % pool.len()].as_str())
    }
}

/// First configured marker found in the page `<title>`
fn error_page_marker<'a>(body: &str, markers: &'a [String]) -> Option<&'a str> {
    let title = TITLE_REGEX.captures(body)?.get(1)?.as_str().to_lowercase();
    markers
        .iter()
        .find(|marker| title.contains(&marker.to_lowercase()))
        .map(String::as_str)
}
