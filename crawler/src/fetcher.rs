//! HTTP retrieval with retry, politeness and a global in-flight cap.

use parking_lot::Mutex;
use reqwest::{header, Client};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{sleep, Instant};
use url::Url;

use lexi_core::config::CrawlerConfig;
use lexi_core::target::{CrawlTarget, TargetId};

use crate::error::FetchError;
use crate::robots::{Robots, RobotsCache};

/// Body and metadata of a successful response.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub body: String,
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub fetched_at: OffsetDateTime,
}

impl RawPayload {
    pub fn new(body: impl Into<String>, final_url: Url) -> Self {
        Self {
            body: body.into(),
            final_url,
            status: 200,
            content_type: None,
            fetched_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: base · 2^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Spacing between requests to one target: the configured minimum, raised to
/// the host's robots.txt `Crawl-delay` but never past `cap`.
pub fn crawl_interval(min: Duration, crawl_delay: Option<Duration>, cap: Duration) -> Duration {
    match crawl_delay {
        Some(delay) => min.max(delay.min(cap)),
        None => min,
    }
}

/// Per-target request spacing.
#[derive(Default)]
pub struct Politeness {
    next_slot: Mutex<HashMap<TargetId, Instant>>,
}

impl Politeness {
    /// Reserve the next request slot for `id` and return how long to wait for it.
    pub fn reserve(&self, id: TargetId, interval: Duration, now: Instant) -> Duration {
        let mut slots = self.next_slot.lock();
        let slot = slots.get(&id).copied().map_or(now, |t| t.max(now));
        slots.insert(id, slot.checked_add(interval).unwrap_or(slot));
        slot - now
    }

    async fn wait(&self, id: TargetId, interval: Duration) {
        let wait = self.reserve(id, interval, Instant::now());
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

pub struct Fetcher {
    client: Client,
    permits: Semaphore,
    politeness: Politeness,
    robots: RobotsCache,
    retry: RetryPolicy,
    min_interval: Duration,
    max_crawl_delay: Duration,
    max_body_bytes: usize,
    respect_robots: bool,
}

impl Fetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            permits: Semaphore::new(config.max_in_flight.max(1)),
            politeness: Politeness::default(),
            robots: RobotsCache::new(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_ms),
                max_delay: Duration::from_millis(config.retry_max_ms),
            },
            min_interval: config.min_interval(),
            max_crawl_delay: config.max_crawl_delay(),
            max_body_bytes: config.max_body_bytes,
            respect_robots: config.respect_robots,
        })
    }

    /// Fetch the target's URL. Transient failures are retried with backoff;
    /// every attempt stamps `target.last_fetched_at`.
    pub async fn fetch(
        &self,
        target: &mut CrawlTarget,
        accept: &str,
    ) -> Result<RawPayload, FetchError> {
        target.last_fetched_at = Some(OffsetDateTime::now_utc());
        let url = parse_target_url(&target.source_url)?;

        let mut interval = self.min_interval;
        if self.respect_robots {
            let rules = self.robots_for(target.id, &url).await?;
            if !rules.allows_path(url.path()) {
                return Err(FetchError::Disallowed { url: url.to_string() });
            }
            interval = crawl_interval(self.min_interval, rules.crawl_delay, self.max_crawl_delay);
        }

        let mut attempt = 0u32;
        loop {
            self.politeness.wait(target.id, interval).await;
            let result = {
                let _permit = self.permit(&url).await?;
                target.last_fetched_at = Some(OffsetDateTime::now_utc());
                self.attempt(&url, accept).await
            };
            match result {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(
                        target_id = target.id,
                        attempt,
                        ?delay,
                        error = %e,
                        "retrying fetch"
                    );
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The host's robots rules. A robots.txt request counts against the
    /// target's politeness slot and the in-flight cap like any other.
    async fn robots_for(&self, id: TargetId, url: &Url) -> Result<Robots, FetchError> {
        if let Some(rules) = self.robots.cached(url) {
            return Ok(rules);
        }
        self.politeness.wait(id, self.min_interval).await;
        let _permit = self.permit(url).await?;
        Ok(self.robots.rules(&self.client, url).await)
    }

    async fn permit(&self, url: &Url) -> Result<SemaphorePermit<'_>, FetchError> {
        self.permits.acquire().await.map_err(|_| FetchError::Connection {
            url: url.to_string(),
            message: "fetcher closed".into(),
        })
    }

    /// Stop handing out request permits; pending fetches fail fast.
    pub fn close(&self) {
        self.permits.close();
    }

    async fn attempt(&self, url: &Url, accept: &str) -> Result<RawPayload, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http { url: url.to_string(), status: status.as_u16() });
        }
        if resp.content_length().is_some_and(|n| n as usize > self.max_body_bytes) {
            return Err(FetchError::TooLarge { url: url.to_string(), limit: self.max_body_bytes });
        }
        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;
        if bytes.len() > self.max_body_bytes {
            return Err(FetchError::TooLarge { url: url.to_string(), limit: self.max_body_bytes });
        }
        Ok(RawPayload {
            body: String::from_utf8_lossy(&bytes).into_owned(),
            final_url,
            status: status.as_u16(),
            content_type,
            fetched_at: OffsetDateTime::now_utc(),
        })
    }
}

pub fn parse_target_url(raw: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl { url: raw.to_string(), reason };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(invalid("expected an http(s) URL with a host".into())),
    }
}
