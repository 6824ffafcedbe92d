//! # Resilient fetch client
//!
//! Thin wrapper over `reqwest::Client` used by every source adapter.
//!
//! - Bounded retries with exponential backoff plus random jitter.
//! - Two-way error taxonomy: [`FetchError::Retryable`] (5xx, 429, timeouts,
//!   transport hiccups) vs [`FetchError::NonRetryable`] (other 4xx, DNS failure,
//!   malformed request/URL, undecodable JSON).
//! - Conditional GET for feed polling (`If-None-Match` / `If-Modified-Since`)
//!   backed by a [`FeedCache`].
//!
//! Nothing here panics or surfaces any error type other than [`FetchError`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use reqwest::header::{
    HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER,
};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::HttpSettings;

/// Error surfaced by every fetch operation.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("retryable fetch failure for {url} (status={status:?}): {message}")]
    Retryable {
        url: String,
        status: Option<u16>,
        /// Server-provided `Retry-After` hint (429 / 503).
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("non-retryable fetch failure for {url} (status={status:?}): {message}")]
    NonRetryable {
        url: String,
        status: Option<u16>,
        /// Epoch seconds from `x-ratelimit-reset` when the 4xx came with
        /// `x-ratelimit-remaining: 0`.
        quota_reset: Option<u64>,
        message: String,
    },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Retryable { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Retryable { status, .. } | FetchError::NonRetryable { status, .. } => {
                *status
            }
        }
    }

    /// Set when a 4xx was caused by an exhausted API quota.
    pub fn quota_reset(&self) -> Option<u64> {
        match self {
            FetchError::NonRetryable { quota_reset, .. } => *quota_reset,
            FetchError::Retryable { .. } => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Retryable { retry_after, .. } => *retry_after,
            FetchError::NonRetryable { .. } => None,
        }
    }

    /// Short stable label used as an error-count key in adapter stats.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Retryable { status: Some(429), .. } => "rate_limited",
            FetchError::Retryable { .. } => "retryable_exhausted",
            FetchError::NonRetryable { quota_reset: Some(_), .. } => "rate_limited",
            FetchError::NonRetryable { status: Some(_), .. } => "http_client_error",
            FetchError::NonRetryable { .. } => "non_retryable",
        }
    }
}

/// Exponential backoff with jitter.
///
/// Delay for attempt `n` (1-based) is `base * 2^(n-1)` plus jitter in `[0, base)`,
/// capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_settings(s: &HttpSettings) -> Self {
        Self {
            max_attempts: s.max_attempts.clamp(1, 10),
            base: Duration::from_millis(s.backoff_base_ms),
            max: Duration::from_millis(s.backoff_max_ms.max(s.backoff_base_ms)),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base.saturating_mul(1u32 << exp);
        let base_ms = self.base.as_millis() as u64;
        let jitter = if base_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..base_ms))
        } else {
            Duration::ZERO
        };
        (backoff + jitter).min(self.max)
    }
}

/// Validator pair remembered per feed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCacheEntry {
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Storage for conditional-fetch validators. Implementations must swallow their
/// own failures: a broken cache degrades to unconditional fetches.
#[async_trait]
pub trait FeedCache: Send + Sync {
    async fn get(&self, url: &str) -> Option<FeedCacheEntry>;
    async fn put(&self, entry: FeedCacheEntry);
}

/// Scraped HTML kept for a while so frequent runs don't hit the same page.
/// Like [`FeedCache`], failures are swallowed and read as a miss.
#[async_trait]
pub trait PageCache: Send + Sync {
    /// Body stored less than `max_age` ago.
    async fn get_page(&self, url: &str, max_age: chrono::Duration) -> Option<String>;
    async fn put_page(&self, url: &str, body: &str);
}

/// Process-local cache, used when no persistent store is wired in.
#[derive(Debug, Default)]
pub struct MemoryFeedCache {
    inner: Mutex<HashMap<String, FeedCacheEntry>>,
}

#[async_trait]
impl FeedCache for MemoryFeedCache {
    async fn get(&self, url: &str) -> Option<FeedCacheEntry> {
        self.inner.lock().ok()?.get(url).cloned()
    }

    async fn put(&self, entry: FeedCacheEntry) {
        if let Ok(mut g) = self.inner.lock() {
            g.insert(entry.url.clone(), entry);
        }
    }
}

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    Modified(String),
    NotModified,
}

impl Conditional {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Conditional::NotModified)
    }
}

/// JSON body plus the response headers (GitHub rate-limit inspection).
#[derive(Debug)]
pub struct JsonResponse {
    pub body: serde_json::Value,
    pub headers: HeaderMap,
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<String>,
}

/// Shared HTTP session for one pipeline run.
#[derive(Clone)]
pub struct FetchClient {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl FetchClient {
    /// Build the session. Failure here is the one precondition violation that
    /// propagates out of a pipeline run.
    pub fn new(settings: &HttpSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)))
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            policy: RetryPolicy::from_settings(settings),
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn get_text(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        params: &[(&str, String)],
    ) -> Result<String, FetchError> {
        let raw = self
            .execute(url, false, || self.request_get(url, headers, params))
            .await?;
        Ok(raw.body.unwrap_or_default())
    }

    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, FetchError> {
        Ok(self.get_json_with_headers(url, headers, params).await?.body)
    }

    pub async fn get_json_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        params: &[(&str, String)],
    ) -> Result<JsonResponse, FetchError> {
        let raw = self
            .execute(url, false, || self.request_get(url, headers, params))
            .await?;
        let body = parse_json(url, raw.body.as_deref().unwrap_or_default())?;
        Ok(JsonResponse {
            body,
            headers: raw.headers,
        })
    }

    pub async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        headers: &[(&str, &str)],
    ) -> Result<serde_json::Value, FetchError> {
        let raw = self
            .execute(url, false, || {
                let mut rb = self.http.post(url).json(payload);
                for (k, v) in headers {
                    rb = rb.header(*k, *v);
                }
                rb
            })
            .await?;
        parse_json(url, raw.body.as_deref().unwrap_or_default())
    }

    /// Conditional GET. Validators come from `cache`; on a fresh 200 the new
    /// `ETag` / `Last-Modified` are written back.
    pub async fn get_conditional(
        &self,
        url: &str,
        cache: Option<&dyn FeedCache>,
    ) -> Result<Conditional, FetchError> {
        let cached = match cache {
            Some(c) => c.get(url).await,
            None => None,
        };

        let raw = self
            .execute(url, true, || {
                let mut rb = self.http.get(url).header(
                    reqwest::header::ACCEPT,
                    "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
                );
                if let Some(entry) = &cached {
                    if let Some(etag) = &entry.etag {
                        rb = rb.header(IF_NONE_MATCH, etag);
                    }
                    if let Some(lm) = &entry.last_modified {
                        rb = rb.header(IF_MODIFIED_SINCE, lm);
                    }
                }
                rb
            })
            .await?;

        if raw.status == StatusCode::NOT_MODIFIED {
            debug!(target: "http", url, "304 not modified");
            return Ok(Conditional::NotModified);
        }

        if let Some(c) = cache {
            let etag = header_string(&raw.headers, ETAG);
            let last_modified = header_string(&raw.headers, LAST_MODIFIED);
            if etag.is_some() || last_modified.is_some() {
                c.put(FeedCacheEntry {
                    url: url.to_string(),
                    etag,
                    last_modified,
                })
                .await;
            }
        }

        Ok(Conditional::Modified(raw.body.unwrap_or_default()))
    }

    fn request_get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        params: &[(&str, String)],
    ) -> RequestBuilder {
        let mut rb = self.http.get(url);
        if !params.is_empty() {
            rb = rb.query(params);
        }
        for (k, v) in headers {
            rb = rb.header(*k, *v);
        }
        rb
    }

    /// Retry loop shared by every verb.
    async fn execute<F>(
        &self,
        url: &str,
        allow_not_modified: bool,
        build: F,
    ) -> Result<RawResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.attempt_once(url, allow_not_modified, &build).await {
                Ok(raw) => return Ok(raw),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.policy.max_attempts {
                return Err(err);
            }

            let mut delay = self.policy.delay_for(attempt);
            if let Some(hint) = err.retry_after() {
                delay = delay.max(hint.min(self.policy.max));
            }
            counter!("http_retries_total").increment(1);
            warn!(
                target: "http",
                url,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_once<F>(
        &self,
        url: &str,
        allow_not_modified: bool,
        build: &F,
    ) -> Result<RawResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = build()
            .send()
            .await
            .map_err(|e| classify_transport(url, &e))?;
        let status = resp.status();
        let headers = resp.headers().clone();

        if allow_not_modified && status == StatusCode::NOT_MODIFIED {
            return Ok(RawResponse {
                status,
                headers,
                body: None,
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Retryable {
                url: url.to_string(),
                status: Some(status.as_u16()),
                retry_after: parse_retry_after(&headers),
                message: "rate limited (429)".into(),
            });
        }
        if status.is_server_error() {
            return Err(FetchError::Retryable {
                url: url.to_string(),
                status: Some(status.as_u16()),
                retry_after: parse_retry_after(&headers),
                message: format!("server error {}", status.as_u16()),
            });
        }
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(FetchError::NonRetryable {
                url: url.to_string(),
                status: Some(status.as_u16()),
                quota_reset: exhausted_quota_reset(&headers),
                message: format!("HTTP {}: {}", status.as_u16(), snippet),
            });
        }

        let body = resp.text().await.map_err(|e| FetchError::Retryable {
            url: url.to_string(),
            status: Some(status.as_u16()),
            retry_after: None,
            message: format!("reading body: {e}"),
        })?;

        Ok(RawResponse {
            status,
            headers,
            body: Some(body),
        })
    }
}

fn parse_json(url: &str, body: &str) -> Result<serde_json::Value, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::NonRetryable {
        url: url.to_string(),
        status: None,
        quota_reset: None,
        message: format!("invalid json: {e}"),
    })
}

fn classify_transport(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_builder() || is_dns_failure(e) {
        return FetchError::NonRetryable {
            url: url.to_string(),
            status: None,
            quota_reset: None,
            message: e.to_string(),
        };
    }
    // timeouts, resets, refused connections
    FetchError::Retryable {
        url: url.to_string(),
        status: None,
        retry_after: None,
        message: e.to_string(),
    }
}

/// reqwest has no dedicated DNS error kind; walk the source chain instead.
fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = cur {
        let msg = err.to_string().to_ascii_lowercase();
        if msg.contains("dns error")
            || msg.contains("failed to lookup address")
            || msg.contains("name or service not known")
            || msg.contains("no such host")
        {
            return true;
        }
        cur = err.source();
    }
    false
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `x-ratelimit-reset`, but only when `x-ratelimit-remaining` says the quota is gone.
pub fn exhausted_quota_reset(headers: &HeaderMap) -> Option<u64> {
    let num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    if num("x-ratelimit-remaining")? > 0 {
        return None;
    }
    num("x-ratelimit-reset")
}

/// `Retry-After` is either delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = header_string(headers, RETRY_AFTER)?;
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(&raw).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let p = policy();
        let d1 = p.delay_for(1);
        let d2 = p.delay_for(2);
        let d3 = p.delay_for(3);
        assert!(d1 >= Duration::from_millis(100) && d1 < Duration::from_millis(200));
        assert!(d2 >= Duration::from_millis(200) && d2 < Duration::from_millis(300));
        assert!(d3 >= Duration::from_millis(400) && d3 < Duration::from_millis(500));
        assert!(d1 < d2 && d2 < d3);
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy {
            max: Duration::from_millis(250),
            ..policy()
        };
        assert_eq!(p.delay_for(6), Duration::from_millis(250));
    }

    #[test]
    fn retry_after_seconds_is_parsed() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(7)));
    }

    #[test]
    fn error_kinds_are_stable() {
        let e = FetchError::Retryable {
            url: "u".into(),
            status: Some(429),
            retry_after: None,
            message: String::new(),
        };
        assert_eq!(e.kind(), "rate_limited");
        assert!(e.is_retryable());
        let e = FetchError::NonRetryable {
            url: "u".into(),
            status: Some(404),
            quota_reset: None,
            message: String::new(),
        };
        assert_eq!(e.kind(), "http_client_error");
        assert!(!e.is_retryable());
    }

    #[test]
    fn quota_reset_needs_zero_remaining() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-reset", HeaderValue::from_static("1714651200"));
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert_eq!(exhausted_quota_reset(&h), None);
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert_eq!(exhausted_quota_reset(&h), Some(1_714_651_200));
        h.remove("x-ratelimit-reset");
        assert_eq!(exhausted_quota_reset(&h), None);
    }
}
