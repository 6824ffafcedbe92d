// src/ingest/providers/github.rs
//! Repository activity from the GitHub search API.
//!
//! Each configured query is sent as `"{query} pushed:>={date}"`. The server
//! side date is clamped to `window_days` because search only filters by day;
//! the exact `since` is applied again in-process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use futures::future::join_all;
use metrics::counter;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::warn;

use super::{log_adapter_stats, AdapterDeps};
use crate::config::{GithubSettings, Settings};
use crate::http::FetchError;
use crate::ingest::envelope::{date_field, str_field, u64_field, Envelope};
use crate::ingest::stats::{AdapterStats, FailureTracker, SubSourceKind};
use crate::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};

/// Below this many remaining requests the adapter warns.
pub const RATE_LIMIT_WARN_BELOW: u64 = 5;

pub struct GithubAdapter {
    deps: AdapterDeps,
    settings: GithubSettings,
    failures: FailureTracker,
}

/// Earliest date the search query asks for: `since`, but never older than `window_days`.
pub fn search_floor(since: NaiveDateTime, now: NaiveDateTime, window_days: i64) -> NaiveDateTime {
    since.max(now - Duration::days(window_days.max(1)))
}

pub fn search_query(query: &str, floor: NaiveDateTime) -> String {
    format!("{} pushed:>={}", query.trim(), floor.format("%Y-%m-%d"))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Returns the remaining quota when it's critically low.
pub fn check_rate_limit(query: &str, headers: &HeaderMap) -> Option<u64> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    if remaining >= RATE_LIMIT_WARN_BELOW {
        return None;
    }
    let reset = header_u64(headers, "x-ratelimit-reset").and_then(reset_time);
    warn!(
        target: "ingest",
        adapter = "github",
        query,
        remaining,
        reset = reset.as_deref().unwrap_or("unknown"),
        "GitHub rate limit nearly exhausted"
    );
    Some(remaining)
}

fn reset_time(epoch: u64) -> Option<String> {
    chrono::DateTime::from_timestamp(epoch as i64, 0).map(|dt| dt.naive_utc().to_string())
}

/// A 403/429 with an exhausted quota gets the reset hint instead of a bare failure.
pub fn warn_quota_exhausted(query: &str, err: &FetchError) -> bool {
    let Some(reset) = err.quota_reset() else {
        return false;
    };
    warn!(
        target: "ingest",
        adapter = "github",
        query,
        status = err.status().unwrap_or_default(),
        reset = reset_time(reset).as_deref().unwrap_or("unknown"),
        "GitHub rate limit exhausted; query skipped until reset"
    );
    true
}

pub fn repo_to_signal(rec: &Map<String, Value>, query: &str) -> Option<Signal> {
    let published = date_field(rec, &["pushed_at", "updated_at"])?.timestamp();
    let mut s = Signal::new(SourceKind::Github, query)
        .with_content(
            str_field(rec, &["full_name", "name"]).unwrap_or_default(),
            str_field(rec, &["description"]).unwrap_or_default(),
            str_field(rec, &["html_url"]).unwrap_or_default(),
        )
        .published(Some(published));
    s.external_id = str_field(rec, &["id"]);
    s.engagement.stars = u64_field(rec, "stargazers_count");
    s.engagement.forks = u64_field(rec, "forks_count");
    Some(s)
}

impl GithubAdapter {
    pub fn new(settings: &Settings, deps: AdapterDeps) -> Self {
        Self {
            deps,
            settings: settings.github.clone(),
            failures: FailureTracker::new(),
        }
    }

    async fn search(&self, query: &str, since: NaiveDateTime, floor: NaiveDateTime) -> Result<Vec<Signal>> {
        let auth = self.settings.token.as_deref().filter(|t| !t.is_empty()).map(|t| format!("Bearer {t}"));
        let mut headers: Vec<(&str, &str)> = vec![
            ("Accept", "application/vnd.github+json"),
            ("X-GitHub-Api-Version", "2022-11-28"),
        ];
        if let Some(a) = auth.as_deref() {
            headers.push(("Authorization", a));
        }
        let params = [
            ("q", search_query(query, floor)),
            ("sort", "updated".to_string()),
            ("order", "desc".to_string()),
            ("per_page", self.settings.per_page.clamp(1, 100).to_string()),
        ];

        let resp = match self
            .deps
            .client
            .get_json_with_headers(&self.deps.endpoints.github_search, &headers, &params)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn_quota_exhausted(query, &e);
                return Err(e).with_context(|| format!("github search {query:?}"));
            }
        };
        check_rate_limit(query, &resp.headers);

        Ok(Envelope::negotiate(resp.body, &["items"])
            .into_records("github")
            .iter()
            .filter_map(|rec| repo_to_signal(rec, query))
            .filter(|s| s.published_at.is_some_and(|p| p >= since))
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    async fn ingest(&self, since: NaiveDateTime) -> Result<IngestOutput> {
        let now = chrono::Utc::now().naive_utc();
        let floor = search_floor(since, now, self.settings.window_days);
        let sem = Semaphore::new(self.settings.concurrency.max(1));

        let results = join_all(self.settings.queries.iter().map(|q| {
            let sem = &sem;
            async move {
                let _permit = sem.acquire().await.ok();
                (q.as_str(), self.search(q, since, floor).await)
            }
        }))
        .await;

        let mut stats = AdapterStats::default();
        let mut signals = Vec::new();
        for (query, res) in results {
            match res {
                Ok(items) => {
                    stats.record_success(SubSourceKind::Api, items.len(), false);
                    self.failures.record_success(query);
                    signals.extend(items);
                }
                Err(e) => {
                    stats.record_failure(SubSourceKind::Api, &e);
                    counter!("ingest_provider_errors_total", "adapter" => self.name()).increment(1);
                    self.failures.warn_failure(self.name(), SubSourceKind::Api, query, &e);
                }
            }
        }

        log_adapter_stats(self.name(), &stats, signals.len());
        Ok(IngestOutput { signals, stats })
    }

    fn name(&self) -> &'static str {
        "github"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap().and_hms_opt(6, 0, 0).unwrap()
    }

    #[test]
    fn floor_is_clamped_to_window() {
        assert_eq!(search_floor(day(1), day(20), 7), day(13));
        assert_eq!(search_floor(day(18), day(20), 7), day(18));
        assert_eq!(search_query(" topic:defi ", day(13)), "topic:defi pushed:>=2024-03-13");
    }

    #[test]
    fn maps_repo_fields() {
        let Value::Object(rec) = json!({
            "id": 42,
            "full_name": "acme/rollup",
            "html_url": "https://github.com/acme/rollup",
            "description": "Fast rollup",
            "pushed_at": "2024-03-19T10:00:00Z",
            "stargazers_count": 120,
            "forks_count": 7
        }) else {
            unreachable!()
        };
        let s = repo_to_signal(&rec, "topic:rollup").unwrap();
        assert_eq!(s.title, "acme/rollup");
        assert_eq!(s.external_id.as_deref(), Some("42"));
        assert_eq!(s.engagement.stars, 120);
        assert_eq!(s.engagement.forks, 7);
        assert_eq!(s.published_at, Some(day(19) + Duration::hours(4)));
    }

    #[test]
    fn warns_only_when_quota_low() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("30"));
        assert_eq!(check_rate_limit("q", &h), None);
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("2"));
        h.insert("x-ratelimit-reset", HeaderValue::from_static("1710000000"));
        assert_eq!(check_rate_limit("q", &h), Some(2));
    }

    #[test]
    fn exhausted_quota_is_recognised() {
        let spent = FetchError::NonRetryable {
            url: "u".into(),
            status: Some(403),
            quota_reset: Some(1_710_000_000),
            message: "HTTP 403".into(),
        };
        assert!(warn_quota_exhausted("q", &spent));
        assert_eq!(spent.kind(), "rate_limited");

        let denied = FetchError::NonRetryable {
            url: "u".into(),
            status: Some(403),
            quota_reset: None,
            message: "HTTP 403".into(),
        };
        assert!(!warn_quota_exhausted("q", &denied));
    }
}
