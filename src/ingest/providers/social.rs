// src/ingest/providers/social.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use metrics::counter;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{log_adapter_stats, AdapterDeps, FamilyRun, NoApis};
use crate::config::{FamilySettings, Settings, TwitterMode, TwitterSettings};
use crate::ingest::envelope::{date_field, str_field, u64_field, Envelope};
use crate::ingest::stats::{AdapterStats, FailureTracker, SubSourceKind};
use crate::ingest::truncate_chars;
use crate::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};

pub const X_RECENT_SEARCH: &str = "x_recent_search";
const TITLE_CHARS: usize = 80;

pub struct SocialAdapter {
    deps: AdapterDeps,
    settings: TwitterSettings,
    failures: FailureTracker,
}

pub fn tweet_url(id: &str) -> String {
    format!("https://x.com/i/web/status/{id}")
}

pub fn tweet_to_signal(rec: &Map<String, Value>) -> Option<Signal> {
    let id = str_field(rec, &["id"])?;
    let text = str_field(rec, &["text"]).unwrap_or_default();
    let published = date_field(rec, &["created_at"]).map(|p| p.timestamp());

    let mut s = Signal::new(SourceKind::Twitter, X_RECENT_SEARCH)
        .with_content(truncate_chars(&text, TITLE_CHARS), text, tweet_url(&id))
        .published(published);
    if let Some(Value::Object(m)) = rec.get("public_metrics") {
        s.engagement.likes = u64_field(m, "like_count");
        s.engagement.retweets = u64_field(m, "retweet_count");
        s.engagement.replies = u64_field(m, "reply_count");
    }
    s.external_id = Some(id);
    Some(s)
}

impl SocialAdapter {
    pub fn new(settings: &Settings, deps: AdapterDeps) -> Self {
        Self {
            deps,
            settings: settings.twitter.clone(),
            failures: FailureTracker::new(),
        }
    }

    async fn ingest_rss(&self, since: NaiveDateTime) -> IngestOutput {
        if self.settings.rss.is_empty() {
            info!(target: "ingest", adapter = self.name(), "twitter rss mode without sources; nothing to fetch");
            return IngestOutput::default();
        }
        let family = FamilySettings {
            rss: self.settings.rss.clone(),
            web: Vec::new(),
            api: Vec::new(),
            concurrency: self.settings.concurrency,
            web_max_items: 0,
        };
        FamilyRun {
            adapter: self.name(),
            source: SourceKind::Twitter,
            deps: &self.deps,
            family: &family,
            failures: &self.failures,
        }
        .run(since, &NoApis)
        .await
    }

    async fn recent_search(&self, since: NaiveDateTime) -> Result<Vec<Signal>> {
        let token = self
            .settings
            .bearer_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("twitter api mode requires TWITTER_BEARER_TOKEN"))?;
        let auth = format!("Bearer {token}");
        let params = [
            ("query", self.settings.query.clone()),
            ("max_results", self.settings.max_results.clamp(10, 100).to_string()),
            ("tweet.fields", "created_at,public_metrics,author_id".to_string()),
        ];
        let body = self
            .deps
            .client
            .get_json(&self.deps.endpoints.twitter_search, &[("Authorization", auth.as_str())], &params)
            .await
            .context("x recent search")?;

        Ok(Envelope::negotiate(body, &["data"])
            .into_records(X_RECENT_SEARCH)
            .iter()
            .filter_map(tweet_to_signal)
            .filter(|s| s.published_at.map_or(true, |p| p >= since))
            .collect())
    }

    async fn ingest_api(&self, since: NaiveDateTime) -> IngestOutput {
        let mut stats = AdapterStats::default();
        let signals = match self.recent_search(since).await {
            Ok(items) => {
                stats.record_success(SubSourceKind::Api, items.len(), false);
                self.failures.record_success(X_RECENT_SEARCH);
                items
            }
            Err(e) => {
                stats.record_failure(SubSourceKind::Api, &e);
                counter!("ingest_provider_errors_total", "adapter" => self.name()).increment(1);
                self.failures
                    .warn_failure(self.name(), SubSourceKind::Api, X_RECENT_SEARCH, &e);
                Vec::new()
            }
        };
        log_adapter_stats(self.name(), &stats, signals.len());
        IngestOutput { signals, stats }
    }
}

#[async_trait]
impl SourceAdapter for SocialAdapter {
    async fn ingest(&self, since: NaiveDateTime) -> Result<IngestOutput> {
        Ok(match self.settings.mode {
            TwitterMode::None => {
                debug!(target: "ingest", adapter = self.name(), "social ingestion disabled");
                IngestOutput::default()
            }
            TwitterMode::Rss => self.ingest_rss(since).await,
            TwitterMode::Api => self.ingest_api(since).await,
        })
    }

    fn name(&self) -> &'static str {
        "social"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_tweet_metrics_and_id() {
        let text = "Mainnet launch for the new zk rollup is live today, bridge opens at noon UTC for everyone";
        let Value::Object(rec) = json!({
            "id": "1790000000000000001",
            "text": text,
            "created_at": "2024-05-01T12:00:00.000Z",
            "public_metrics": {"like_count": 10, "retweet_count": 3, "reply_count": 2}
        }) else {
            unreachable!()
        };
        let s = tweet_to_signal(&rec).unwrap();
        assert_eq!(s.title.chars().count(), TITLE_CHARS);
        assert_eq!(s.description, text);
        assert_eq!(s.url, "https://x.com/i/web/status/1790000000000000001");
        assert_eq!(s.external_id.as_deref(), Some("1790000000000000001"));
        assert_eq!((s.engagement.likes, s.engagement.retweets, s.engagement.replies), (10, 3, 2));
    }

    #[test]
    fn tweet_without_id_is_skipped() {
        let Value::Object(rec) = json!({"text": "no id"}) else { unreachable!() };
        assert!(tweet_to_signal(&rec).is_none());
    }
}
