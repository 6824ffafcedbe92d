// src/ingest/providers/mod.rs
pub mod ecosystem;
pub mod funding;
pub mod github;
pub mod news;
pub mod social;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::future::join_all;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::{Endpoints, FamilySettings, Settings};
use crate::http::{FeedCache, FetchClient, PageCache};
use crate::ingest::feed::fetch_feed_signals;
use crate::ingest::stats::{AdapterStats, FailureTracker, SubSourceKind};
use crate::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};
use crate::ingest::web::{scrape_page, DomainPacer, PageFetcher};

/// Shared collaborators every adapter is bound to for one process.
#[derive(Clone)]
pub struct AdapterDeps {
    pub client: Arc<FetchClient>,
    pub feed_cache: Option<Arc<dyn FeedCache>>,
    pub page_cache: Option<Arc<dyn PageCache>>,
    pub page_cache_ttl: chrono::Duration,
    pub pacer: Arc<DomainPacer>,
    pub endpoints: Endpoints,
}

impl AdapterDeps {
    pub fn new(
        settings: &Settings,
        client: Arc<FetchClient>,
        feed_cache: Option<Arc<dyn FeedCache>>,
    ) -> Self {
        Self {
            client,
            feed_cache,
            page_cache: None,
            page_cache_ttl: chrono::Duration::hours(settings.http.page_cache_ttl_hours.max(0)),
            pacer: Arc::new(DomainPacer::new(Duration::from_millis(
                settings.http.per_domain_delay_ms,
            ))),
            endpoints: settings.endpoints.clone(),
        }
    }

    pub fn with_page_cache(mut self, cache: Arc<dyn PageCache>) -> Self {
        self.page_cache = Some(cache);
        self
    }

    pub(crate) fn page_fetcher(&self) -> PageFetcher<'_> {
        PageFetcher {
            client: &self.client,
            pacer: &self.pacer,
            cache: self.page_cache.as_deref(),
            cache_ttl: self.page_cache_ttl,
        }
    }
}

/// All five adapters, configured from settings.
pub fn default_adapters(settings: &Settings, deps: &AdapterDeps) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(news::NewsAdapter::new(settings, deps.clone())),
        Arc::new(funding::FundingAdapter::new(settings, deps.clone())),
        Arc::new(ecosystem::EcosystemAdapter::new(settings, deps.clone())),
        Arc::new(github::GithubAdapter::new(settings, deps.clone())),
        Arc::new(social::SocialAdapter::new(settings, deps.clone())),
    ]
}

/// Resolves an adapter's named API sub-sources.
#[async_trait]
pub(crate) trait ApiDispatch: Send + Sync {
    /// Unknown names must warn and return no items.
    async fn call_api(&self, name: &str, since: NaiveDateTime) -> Result<Vec<Signal>>;
}

/// Placeholder for families without API sub-sources.
pub(crate) struct NoApis;

#[async_trait]
impl ApiDispatch for NoApis {
    async fn call_api(&self, name: &str, _since: NaiveDateTime) -> Result<Vec<Signal>> {
        warn_unknown_api("none", name);
        Ok(Vec::new())
    }
}

pub(crate) fn warn_unknown_api(adapter: &str, name: &str) {
    warn!(target: "ingest", adapter, api = name, "unknown API source; skipping");
}

enum SubSource<'a> {
    Rss(&'a str),
    Web(&'a str),
    Api(&'a str),
}

impl SubSource<'_> {
    fn kind(&self) -> SubSourceKind {
        match self {
            SubSource::Rss(_) => SubSourceKind::Rss,
            SubSource::Web(_) => SubSourceKind::Web,
            SubSource::Api(_) => SubSourceKind::Api,
        }
    }

    fn key(&self) -> &str {
        match self {
            SubSource::Rss(k) | SubSource::Web(k) | SubSource::Api(k) => k,
        }
    }
}

/// One source family fan-out: every RSS, web and API sub-source runs
/// concurrently under a semaphore; failures are counted and logged, never raised.
pub(crate) struct FamilyRun<'a> {
    pub adapter: &'static str,
    pub source: SourceKind,
    pub deps: &'a AdapterDeps,
    pub family: &'a FamilySettings,
    pub failures: &'a FailureTracker,
}

impl FamilyRun<'_> {
    pub async fn run(&self, since: NaiveDateTime, apis: &dyn ApiDispatch) -> IngestOutput {
        let sem = Semaphore::new(self.family.concurrency.max(1));
        let now = chrono::Utc::now().naive_utc();

        let subs: Vec<SubSource<'_>> = self
            .family
            .rss
            .iter()
            .map(|u| SubSource::Rss(u.as_str()))
            .chain(self.family.web.iter().map(|u| SubSource::Web(u.as_str())))
            .chain(self.family.api.iter().map(|n| SubSource::Api(n.as_str())))
            .collect();

        let results = join_all(subs.into_iter().map(|sub| {
            let sem = &sem;
            async move {
                let _permit = sem.acquire().await.ok();
                let res = self.fetch_one(&sub, since, now, apis).await;
                (sub, res)
            }
        }))
        .await;

        let mut stats = AdapterStats::default();
        let mut signals = Vec::new();
        for (sub, res) in results {
            match res {
                Ok((items, not_modified)) => {
                    stats.record_success(sub.kind(), items.len(), not_modified);
                    self.failures.record_success(sub.key());
                    signals.extend(items);
                }
                Err(e) => {
                    stats.record_failure(sub.kind(), &e);
                    counter!("ingest_provider_errors_total", "adapter" => self.adapter).increment(1);
                    self.failures
                        .warn_failure(self.adapter, sub.kind(), sub.key(), &e);
                }
            }
        }

        log_adapter_stats(self.adapter, &stats, signals.len());
        IngestOutput { signals, stats }
    }

    async fn fetch_one(
        &self,
        sub: &SubSource<'_>,
        since: NaiveDateTime,
        now: NaiveDateTime,
        apis: &dyn ApiDispatch,
    ) -> Result<(Vec<Signal>, bool)> {
        match sub {
            SubSource::Rss(url) => {
                let f = fetch_feed_signals(
                    &self.deps.client,
                    self.deps.feed_cache.as_deref(),
                    url,
                    since,
                    self.source,
                )
                .await?;
                Ok((f.signals, f.not_modified))
            }
            SubSource::Web(url) => {
                let items = scrape_page(
                    &self.deps.page_fetcher(),
                    url,
                    self.family.web_max_items,
                    self.source,
                    now,
                )
                .await?;
                Ok((items, false))
            }
            SubSource::Api(name) => Ok((apis.call_api(name, since).await?, false)),
        }
    }
}

pub(crate) fn log_adapter_stats(adapter: &str, stats: &AdapterStats, items: usize) {
    info!(
        target: "ingest",
        adapter,
        rss_attempted = stats.rss.attempted,
        rss_success = stats.rss.succeeded,
        rss_fail = stats.rss.failed,
        rss_304 = stats.rss.not_modified,
        web_attempted = stats.web.attempted,
        web_success = stats.web.succeeded,
        web_fail = stats.web.failed,
        api_attempted = stats.api.attempted,
        api_success = stats.api.succeeded,
        api_fail = stats.api.failed,
        items,
        top_errors = ?stats.top_errors(3),
        "adapter run"
    );
}
