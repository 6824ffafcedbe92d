// src/ingest/providers/news.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{warn_unknown_api, AdapterDeps, ApiDispatch, FamilyRun};
use crate::config::{FamilySettings, Settings};
use crate::ingest::api_sources::{
    news_from_coinmarketcap, news_from_cryptocurrency_cv, COINMARKETCAP_POSTS, CRYPTOCURRENCY_CV,
};
use crate::ingest::stats::FailureTracker;
use crate::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};

pub struct NewsAdapter {
    deps: AdapterDeps,
    family: FamilySettings,
    cmc_api_key: Option<String>,
    failures: FailureTracker,
}

impl NewsAdapter {
    pub fn new(settings: &Settings, deps: AdapterDeps) -> Self {
        Self {
            deps,
            family: settings.ingestion.news.clone(),
            cmc_api_key: settings.ingestion.coinmarketcap_api_key.clone(),
            failures: FailureTracker::new(),
        }
    }
}

#[async_trait]
impl ApiDispatch for NewsAdapter {
    async fn call_api(&self, name: &str, since: NaiveDateTime) -> Result<Vec<Signal>> {
        match name {
            CRYPTOCURRENCY_CV => {
                news_from_cryptocurrency_cv(&self.deps.client, &self.deps.endpoints, since).await
            }
            COINMARKETCAP_POSTS => {
                news_from_coinmarketcap(
                    &self.deps.client,
                    &self.deps.endpoints,
                    since,
                    self.cmc_api_key.as_deref(),
                )
                .await
            }
            other => {
                warn_unknown_api(self.name(), other);
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for NewsAdapter {
    async fn ingest(&self, since: NaiveDateTime) -> Result<IngestOutput> {
        let run = FamilyRun {
            adapter: self.name(),
            source: SourceKind::News,
            deps: &self.deps,
            family: &self.family,
            failures: &self.failures,
        };
        Ok(run.run(since, self).await)
    }

    fn name(&self) -> &'static str {
        "news"
    }
}
