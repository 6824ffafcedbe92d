// src/ingest/providers/funding.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{warn_unknown_api, AdapterDeps, ApiDispatch, FamilyRun};
use crate::config::{FamilySettings, Settings};
use crate::ingest::api_sources::{funding_from_defillama_raises, DEFILLAMA_RAISES};
use crate::ingest::stats::FailureTracker;
use crate::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};

pub struct FundingAdapter {
    deps: AdapterDeps,
    family: FamilySettings,
    failures: FailureTracker,
}

impl FundingAdapter {
    pub fn new(settings: &Settings, deps: AdapterDeps) -> Self {
        Self {
            deps,
            family: settings.ingestion.funding.clone(),
            failures: FailureTracker::new(),
        }
    }
}

#[async_trait]
impl ApiDispatch for FundingAdapter {
    async fn call_api(&self, name: &str, since: NaiveDateTime) -> Result<Vec<Signal>> {
        match name {
            DEFILLAMA_RAISES => {
                funding_from_defillama_raises(&self.deps.client, &self.deps.endpoints, since).await
            }
            other => {
                warn_unknown_api(self.name(), other);
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for FundingAdapter {
    async fn ingest(&self, since: NaiveDateTime) -> Result<IngestOutput> {
        let run = FamilyRun {
            adapter: self.name(),
            source: SourceKind::Funding,
            deps: &self.deps,
            family: &self.family,
            failures: &self.failures,
        };
        Ok(run.run(since, self).await)
    }

    fn name(&self) -> &'static str {
        "funding"
    }
}
