// src/ingest/providers/ecosystem.rs
//! Chain and protocol announcements: foundation blogs, scraped landing pages
//! and Snapshot governance proposals.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{warn_unknown_api, AdapterDeps, ApiDispatch, FamilyRun};
use crate::config::{FamilySettings, Settings};
use crate::ingest::api_sources::{governance_from_snapshot, SNAPSHOT_PROPOSALS};
use crate::ingest::stats::FailureTracker;
use crate::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};

pub struct EcosystemAdapter {
    deps: AdapterDeps,
    family: FamilySettings,
    snapshot_spaces: Vec<String>,
    failures: FailureTracker,
}

impl EcosystemAdapter {
    pub fn new(settings: &Settings, deps: AdapterDeps) -> Self {
        Self {
            deps,
            family: settings.ingestion.ecosystem.clone(),
            snapshot_spaces: settings.ingestion.snapshot_spaces.clone(),
            failures: FailureTracker::new(),
        }
    }
}

#[async_trait]
impl ApiDispatch for EcosystemAdapter {
    async fn call_api(&self, name: &str, since: NaiveDateTime) -> Result<Vec<Signal>> {
        match name {
            SNAPSHOT_PROPOSALS => {
                governance_from_snapshot(
                    &self.deps.client,
                    &self.deps.endpoints,
                    since,
                    &self.snapshot_spaces,
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
impl SourceAdapter for EcosystemAdapter {
    async fn ingest(&self, since: NaiveDateTime) -> Result<IngestOutput> {
        let run = FamilyRun {
            adapter: self.name(),
            source: SourceKind::Ecosystem,
            deps: &self.deps,
            family: &self.family,
            failures: &self.failures,
        };
        Ok(run.run(since, self).await)
    }

    fn name(&self) -> &'static str {
        "ecosystem"
    }
}
