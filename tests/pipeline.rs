// tests/pipeline.rs
//
// Orchestrator behaviour with in-process adapters: partial failure, panics,
// cross-run dedup, checkpointing, run lock and manual quota.

mod common;

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};

use signal_ingest::ingest::types::{IngestOutput, Signal, SourceAdapter, SourceKind};
use signal_ingest::pipeline::{PipelineRunner, RunOptions, RunOutcome};

struct Fixed {
    name: &'static str,
    signals: Vec<Signal>,
}

#[async_trait]
impl SourceAdapter for Fixed {
    async fn ingest(&self, _since: NaiveDateTime) -> anyhow::Result<IngestOutput> {
        Ok(self.signals.clone().into())
    }
    fn name(&self) -> &'static str {
        self.name
    }
}

struct Failing;

#[async_trait]
impl SourceAdapter for Failing {
    async fn ingest(&self, _since: NaiveDateTime) -> anyhow::Result<IngestOutput> {
        Err(anyhow!("upstream exploded"))
    }
    fn name(&self) -> &'static str {
        "failing"
    }
}

struct Panicking;

#[async_trait]
impl SourceAdapter for Panicking {
    async fn ingest(&self, _since: NaiveDateTime) -> anyhow::Result<IngestOutput> {
        panic!("adapter bug");
    }
    fn name(&self) -> &'static str {
        "panicking"
    }
}

fn signal(source: SourceKind, title: &str, url: &str, hours_ago: i64) -> Signal {
    Signal::new(source, "test")
        .with_content(title, format!("{title} details"), url)
        .published(Some(Utc::now().naive_utc() - Duration::hours(hours_ago)))
}

fn adapters() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(Fixed {
            name: "news",
            signals: vec![
                signal(SourceKind::News, "Ethereum staking grows", "https://a.example/eth?utm_source=x", 1),
                signal(SourceKind::News, "Solana DEX volume record", "https://a.example/sol", 3),
                // same story, different URL
                signal(SourceKind::News, "Ethereum staking grows", "https://b.example/eth-copy", 2),
            ],
        }),
        Arc::new(Fixed {
            name: "github",
            signals: vec![signal(SourceKind::Github, "acme/rollup", "https://github.com/acme/rollup", 5)],
        }),
        Arc::new(Failing),
        Arc::new(Panicking),
    ]
}

#[tokio::test]
async fn partial_failure_still_produces_summary() {
    let (dir, store) = common::temp_store().await;
    let settings = common::offline_settings(&dir.path().join("signals.db"));
    let runner = PipelineRunner::with_adapters(settings, store.clone(), adapters());

    let RunOutcome::Completed(summary) = runner.run(RunOptions::default()).await.unwrap() else {
        panic!("expected a completed run");
    };

    assert_eq!(summary.total_seen, 4);
    assert_eq!(summary.dedup.dropped_near, 1);
    assert_eq!(summary.kept, 3);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.adapter("news").unwrap().items, 3);
    assert!(summary.adapter("failing").unwrap().error.is_some());
    assert_eq!(summary.adapter("panicking").unwrap().error.as_deref(), Some("panic"));

    let stored = store
        .get_signals_since(Utc::now().naive_utc() - Duration::hours(24), None, None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.windows(2).all(|w| w[0].signal_score >= w[1].signal_score));
    assert!(stored.iter().all(|s| s.dedup_key.is_some() && s.content_hash.is_some()));
    assert!(stored.iter().any(|s| s.url == "https://a.example/eth"));

    assert!(store.get_last_run().await.unwrap().is_some());
}

#[tokio::test]
async fn second_run_inserts_nothing_new() {
    let (dir, store) = common::temp_store().await;
    let settings = common::offline_settings(&dir.path().join("signals.db"));
    let runner = PipelineRunner::with_adapters(settings, store.clone(), adapters());

    runner.run(RunOptions::default()).await.unwrap();
    let first_checkpoint = store.get_last_run().await.unwrap();
    let RunOutcome::Completed(again) = runner.run(RunOptions::default()).await.unwrap() else {
        panic!("expected a completed run");
    };

    assert_eq!(again.inserted, 0);
    assert_eq!(again.dedup.dropped_previous_run, 3);
    assert_eq!(store.count_signals().await.unwrap(), 3);
    // checkpoint moves even when nothing new arrived
    assert!(store.get_last_run().await.unwrap() >= first_checkpoint);
    assert_eq!(again.since, first_checkpoint.unwrap());
}

#[tokio::test]
async fn busy_when_lock_is_held() {
    let (dir, store) = common::temp_store().await;
    let settings = common::offline_settings(&dir.path().join("signals.db"));
    let runner = PipelineRunner::with_adapters(settings, store, adapters());

    let _guard = runner.lock().try_acquire().unwrap();
    let outcome = runner.run_manual(None).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Busy));
    assert_eq!(outcome.message(), "Pipeline already running, try again shortly.");
}

#[tokio::test]
async fn manual_runs_respect_daily_quota() {
    let (dir, store) = common::temp_store().await;
    let mut settings = common::offline_settings(&dir.path().join("signals.db"));
    settings.scheduler.max_manual_runs_per_day = 1;
    let runner = PipelineRunner::with_adapters(settings, store.clone(), adapters());

    assert!(matches!(runner.run_manual(None).await.unwrap(), RunOutcome::Completed(_)));
    assert!(matches!(
        runner.run_manual(None).await.unwrap(),
        RunOutcome::QuotaExhausted { limit: 1 }
    ));
    assert_eq!(store.manual_runs_on(Utc::now().date_naive()).await.unwrap(), 1);

    // scheduled runs are not counted
    assert!(matches!(runner.run_scheduled().await.unwrap(), RunOutcome::Completed(_)));
}

#[tokio::test]
async fn run_pipeline_with_no_sources_is_well_formed() {
    let (dir, store) = common::temp_store().await;
    let settings = common::offline_settings(&dir.path().join("signals.db"));
    let runner = PipelineRunner::new(settings, store).unwrap();

    let since = Utc::now().naive_utc() - Duration::hours(3);
    let RunOutcome::Completed(summary) = signal_ingest::run_pipeline(&runner, Some(since), false)
        .await
        .unwrap()
    else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.since, since);
    assert!(!summary.manual);
    assert_eq!(summary.total_seen, 0);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.adapters.len(), 5);
    assert!(summary.adapters.iter().all(|a| a.error.is_none()));
}

#[tokio::test]
async fn run_pipeline_respects_the_run_lock() {
    let (dir, store) = common::temp_store().await;
    let settings = common::offline_settings(&dir.path().join("signals.db"));
    let runner = PipelineRunner::new(settings, store.clone()).unwrap();

    let guard = runner.lock().try_acquire().unwrap();
    let since = Some(Utc::now().naive_utc() - Duration::hours(3));
    let outcome = signal_ingest::run_pipeline(&runner, since, false).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Busy));
    assert_eq!(store.get_last_run().await.unwrap(), None, "no run happened");

    drop(guard);
    let outcome = signal_ingest::run_pipeline(&runner, since, true).await.unwrap();
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run");
    };
    assert!(summary.manual);
    assert_eq!(store.manual_runs_on(Utc::now().date_naive()).await.unwrap(), 1);
}
