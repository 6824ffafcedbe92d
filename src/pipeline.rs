// src/pipeline.rs
//! One ingestion run: fan out to every adapter, then normalize, dedup, tag,
//! score, rank and persist the merged list.
//!
//! Adapters run as separate tokio tasks so an error or a panic in one of them
//! only costs that adapter's items. The only error that escapes a run is a
//! failure to build the shared HTTP client. Every entry point goes through
//! the runner's [`RunLock`], so a second caller gets [`RunOutcome::Busy`].

use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Utc};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::analyze::dedup::{DedupStats, Deduplicator};
use crate::analyze::scoring::Ranker;
use crate::analyze::tagging::{tag_all, KeywordTagger};
use crate::config::Settings;
use crate::http::{FeedCache, FetchClient, PageCache};
use crate::ingest::providers::{default_adapters, AdapterDeps};
use crate::ingest::stats::error_kind;
use crate::ingest::types::{Signal, SourceAdapter};
use crate::ingest::{ensure_metrics_described, normalize_all};
use crate::sentiment::{add_sentiment, SentimentAnalyzer};
use crate::store::SqliteStore;

pub const BUSY_MESSAGE: &str = "Pipeline already running, try again shortly.";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Explicit window start; wins over the stored checkpoint.
    pub since: Option<NaiveDateTime>,
    /// Operator-triggered run: counts against the daily quota and always
    /// looks back one rolling window.
    pub manual: bool,
}

/// Window start: explicit override, then manual lookback, then checkpoint,
/// then `now - window`.
pub fn resolve_since(
    explicit: Option<NaiveDateTime>,
    manual: bool,
    checkpoint: Option<NaiveDateTime>,
    now: NaiveDateTime,
    window_hours: i64,
) -> NaiveDateTime {
    let lookback = now - Duration::hours(window_hours.max(1));
    match (explicit, manual, checkpoint) {
        (Some(t), _, _) => t,
        (None, true, _) => lookback,
        (None, false, Some(cp)) => cp,
        (None, false, None) => lookback,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterReport {
    pub name: String,
    pub items: usize,
    pub duration_ms: u64,
    pub attempted: usize,
    pub failed: usize,
    /// Set when the adapter as a whole failed.
    pub error: Option<String>,
    pub top_errors: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub since: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub manual: bool,
    pub total_seen: usize,
    pub kept: usize,
    pub dedup: DedupStats,
    pub inserted: usize,
    pub purged: u64,
    pub duration_ms: u64,
    pub adapters: Vec<AdapterReport>,
}

impl RunSummary {
    pub fn adapter(&self, name: &str) -> Option<&AdapterReport> {
        self.adapters.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<RunSummary>),
    Busy,
    QuotaExhausted { limit: u32 },
}

impl RunOutcome {
    pub fn message(&self) -> String {
        match self {
            RunOutcome::Completed(s) => format!(
                "Run complete: {} new signals from {} seen.",
                s.inserted, s.total_seen
            ),
            RunOutcome::Busy => BUSY_MESSAGE.to_string(),
            RunOutcome::QuotaExhausted { limit } => {
                format!("Manual run limit reached ({limit} per day).")
            }
        }
    }
}

/// Non-blocking process-wide run lock. A second caller is turned away.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    inner: Arc<Mutex<()>>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.inner).try_lock_owned().ok()
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

pub struct PipelineRunner {
    settings: Arc<Settings>,
    store: SqliteStore,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    lock: RunLock,
    tagger: KeywordTagger,
    sentiment: SentimentAnalyzer,
}

impl PipelineRunner {
    /// Binds all adapters to one HTTP client. Failing to build it is the
    /// precondition error callers see.
    pub fn new(settings: Settings, store: SqliteStore) -> Result<Self> {
        let client = Arc::new(FetchClient::new(&settings.http)?);
        let feed_cache: Arc<dyn FeedCache> = Arc::new(store.clone());
        let page_cache: Arc<dyn PageCache> = Arc::new(store.clone());
        let deps = AdapterDeps::new(&settings, client, Some(feed_cache)).with_page_cache(page_cache);
        let adapters = default_adapters(&settings, &deps);
        Ok(Self::with_adapters(settings, store, adapters))
    }

    pub fn with_adapters(
        settings: Settings,
        store: SqliteStore,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Self {
        let tagger = KeywordTagger::from_settings(&settings.taxonomy);
        Self {
            settings: Arc::new(settings),
            store,
            adapters,
            lock: RunLock::new(),
            tagger,
            sentiment: SentimentAnalyzer::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    /// Take the lock (and for manual runs one unit of today's quota), then run.
    pub async fn run(&self, opts: RunOptions) -> Result<RunOutcome> {
        let Some(_guard) = self.lock.try_acquire() else {
            info!(target: "pipeline", manual = opts.manual, "run requested while another is in progress");
            return Ok(RunOutcome::Busy);
        };

        if opts.manual {
            let limit = self.settings.scheduler.max_manual_runs_per_day;
            let today = Utc::now().date_naive();
            match self.store.try_consume_manual_run(today, limit).await {
                Ok(Some(n)) => info!(target: "pipeline", used = n, limit, "manual run accepted"),
                Ok(None) => return Ok(RunOutcome::QuotaExhausted { limit }),
                Err(e) => warn!(target: "pipeline", error = %e, "manual quota check failed; allowing run"),
            }
        }

        let summary = self.execute(opts).await;
        Ok(RunOutcome::Completed(Box::new(summary)))
    }

    pub async fn run_scheduled(&self) -> Result<RunOutcome> {
        self.run(RunOptions::default()).await
    }

    pub async fn run_manual(&self, since: Option<NaiveDateTime>) -> Result<RunOutcome> {
        self.run(RunOptions { since, manual: true }).await
    }

    async fn execute(&self, opts: RunOptions) -> RunSummary {
        ensure_metrics_described();
        let started = Instant::now();
        let now = Utc::now().naive_utc();

        match self.store.db_stats().await {
            Ok(st) => info!(target: "pipeline", signals = st.signals, meta_entries = st.meta_entries, "store stats"),
            Err(e) => warn!(target: "pipeline", error = %e, "store stats unavailable"),
        }

        let checkpoint = match self.store.get_last_run().await {
            Ok(cp) => cp,
            Err(e) => {
                warn!(target: "pipeline", error = %e, "unreadable checkpoint; using default window");
                None
            }
        };
        let since = resolve_since(
            opts.since,
            opts.manual,
            checkpoint,
            now,
            self.settings.storage.rolling_window_hours,
        );
        info!(target: "pipeline", %since, manual = opts.manual, "pipeline run starting");

        let (raw, adapters) = self.ingest_all(since).await;
        let total_seen = raw.len();
        counter!("ingest_events_total").increment(total_seen as u64);

        let normalized = normalize_all(raw, now);
        let mut dedup = Deduplicator::new().with_index(&self.store);
        let unique = dedup.dedup(normalized).await;
        let tagged = tag_all(&self.tagger, unique);
        let scored = add_sentiment(&self.sentiment, tagged);
        let ranked = Ranker::new(&self.settings.ranking, now).rank(scored);
        let kept = ranked.len();

        let inserted = self.store.insert_signals(&ranked).await;
        counter!("ingest_inserted_total").increment(inserted as u64);

        if let Err(e) = self.store.set_last_run(now).await {
            warn!(target: "pipeline", error = %e, "failed to store checkpoint");
        }
        let purged = match self.store.purge_older_than(self.settings.storage.retention_days).await {
            Ok(n) => n,
            Err(e) => {
                warn!(target: "pipeline", error = %e, "purge failed");
                0
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        counter!("ingest_runs_total").increment(1);
        histogram!("ingest_run_ms").record(duration_ms as f64);
        gauge!("ingest_pipeline_last_run_ts").set(now.and_utc().timestamp() as f64);

        let summary = RunSummary {
            since,
            finished_at: now,
            manual: opts.manual,
            total_seen,
            kept,
            dedup: dedup.stats(),
            inserted,
            purged,
            duration_ms,
            adapters,
        };
        let json = serde_json::to_string(&summary).unwrap_or_default();
        info!(target: "pipeline", summary = %json, "pipeline run complete");
        summary
    }

    async fn ingest_all(&self, since: NaiveDateTime) -> (Vec<Signal>, Vec<AdapterReport>) {
        let handles = self.adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            tokio::spawn(async move {
                let t0 = Instant::now();
                let res = adapter.ingest(since).await;
                (res, t0.elapsed().as_millis() as u64)
            })
        });
        let joined = join_all(handles).await;

        let mut signals = Vec::new();
        let mut reports = Vec::with_capacity(joined.len());
        for (adapter, res) in self.adapters.iter().zip(joined) {
            let name = adapter.name();
            let mut report = AdapterReport {
                name: name.to_string(),
                ..Default::default()
            };
            match res {
                Ok((Ok(out), took)) => {
                    report.items = out.signals.len();
                    report.duration_ms = took;
                    report.attempted = out.stats.attempted();
                    report.failed = out.stats.failed();
                    report.top_errors = out.stats.top_errors(3);
                    signals.extend(out.signals);
                }
                Ok((Err(e), took)) => {
                    let kind = error_kind(&e);
                    warn!(target: "pipeline", adapter = name, error_kind = kind, error = %format!("{e:#}"), "adapter failed");
                    counter!("ingest_provider_errors_total", "adapter" => name).increment(1);
                    report.duration_ms = took;
                    report.error = Some(format!("{kind}: {e}"));
                }
                Err(join) => {
                    let kind = if join.is_panic() { "panic" } else { "cancelled" };
                    warn!(target: "pipeline", adapter = name, error_kind = kind, "adapter task aborted");
                    counter!("ingest_provider_errors_total", "adapter" => name).increment(1);
                    report.error = Some(kind.to_string());
                }
            }
            reports.push(report);
        }
        (signals, reports)
    }
}

/// One run through `runner`: its lock decides whether the run happens at all,
/// and `manual` runs are charged against the daily quota.
pub async fn run_pipeline(
    runner: &PipelineRunner,
    since: Option<NaiveDateTime>,
    manual: bool,
) -> Result<RunOutcome> {
    runner.run(RunOptions { since, manual }).await
}
