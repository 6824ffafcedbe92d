//! SQLite rolling store.
//!
//! Three tables: `signals` (one row per `dedup_key`, create-or-ignore), a
//! string key/value `meta` table holding the run checkpoint, feed-cache
//! validators and manual-run counters, and `page_cache` for scraped HTML.
//! WAL mode, created on first connect.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::analyze::dedup::ContentHashIndex;
use crate::http::{FeedCache, FeedCacheEntry, PageCache};
use crate::ingest::types::{Signal, SourceKind};

/// Stored timestamps are naive UTC in this fixed width so text order is time order.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub const LAST_RUN_KEY: &str = "last_run_timestamp";
const FEED_CACHE_PREFIX: &str = "feed_cache:";
const MANUAL_RUN_PREFIX: &str = "manual_run_count:";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt value for {key}: {value}")]
    Corrupt { key: String, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub fn format_ts(t: NaiveDateTime) -> String {
    t.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub signals: i64,
    pub meta_entries: i64,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and ensure the schema.
    pub async fn connect(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dedup_key TEXT NOT NULL UNIQUE,
                content_hash TEXT,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                published_at TEXT NOT NULL,
                signal_score REAL NOT NULL,
                payload_json TEXT NOT NULL,
                inserted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_published ON signals(published_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_content_hash ON signals(content_hash)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_cache (
                url TEXT PRIMARY KEY,
                fetched_at TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create-or-ignore each signal. Returns how many rows were new.
    /// A failing record is logged and skipped; the batch continues.
    pub async fn insert_signals(&self, signals: &[Signal]) -> usize {
        let now = format_ts(chrono::Utc::now().naive_utc());
        let mut inserted = 0usize;
        for s in signals {
            match self.insert_one(s, &now).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => warn!(target: "store", url = %s.url, error = %e, "insert failed; skipping record"),
            }
        }
        inserted
    }

    async fn insert_one(&self, s: &Signal, inserted_at: &str) -> StoreResult<bool> {
        let key = match &s.dedup_key {
            Some(k) => k.clone(),
            None => crate::analyze::dedup::dedup_key(s),
        };
        let published = format_ts(
            s.published_at
                .unwrap_or_else(|| chrono::Utc::now().naive_utc()),
        );
        let payload = serde_json::to_string(s)?;

        let res = sqlx::query(
            r#"
            INSERT INTO signals
                (dedup_key, content_hash, source, title, url, published_at, signal_score, payload_json, inserted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(dedup_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(&s.content_hash)
        .bind(s.source.as_str())
        .bind(&s.title)
        .bind(&s.url)
        .bind(&published)
        .bind(s.signal_score)
        .bind(&payload)
        .bind(inserted_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Signals published at or after `since`, best score first, then newest.
    pub async fn get_signals_since(
        &self,
        since: NaiveDateTime,
        source: Option<SourceKind>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Signal>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows: Vec<(String,)> = match source {
            Some(src) => {
                sqlx::query_as(
                    r#"
                    SELECT payload_json FROM signals
                    WHERE published_at >= ? AND source = ?
                    ORDER BY signal_score DESC, published_at DESC, dedup_key ASC
                    LIMIT ?
                    "#,
                )
                .bind(format_ts(since))
                .bind(src.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT payload_json FROM signals
                    WHERE published_at >= ?
                    ORDER BY signal_score DESC, published_at DESC, dedup_key ASC
                    LIMIT ?
                    "#,
                )
                .bind(format_ts(since))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for (json,) in rows {
            match serde_json::from_str::<Signal>(&json) {
                Ok(s) => out.push(s),
                Err(e) => warn!(target: "store", error = %e, "skipping undecodable row"),
            }
        }
        Ok(out)
    }

    pub async fn get_last_run(&self) -> StoreResult<Option<NaiveDateTime>> {
        match self.get_meta(LAST_RUN_KEY).await? {
            None => Ok(None),
            Some(v) => parse_ts(&v).map(Some).ok_or(StoreError::Corrupt {
                key: LAST_RUN_KEY.into(),
                value: v,
            }),
        }
    }

    pub async fn set_last_run(&self, at: NaiveDateTime) -> StoreResult<()> {
        self.set_meta(LAST_RUN_KEY, &format_ts(at)).await
    }

    /// Delete signals published more than `days` ago, and cached pages fetched
    /// before the same cutoff. Returns signal rows removed.
    pub async fn purge_older_than(&self, days: i64) -> StoreResult<u64> {
        let cutoff = format_ts(chrono::Utc::now().naive_utc() - Duration::days(days.max(0)));
        let res = sqlx::query("DELETE FROM signals WHERE published_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM page_cache WHERE fetched_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn cached_page(&self, url: &str) -> StoreResult<Option<(String, String)>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT body, fetched_at FROM page_cache WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn store_page(&self, url: &str, body: &str, at: NaiveDateTime) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO page_cache (url, fetched_at, body) VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET fetched_at = excluded.fetched_at, body = excluded.body
            "#,
        )
        .bind(url)
        .bind(format_ts(at))
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let v: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(v)
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_signals(&self) -> StoreResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM signals")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn db_stats(&self) -> StoreResult<DbStats> {
        let meta_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM meta")
            .fetch_one(&self.pool)
            .await?;
        Ok(DbStats {
            signals: self.count_signals().await?,
            meta_entries,
        })
    }

    /// Manual runs recorded for `day`.
    pub async fn manual_runs_on(&self, day: NaiveDate) -> StoreResult<u32> {
        let key = format!("{MANUAL_RUN_PREFIX}{}", day.format("%Y-%m-%d"));
        Ok(self
            .get_meta(&key)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }

    /// Take one manual run from today's quota. `Ok(None)` when exhausted,
    /// otherwise the count including this run.
    pub async fn try_consume_manual_run(&self, day: NaiveDate, limit: u32) -> StoreResult<Option<u32>> {
        let used = self.manual_runs_on(day).await?;
        if used >= limit {
            return Ok(None);
        }
        let key = format!("{MANUAL_RUN_PREFIX}{}", day.format("%Y-%m-%d"));
        self.set_meta(&key, &(used + 1).to_string()).await?;
        Ok(Some(used + 1))
    }
}

#[async_trait]
impl ContentHashIndex for SqliteStore {
    async fn content_hash_exists(&self, hash: &str) -> anyhow::Result<bool> {
        let hit: Option<i64> = sqlx::query_scalar("SELECT 1 FROM signals WHERE content_hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }
}

#[async_trait]
impl PageCache for SqliteStore {
    async fn get_page(&self, url: &str, max_age: Duration) -> Option<String> {
        let (body, fetched_at) = match self.cached_page(url).await {
            Ok(row) => row?,
            Err(e) => {
                debug!(target: "store", url, error = %e, "page cache read failed");
                return None;
            }
        };
        let fetched_at = parse_ts(&fetched_at)?;
        (chrono::Utc::now().naive_utc() - fetched_at < max_age).then_some(body)
    }

    async fn put_page(&self, url: &str, body: &str) {
        if let Err(e) = self.store_page(url, body, chrono::Utc::now().naive_utc()).await {
            debug!(target: "store", url, error = %e, "page cache write failed");
        }
    }
}

#[async_trait]
impl FeedCache for SqliteStore {
    async fn get(&self, url: &str) -> Option<FeedCacheEntry> {
        let raw = match self.get_meta(&format!("{FEED_CACHE_PREFIX}{url}")).await {
            Ok(v) => v?,
            Err(e) => {
                debug!(target: "store", url, error = %e, "feed cache read failed");
                return None;
            }
        };
        serde_json::from_str(&raw).ok()
    }

    async fn put(&self, entry: FeedCacheEntry) {
        let key = format!("{FEED_CACHE_PREFIX}{}", entry.url);
        let value = match serde_json::to_string(&entry) {
            Ok(v) => v,
            Err(_) => return,
        };
        if let Err(e) = self.set_meta(&key, &value).await {
            debug!(target: "store", url = %entry.url, error = %e, "feed cache write failed");
        }
    }
}
