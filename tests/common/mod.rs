// tests/common/mod.rs
//
// Shared helpers: a throwaway upstream HTTP server bound to 127.0.0.1:0,
// offline settings (no real network sources) and a temp SQLite store.
#![allow(dead_code)]

use std::path::Path;

use axum::Router;
use signal_ingest::config::{Settings, TwitterMode};
use signal_ingest::SqliteStore;
use tempfile::TempDir;

/// Serve `router` on an ephemeral local port; returns the base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

/// Defaults with every source list emptied and fast retries.
pub fn offline_settings(db_path: &Path) -> Settings {
    let mut s = Settings::default();
    s.http.max_attempts = 3;
    s.http.backoff_base_ms = 5;
    s.http.backoff_max_ms = 20;
    s.http.timeout_secs = 5;
    s.http.per_domain_delay_ms = 0;
    for fam in [
        &mut s.ingestion.news,
        &mut s.ingestion.funding,
        &mut s.ingestion.ecosystem,
    ] {
        fam.rss.clear();
        fam.web.clear();
        fam.api.clear();
    }
    s.ingestion.snapshot_spaces.clear();
    s.ingestion.coinmarketcap_api_key = None;
    s.github.queries.clear();
    s.github.token = None;
    s.twitter.mode = TwitterMode::None;
    s.twitter.rss.clear();
    s.storage.db_path = db_path.to_path_buf();
    s
}

pub async fn temp_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::connect(&dir.path().join("signals.db"))
        .await
        .expect("open store");
    (dir, store)
}

pub const RSS_FIXTURE: &str = include_str!("../fixtures/news_rss.xml");
pub const ATOM_FIXTURE: &str = include_str!("../fixtures/ecosystem_atom.xml");
