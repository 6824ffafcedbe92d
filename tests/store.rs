// tests/store.rs
mod common;

use chrono::{Duration, NaiveDate, Utc};

use signal_ingest::analyze::dedup::{content_hash, dedup_key, ContentHashIndex, CONTENT_HASH_PREFIX};
use signal_ingest::http::{FeedCache, FeedCacheEntry, PageCache};
use signal_ingest::ingest::types::{Signal, SourceKind};

fn keyed(source: SourceKind, title: &str, url: &str, hours_ago: i64, score: f64) -> Signal {
    let mut s = Signal::new(source, "test")
        .with_content(title, "", url)
        .published(Some(Utc::now().naive_utc() - Duration::hours(hours_ago)));
    s.dedup_key = Some(dedup_key(&s));
    s.content_hash = Some(content_hash(&s, CONTENT_HASH_PREFIX));
    s.signal_score = score;
    s
}

#[tokio::test]
async fn insert_is_idempotent_on_dedup_key() {
    let (_dir, store) = common::temp_store().await;
    let s = keyed(SourceKind::News, "One", "https://x.example/1", 1, 50.0);

    assert_eq!(store.insert_signals(std::slice::from_ref(&s)).await, 1);
    assert_eq!(store.insert_signals(std::slice::from_ref(&s)).await, 0);
    assert_eq!(store.count_signals().await.unwrap(), 1);

    let hash = s.content_hash.clone().unwrap();
    assert!(store.content_hash_exists(&hash).await.unwrap());
    assert!(!store.content_hash_exists("nope").await.unwrap());
}

#[tokio::test]
async fn query_filters_orders_and_limits() {
    let (_dir, store) = common::temp_store().await;
    store
        .insert_signals(&[
            keyed(SourceKind::News, "low", "https://x.example/low", 1, 10.0),
            keyed(SourceKind::News, "high", "https://x.example/high", 2, 90.0),
            keyed(SourceKind::Github, "repo", "https://github.com/a/b", 1, 70.0),
            keyed(SourceKind::News, "stale", "https://x.example/stale", 48, 99.0),
        ])
        .await;

    let since = Utc::now().naive_utc() - Duration::hours(24);
    let all = store.get_signals_since(since, None, None).await.unwrap();
    let titles: Vec<&str> = all.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["high", "repo", "low"]);

    let news = store
        .get_signals_since(since, Some(SourceKind::News), Some(1))
        .await
        .unwrap();
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].title, "high");
}

#[tokio::test]
async fn purge_removes_only_old_rows() {
    let (_dir, store) = common::temp_store().await;
    store
        .insert_signals(&[
            keyed(SourceKind::News, "fresh", "https://x.example/f", 1, 1.0),
            keyed(SourceKind::News, "ancient", "https://x.example/a", 24 * 40, 1.0),
        ])
        .await;
    assert_eq!(store.purge_older_than(30).await.unwrap(), 1);
    assert_eq!(store.db_stats().await.unwrap().signals, 1);
}

#[tokio::test]
async fn checkpoint_meta_and_quota() {
    let (_dir, store) = common::temp_store().await;
    assert_eq!(store.get_last_run().await.unwrap(), None);

    let at = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(8, 30, 0).unwrap();
    store.set_last_run(at).await.unwrap();
    assert_eq!(store.get_last_run().await.unwrap(), Some(at));

    store.set_meta("k", "v1").await.unwrap();
    store.set_meta("k", "v2").await.unwrap();
    assert_eq!(store.get_meta("k").await.unwrap().as_deref(), Some("v2"));

    let day = at.date();
    assert_eq!(store.try_consume_manual_run(day, 2).await.unwrap(), Some(1));
    assert_eq!(store.try_consume_manual_run(day, 2).await.unwrap(), Some(2));
    assert_eq!(store.try_consume_manual_run(day, 2).await.unwrap(), None);
    assert_eq!(store.manual_runs_on(day.succ_opt().unwrap()).await.unwrap(), 0);
}

#[tokio::test]
async fn feed_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/signals.db");
    {
        let store = signal_ingest::SqliteStore::connect(&path).await.unwrap();
        store
            .put(FeedCacheEntry {
                url: "https://feed.example/rss".into(),
                etag: Some("\"abc\"".into()),
                last_modified: None,
            })
            .await;
    }
    let store = signal_ingest::SqliteStore::connect(&path).await.unwrap();
    let entry = store.get("https://feed.example/rss").await.unwrap();
    assert_eq!(entry.etag.as_deref(), Some("\"abc\""));
}

#[tokio::test]
async fn page_cache_honours_max_age() {
    let (_dir, store) = common::temp_store().await;
    let url = "https://blog.example/";
    assert_eq!(store.get_page(url, Duration::hours(24)).await, None);

    store.put_page(url, "<html>v1</html>").await;
    store.put_page(url, "<html>v2</html>").await;
    assert_eq!(store.get_page(url, Duration::hours(24)).await.as_deref(), Some("<html>v2</html>"));
    assert_eq!(store.get_page(url, Duration::zero()).await, None, "stale entries read as a miss");
}
