// src/analyze/dedup.rs
//! Two-stage deduplication.
//!
//! 1. Exact key: stable external ID, else canonical URL, else a hash of the
//!    leading title+description text. Always namespaced by source.
//! 2. Near duplicate: hash of the lowercased leading `title + " " + description`,
//!    checked against this run and, when an index is wired in, previous runs.

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::ingest::types::Signal;

/// Chars of `title + " " + description` that feed the content hash.
pub const CONTENT_HASH_PREFIX: usize = 300;
/// Chars of `title + description` hashed when neither ID nor URL exists.
pub const KEY_TEXT_PREFIX: usize = 400;

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "ref", "ref_src", "referer", "source",
    "_ga", "igshid",
];

fn is_tracking_param(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_") || TRACKING_PARAMS.contains(&k.as_str())
}

/// Drop fragment and tracking params; remaining params sorted by key.
/// Unparseable input is returned trimmed but otherwise untouched.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    parsed.set_fragment(None);

    if parsed.query().is_some() {
        let mut pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();
        if pairs.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    parsed.to_string()
}

pub fn sha256_hex(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

/// Exact-duplicate identity. Expects `url` already canonical.
pub fn dedup_key(s: &Signal) -> String {
    let ns = s.source.as_str();
    if let Some(id) = s.external_id.as_deref().filter(|id| !id.trim().is_empty()) {
        return format!("{ns}:{}", sha256_hex(id.trim()));
    }
    if !s.url.is_empty() {
        return format!("{ns}:{}", sha256_hex(&s.url));
    }
    let text: String = format!("{}{}", s.title, s.description)
        .chars()
        .take(KEY_TEXT_PREFIX)
        .collect();
    format!("{ns}:{}", sha256_hex(&text))
}

/// Near-duplicate fingerprint over the first `prefix` chars.
pub fn content_hash(s: &Signal, prefix: usize) -> String {
    let text = format!(
        "{} {}",
        s.title.trim().to_lowercase(),
        s.description.trim().to_lowercase()
    );
    let head: String = text.chars().take(prefix).collect();
    sha256_hex(&head)
}

/// Persistent record of content hashes from earlier runs.
#[async_trait]
pub trait ContentHashIndex: Send + Sync {
    async fn content_hash_exists(&self, hash: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub dropped_exact: usize,
    /// In-run plus cross-run content-hash matches.
    pub dropped_near: usize,
    /// Subset of `dropped_near` matched against the persistent index.
    pub dropped_previous_run: usize,
}

pub struct Deduplicator<'a> {
    index: Option<&'a dyn ContentHashIndex>,
    content_prefix: usize,
    seen_keys: HashSet<String>,
    seen_hashes: HashSet<String>,
    stats: DedupStats,
}

impl Default for Deduplicator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Deduplicator<'a> {
    pub fn new() -> Self {
        Self {
            index: None,
            content_prefix: CONTENT_HASH_PREFIX,
            seen_keys: HashSet::new(),
            seen_hashes: HashSet::new(),
            stats: DedupStats::default(),
        }
    }

    pub fn with_index(mut self, index: &'a dyn ContentHashIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_content_prefix(mut self, chars: usize) -> Self {
        self.content_prefix = chars.max(1);
        self
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Survivors keep their relative order and carry `dedup_key` + `content_hash`.
    pub async fn dedup(&mut self, signals: Vec<Signal>) -> Vec<Signal> {
        let mut kept = Vec::with_capacity(signals.len());
        for mut s in signals {
            s.url = normalize_url(&s.url);

            let key = dedup_key(&s);
            if !self.seen_keys.insert(key.clone()) {
                self.stats.dropped_exact += 1;
                counter!("ingest_dedup_total", "reason" => "exact").increment(1);
                continue;
            }

            let hash = content_hash(&s, self.content_prefix);
            if !self.seen_hashes.insert(hash.clone()) {
                self.stats.dropped_near += 1;
                counter!("ingest_dedup_total", "reason" => "near").increment(1);
                continue;
            }

            if self.seen_in_previous_run(&hash).await {
                debug!(target: "pipeline", url = %s.url, "content seen in a previous run");
                self.stats.dropped_near += 1;
                self.stats.dropped_previous_run += 1;
                counter!("ingest_dedup_total", "reason" => "previous_run").increment(1);
                continue;
            }

            s.dedup_key = Some(key);
            s.content_hash = Some(hash);
            kept.push(s);
        }
        kept
    }

    async fn seen_in_previous_run(&self, hash: &str) -> bool {
        let Some(index) = self.index else {
            return false;
        };
        match index.content_hash_exists(hash).await {
            Ok(found) => found,
            Err(e) => {
                warn!(target: "pipeline", error = %e, "content hash lookup failed; keeping signal");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;

    fn news(title: &str, desc: &str, url: &str) -> Signal {
        Signal::new(SourceKind::News, "feed").with_content(title, desc, url)
    }

    struct FixedIndex(Vec<String>);

    #[async_trait]
    impl ContentHashIndex for FixedIndex {
        async fn content_hash_exists(&self, hash: &str) -> anyhow::Result<bool> {
            Ok(self.0.iter().any(|h| h == hash))
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl ContentHashIndex for BrokenIndex {
        async fn content_hash_exists(&self, _hash: &str) -> anyhow::Result<bool> {
            anyhow::bail!("database is locked")
        }
    }

    #[test]
    fn strips_tracking_and_fragment() {
        assert_eq!(
            normalize_url("https://a.com/p?utm_source=x&utm_medium=y#frag"),
            "https://a.com/p"
        );
        assert_eq!(
            normalize_url("https://a.com/p?b=2&fbclid=zz&a=1&UTM_Campaign=q"),
            "https://a.com/p?a=1&b=2"
        );
    }

    #[test]
    fn normalize_is_a_fixed_point() {
        for u in [
            "https://a.com/p?utm_source=x&utm_medium=y#frag",
            "https://A.com/x/../y?z=%20space&a=1",
            "https://a.com/?q=caf%C3%A9&ref=tw",
            "not a url",
            "",
        ] {
            let once = normalize_url(u);
            assert_eq!(normalize_url(&once), once, "input {u:?}");
        }
    }

    #[test]
    fn key_prefers_external_id_then_url_then_text() {
        let mut s = news("T", "D", "https://a.com/1");
        let by_url = dedup_key(&s);
        s.external_id = Some("42".into());
        let by_id = dedup_key(&s);
        assert_ne!(by_url, by_id);
        assert!(by_id.starts_with("news:"));

        let a = news("T", "D", "");
        let b = news("T", "D", "");
        assert_eq!(dedup_key(&a), dedup_key(&b));

        let mut gh = news("T", "D", "https://a.com/1");
        gh.source = SourceKind::Github;
        assert_ne!(dedup_key(&gh), by_url);
    }

    #[tokio::test]
    async fn exact_duplicates_are_dropped() {
        let mut d = Deduplicator::new();
        let out = d
            .dedup(vec![
                news("One", "x", "https://a.com/p?utm_source=rss"),
                news("One, again", "different body", "https://a.com/p#top"),
            ])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(d.stats().dropped_exact, 1);
        assert_eq!(d.stats().dropped_near, 0);
        assert_eq!(out[0].url, "https://a.com/p");
        assert!(out[0].dedup_key.is_some());
        assert!(out[0].content_hash.is_some());
    }

    #[tokio::test]
    async fn near_duplicates_across_urls_are_dropped() {
        let mut d = Deduplicator::new();
        let out = d
            .dedup(vec![
                news("Arbitrum DAO votes", "Proposal passes", "https://a.com/1"),
                news("  ARBITRUM dao votes", "proposal passes  ", "https://b.com/2"),
                news("Something else", "", "https://c.com/3"),
            ])
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(d.stats().dropped_near, 1);
        assert_eq!(out[0].url, "https://a.com/1");
        assert_eq!(out[1].url, "https://c.com/3");
    }

    #[tokio::test]
    async fn prefix_only_comparison() {
        let long = "x".repeat(CONTENT_HASH_PREFIX + 10);
        let mut d = Deduplicator::new();
        let out = d
            .dedup(vec![
                news(&long, "tail one", "https://a.com/1"),
                news(&long, "tail two", "https://a.com/2"),
            ])
            .await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn previous_run_hashes_are_dropped() {
        let seen = news("Old story", "", "https://a.com/old");
        let index = FixedIndex(vec![content_hash(&seen, CONTENT_HASH_PREFIX)]);
        let mut d = Deduplicator::new().with_index(&index);
        let out = d
            .dedup(vec![seen.clone(), news("New story", "", "https://a.com/new")])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "New story");
        assert_eq!(d.stats().dropped_previous_run, 1);
        assert_eq!(d.stats().dropped_near, 1);
    }

    #[tokio::test]
    async fn index_errors_count_as_not_seen() {
        let index = BrokenIndex;
        let mut d = Deduplicator::new().with_index(&index);
        let out = d.dedup(vec![news("Story", "", "https://a.com/1")]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(d.stats(), DedupStats::default());
    }
}
