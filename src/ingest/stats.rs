// src/ingest/stats.rs
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::warn;

use crate::http::FetchError;

/// Consecutive failures that still get a full warning line.
pub const SUPPRESS_AFTER: u32 = 3;

/// Counters for one kind of sub-source (rss / web / api).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubSourceCounters {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: usize,
    pub not_modified: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubSourceKind {
    Rss,
    Web,
    Api,
}

impl SubSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubSourceKind::Rss => "rss",
            SubSourceKind::Web => "web",
            SubSourceKind::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterStats {
    pub rss: SubSourceCounters,
    pub web: SubSourceCounters,
    pub api: SubSourceCounters,
    /// Failure counts keyed by error kind.
    pub errors: BTreeMap<String, usize>,
}

impl AdapterStats {
    pub fn counters_mut(&mut self, kind: SubSourceKind) -> &mut SubSourceCounters {
        match kind {
            SubSourceKind::Rss => &mut self.rss,
            SubSourceKind::Web => &mut self.web,
            SubSourceKind::Api => &mut self.api,
        }
    }

    pub fn record_success(&mut self, kind: SubSourceKind, items: usize, not_modified: bool) {
        let c = self.counters_mut(kind);
        c.attempted += 1;
        c.succeeded += 1;
        c.items += items;
        if not_modified {
            c.not_modified += 1;
        }
    }

    pub fn record_failure(&mut self, kind: SubSourceKind, err: &anyhow::Error) {
        let c = self.counters_mut(kind);
        c.attempted += 1;
        c.failed += 1;
        *self.errors.entry(error_kind(err).to_string()).or_insert(0) += 1;
    }

    pub fn attempted(&self) -> usize {
        self.rss.attempted + self.web.attempted + self.api.attempted
    }

    pub fn failed(&self) -> usize {
        self.rss.failed + self.web.failed + self.api.failed
    }

    /// Up to `n` error kinds, most frequent first.
    pub fn top_errors(&self, n: usize) -> Vec<(String, usize)> {
        let mut v: Vec<(String, usize)> =
            self.errors.iter().map(|(k, c)| (k.clone(), *c)).collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        v.truncate(n);
        v
    }
}

/// Stable label for an adapter-level error.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(fe) = err.downcast_ref::<FetchError>() {
        return fe.kind();
    }
    if err.downcast_ref::<quick_xml::de::DeError>().is_some() {
        return "parse";
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return "parse";
    }
    "other"
}

/// What the caller should do with a failure log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureLog {
    Log(u32),
    /// The one line announcing that further failures go quiet.
    SuppressNotice(u32),
    Silent(u32),
}

/// Per-sub-source consecutive failure counter used to throttle warning spam.
/// Owned by an adapter instance so state never leaks between adapters or tests.
#[derive(Debug, Default)]
pub struct FailureTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, key: &str) -> FailureLog {
        let Ok(mut g) = self.counts.lock() else {
            return FailureLog::Log(0);
        };
        let n = g.entry(key.to_string()).or_insert(0);
        *n += 1;
        match *n {
            c if c <= SUPPRESS_AFTER => FailureLog::Log(c),
            c if c == SUPPRESS_AFTER + 1 => FailureLog::SuppressNotice(c),
            c => FailureLog::Silent(c),
        }
    }

    pub fn record_success(&self, key: &str) {
        if let Ok(mut g) = self.counts.lock() {
            g.remove(key);
        }
    }

    pub fn consecutive(&self, key: &str) -> u32 {
        self.counts
            .lock()
            .ok()
            .and_then(|g| g.get(key).copied())
            .unwrap_or(0)
    }

    /// Record and, unless throttled, log a sub-source failure.
    pub fn warn_failure(&self, adapter: &str, kind: SubSourceKind, key: &str, err: &anyhow::Error) {
        match self.record_failure(key) {
            FailureLog::Log(n) => warn!(
                target: "ingest",
                adapter,
                sub_source = kind.as_str(),
                source_id = key,
                consecutive = n,
                error = %format!("{err:#}"),
                "sub-source failed"
            ),
            FailureLog::SuppressNotice(n) => warn!(
                target: "ingest",
                adapter,
                sub_source = kind.as_str(),
                source_id = key,
                consecutive = n,
                "sub-source keeps failing; suppressing further warnings until it recovers"
            ),
            FailureLog::Silent(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_throttles_after_three() {
        let t = FailureTracker::new();
        assert_eq!(t.record_failure("a"), FailureLog::Log(1));
        assert_eq!(t.record_failure("a"), FailureLog::Log(2));
        assert_eq!(t.record_failure("a"), FailureLog::Log(3));
        assert_eq!(t.record_failure("a"), FailureLog::SuppressNotice(4));
        assert_eq!(t.record_failure("a"), FailureLog::Silent(5));
        // independent key
        assert_eq!(t.record_failure("b"), FailureLog::Log(1));
        t.record_success("a");
        assert_eq!(t.consecutive("a"), 0);
        assert_eq!(t.record_failure("a"), FailureLog::Log(1));
    }

    #[test]
    fn stats_aggregate_and_rank_errors() {
        let mut s = AdapterStats::default();
        s.record_success(SubSourceKind::Rss, 4, false);
        s.record_success(SubSourceKind::Rss, 0, true);
        s.record_failure(SubSourceKind::Web, &anyhow::anyhow!("boom"));
        s.record_failure(SubSourceKind::Api, &anyhow::anyhow!("bang"));
        s.record_failure(
            SubSourceKind::Api,
            &anyhow::Error::new(FetchError::NonRetryable {
                url: "u".into(),
                status: Some(404),
                quota_reset: None,
                message: "nf".into(),
            }),
        );

        assert_eq!(s.rss.items, 4);
        assert_eq!(s.rss.not_modified, 1);
        assert_eq!(s.attempted(), 5);
        assert_eq!(s.failed(), 3);
        let top = s.top_errors(1);
        assert_eq!(top, vec![("other".to_string(), 2)]);
    }
}
