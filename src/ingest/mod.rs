// src/ingest/mod.rs
pub mod api_sources;
pub mod envelope;
pub mod feed;
pub mod providers;
pub mod scheduler;
pub mod stats;
pub mod types;
pub mod web;

use crate::ingest::types::Signal;
use chrono::NaiveDateTime;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub const UNKNOWN: &str = "unknown";
pub const UNTITLED: &str = "(untitled)";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_events_total",
            "Raw signals returned by adapters."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Adapter and sub-source fetch/parse errors."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Signals removed by deduplication, by reason."
        );
        describe_counter!("ingest_inserted_total", "Signals newly persisted.");
        describe_counter!("ingest_runs_total", "Completed pipeline runs.");
        describe_counter!("http_retries_total", "Outbound HTTP retries.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("ingest_run_ms", "Pipeline run time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 2000 chars
    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }

    out
}

/// Truncate to at most `max` chars (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Fill defaults so every record has the same shape downstream.
pub fn normalize_signal(mut s: Signal, now: NaiveDateTime) -> Signal {
    s.title = normalize_text(&s.title);
    if s.title.is_empty() {
        s.title = UNTITLED.to_string();
    }
    s.description = normalize_text(&s.description);
    s.url = s.url.trim().to_string();
    s.source_id = s.source_id.trim().to_string();
    if s.published_at.is_none() {
        s.published_at = Some(now);
    }
    if s.chain.trim().is_empty() {
        s.chain = UNKNOWN.to_string();
    }
    if s.sector.trim().is_empty() {
        s.sector = UNKNOWN.to_string();
    }
    if !s.chain_weight.is_finite() || s.chain_weight <= 0.0 {
        s.chain_weight = 1.0;
    }
    if !s.sector_weight.is_finite() || s.sector_weight <= 0.0 {
        s.sector_weight = 1.0;
    }
    if let Some(id) = &s.external_id {
        if id.trim().is_empty() {
            s.external_id = None;
        }
    }
    s
}

pub fn normalize_all(signals: Vec<Signal>, now: NaiveDateTime) -> Vec<Signal> {
    signals
        .into_iter()
        .map(|s| normalize_signal(s, now))
        .collect()
}
