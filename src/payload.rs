// src/payload.rs
//! Read-only daily digest over the rolling window: top signals, per-source
//! sections, chain×sector clusters and a keyword/sentiment market tone.

use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::Settings;
use crate::ingest::types::{Signal, SourceKind};
use crate::store::SqliteStore;

pub const TOP_SECTION_TITLE: &str = "Top Signals";
pub const MAX_TREND_CLUSTERS: usize = 8;
const TONE_SAMPLE: usize = 20;
const MAX_DRIVERS: usize = 5;

const RISK_ON_KEYWORDS: &[&str] = &[
    "breakout", "up", "surge", "record", "bull", "risk-on", "altseason", "rally",
];
const RISK_OFF_KEYWORDS: &[&str] = &[
    "hack", "exploit", "lawsuit", "ban", "down", "bear", "risk-off", "capitulation", "liquidation",
];

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub title: String,
    /// `None` for the cross-source top section.
    pub source: Option<SourceKind>,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendCluster {
    pub chain: String,
    pub sector: String,
    pub count: usize,
    pub score_sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tone {
    #[serde(rename = "risk-on")]
    RiskOn,
    #[serde(rename = "risk-off")]
    RiskOff,
    #[serde(rename = "neutral")]
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketTone {
    pub market_tone: Tone,
    pub confidence: f64,
    pub drivers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPayload {
    pub date: String,
    pub since: NaiveDateTime,
    pub top_signals: Vec<Signal>,
    pub sections: Vec<Section>,
    pub trend_clusters: Vec<TrendCluster>,
    pub market_tone: MarketTone,
    pub total_signals: usize,
}

/// Groups by `chain|sector`, most frequent first, score sum breaking ties.
pub fn trend_clusters(signals: &[Signal]) -> Vec<TrendCluster> {
    let mut agg: HashMap<(String, String), TrendCluster> = HashMap::new();
    for s in signals {
        let c = agg
            .entry((s.chain.clone(), s.sector.clone()))
            .or_insert_with(|| TrendCluster {
                chain: s.chain.clone(),
                sector: s.sector.clone(),
                count: 0,
                score_sum: 0.0,
            });
        c.count += 1;
        if s.signal_score.is_finite() {
            c.score_sum += s.signal_score;
        }
    }
    let mut out: Vec<TrendCluster> = agg.into_values().collect();
    out.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.score_sum.total_cmp(&a.score_sum))
            .then_with(|| (&a.chain, &a.sector).cmp(&(&b.chain, &b.sector)))
    });
    out.truncate(MAX_TREND_CLUSTERS);
    out
}

/// Keyword and sentiment vote over the first signals (already best-first).
pub fn market_tone(signals: &[Signal]) -> MarketTone {
    if signals.is_empty() {
        return MarketTone {
            market_tone: Tone::Neutral,
            confidence: 0.2,
            drivers: Vec::new(),
        };
    }

    let mut score = 0.0;
    let mut drivers = Vec::new();
    for s in signals.iter().take(TONE_SAMPLE) {
        let blob = s.haystack();
        if RISK_ON_KEYWORDS.iter().any(|k| blob.contains(k)) {
            score += 1.0;
            drivers.push(s.title.clone());
        }
        if RISK_OFF_KEYWORDS.iter().any(|k| blob.contains(k)) {
            score -= 1.2;
            drivers.push(s.title.clone());
        }
        score += s.sentiment_score() * 0.6;
    }

    let tone = if score > 2.0 {
        Tone::RiskOn
    } else if score < -2.0 {
        Tone::RiskOff
    } else {
        Tone::Neutral
    };
    let confidence = (0.3 + score.abs() / 10.0).min(0.9);
    drivers.truncate(MAX_DRIVERS);
    MarketTone {
        market_tone: tone,
        confidence: (confidence * 100.0).round() / 100.0,
        drivers,
    }
}

fn sections(top: &[Signal], all: &[Signal], max: usize) -> Vec<Section> {
    let mut out = vec![Section {
        title: TOP_SECTION_TITLE.to_string(),
        source: None,
        signals: top.to_vec(),
    }];
    for kind in SourceKind::ALL {
        out.push(Section {
            title: kind.section_title().to_string(),
            source: Some(kind),
            signals: all
                .iter()
                .filter(|s| s.source == kind)
                .take(max)
                .cloned()
                .collect(),
        });
    }
    out
}

/// Never writes to the store.
pub async fn build_payload(
    settings: &Settings,
    store: &SqliteStore,
    max_signals: Option<usize>,
    include_sections: bool,
) -> Result<DailyPayload> {
    let now = Utc::now().naive_utc();
    let since = now - Duration::hours(settings.storage.rolling_window_hours.max(1));
    let max = max_signals
        .unwrap_or(settings.analysis.top_signals_to_analyze)
        .max(1);

    let signals = store.get_signals_since(since, None, None).await?;
    let top: Vec<Signal> = signals.iter().take(max).cloned().collect();

    Ok(DailyPayload {
        date: now.format("%Y-%m-%d").to_string(),
        since,
        sections: if include_sections {
            sections(&top, &signals, max)
        } else {
            Vec::new()
        },
        trend_clusters: trend_clusters(&signals),
        market_tone: market_tone(&signals),
        total_signals: signals.len(),
        top_signals: top,
    })
}
