// src/ingest/types.rs
use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ingest::stats::AdapterStats;

/// Source family a signal came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    News,
    Funding,
    Ecosystem,
    Github,
    Twitter,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::News,
        SourceKind::Funding,
        SourceKind::Ecosystem,
        SourceKind::Github,
        SourceKind::Twitter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::News => "news",
            SourceKind::Funding => "funding",
            SourceKind::Ecosystem => "ecosystem",
            SourceKind::Github => "github",
            SourceKind::Twitter => "twitter",
            SourceKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => SourceKind::News,
            "funding" => SourceKind::Funding,
            "ecosystem" => SourceKind::Ecosystem,
            "github" => SourceKind::Github,
            "twitter" | "x" | "social" => SourceKind::Twitter,
            _ => SourceKind::Unknown,
        }
    }

    /// Section heading used by the daily payload.
    pub fn section_title(&self) -> &'static str {
        match self {
            SourceKind::News => "News",
            SourceKind::Funding => "Funding",
            SourceKind::Ecosystem => "Ecosystem",
            SourceKind::Github => "GitHub",
            SourceKind::Twitter => "Twitter",
            SourceKind::Unknown => "Other",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional engagement counters; absent counters are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Engagement {
    pub likes: u64,
    pub retweets: u64,
    pub replies: u64,
    pub stars: u64,
    pub forks: u64,
}

/// Sentiment as it may arrive from upstream: a number or a textual label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SentimentValue {
    Score(f64),
    Label(String),
}

impl SentimentValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            SentimentValue::Score(v) => crate::sentiment::clamp_score(*v),
            SentimentValue::Label(l) => crate::sentiment::label_to_score(l),
        }
    }
}

/// One ingested item. Adapters fill the content fields; the normalizer,
/// deduplicator, tagger, sentiment scorer and ranker fill the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signal {
    pub dedup_key: Option<String>,
    /// Stable upstream ID (tweet id, repo id, raise id).
    pub external_id: Option<String>,
    pub source: SourceKind,
    /// Feed URL, page URL or API name the item was pulled from.
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    /// Naive UTC.
    pub published_at: Option<NaiveDateTime>,
    pub chain: String,
    pub chain_weight: f64,
    pub sector: String,
    pub sector_weight: f64,
    pub sentiment: Option<SentimentValue>,
    pub signal_score: f64,
    pub engagement: Engagement,
    pub content_hash: Option<String>,
}

impl Signal {
    pub fn new(source: SourceKind, source_id: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            chain_weight: 1.0,
            sector_weight: 1.0,
            ..Default::default()
        }
    }

    pub fn with_content(
        mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        self.title = title.into();
        self.description = description.into();
        self.url = url.into();
        self
    }

    pub fn published(mut self, at: Option<NaiveDateTime>) -> Self {
        self.published_at = at;
        self
    }

    pub fn sentiment_score(&self) -> f64 {
        self.sentiment.as_ref().map(SentimentValue::as_f64).unwrap_or(0.0)
    }

    /// Lowercased `title + " " + description`, the text every keyword heuristic reads.
    pub fn haystack(&self) -> String {
        format!("{} {}", self.title, self.description).to_lowercase()
    }
}

/// What an adapter hands back: its signals plus per-sub-source counters.
#[derive(Debug, Clone, Default)]
pub struct IngestOutput {
    pub signals: Vec<Signal>,
    pub stats: AdapterStats,
}

impl From<Vec<Signal>> for IngestOutput {
    fn from(signals: Vec<Signal>) -> Self {
        Self {
            signals,
            stats: AdapterStats::default(),
        }
    }
}

/// One source family. Sub-source failures stay inside `ingest`; an `Err` means
/// the whole adapter failed and the orchestrator counts it as zero items.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn ingest(&self, since: NaiveDateTime) -> Result<IngestOutput>;
    fn name(&self) -> &'static str;
}
