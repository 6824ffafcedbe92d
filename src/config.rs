// src/config.rs
//! Runtime settings.
//!
//! Resolution order: `$SIGNALS_CONFIG_PATH` → `config/settings.toml` → built-in
//! defaults, then environment overrides on top. A missing or broken file never
//! fails startup; it logs a warning and falls back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ENV_CONFIG_PATH: &str = "SIGNALS_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub endpoints: Endpoints,
    pub ingestion: IngestionSettings,
    pub github: GithubSettings,
    pub twitter: TwitterSettings,
    pub storage: StorageSettings,
    pub scheduler: SchedulerSettings,
    pub analysis: AnalysisSettings,
    pub taxonomy: TaxonomySettings,
    pub ranking: RankingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub user_agent: String,
    /// Minimum spacing between two scraper requests to the same host.
    pub per_domain_delay_ms: u64,
    /// Scraped pages younger than this are served from the page cache.
    pub page_cache_ttl_hours: i64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            user_agent: concat!(
                "signal-ingest/",
                env!("CARGO_PKG_VERSION"),
                " (+https://github.com/signal-ingest/signal-ingest)"
            )
            .to_string(),
            per_domain_delay_ms: 1_000,
            page_cache_ttl_hours: 24,
        }
    }
}

/// Base URLs of third-party APIs. Overridable so tests can point at a local server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub cryptocurrency_cv: String,
    pub coinmarketcap_posts: String,
    pub defillama_raises: String,
    pub snapshot_graphql: String,
    pub github_search: String,
    pub twitter_search: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cryptocurrency_cv: "https://cryptocurrency.cv/api/news".into(),
            coinmarketcap_posts: "https://pro-api.coinmarketcap.com/v1/content/posts/latest"
                .into(),
            defillama_raises: "https://api.llama.fi/raises".into(),
            snapshot_graphql: "https://hub.snapshot.org/graphql".into(),
            github_search: "https://api.github.com/search/repositories".into(),
            twitter_search: "https://api.x.com/2/tweets/search/recent".into(),
        }
    }
}

/// Sub-source lists for one RSS + web + API source family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilySettings {
    pub rss: Vec<String>,
    pub web: Vec<String>,
    pub api: Vec<String>,
    pub concurrency: usize,
    pub web_max_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub news: FamilySettings,
    pub funding: FamilySettings,
    pub ecosystem: FamilySettings,
    /// Snapshot spaces polled by the `snapshot_proposals` API sub-source.
    pub snapshot_spaces: Vec<String>,
    pub coinmarketcap_api_key: Option<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        let coindesk_rss = "https://www.coindesk.com/arc/outboundfeeds/rss/".to_string();
        Self {
            news: FamilySettings {
                rss: vec![coindesk_rss.clone(), "https://decrypt.co/feed".into()],
                web: vec![
                    "https://decrypt.co/news".into(),
                    "https://www.coindesk.com/".into(),
                ],
                api: vec!["cryptocurrency_cv".into()],
                concurrency: 5,
                web_max_items: 30,
            },
            funding: FamilySettings {
                rss: vec!["https://blockworks.co/feed".into(), coindesk_rss],
                web: vec!["https://www.coindesk.com/tag/venture-capital/".into()],
                api: Vec::new(),
                concurrency: 4,
                web_max_items: 10,
            },
            ecosystem: FamilySettings {
                rss: [
                    "https://gov.optimism.io/latest.rss",
                    "https://arbitrumfoundation.medium.com/feed",
                    "https://base.mirror.xyz/feed/atom",
                    "https://medium.com/feed/avalancheavax",
                    "https://medium.com/feed/starkware",
                    "https://solana.com/rss.xml",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                web: [
                    "https://optimism.io/blog",
                    "https://arbitrum.io/blog",
                    "https://base.org/blog",
                    "https://www.avax.network/blog",
                    "https://soniclabs.com/blog",
                    "https://hyperliquid.xyz/",
                    "https://www.stacks.co/blog",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                api: Vec::new(),
                concurrency: 5,
                web_max_items: 10,
            },
            snapshot_spaces: vec![
                "arbitrumfoundation.eth".into(),
                "opcollective.eth".into(),
                "aave.eth".into(),
            ],
            coinmarketcap_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    pub queries: Vec<String>,
    /// Server-side search window is clamped to this many days.
    pub window_days: i64,
    pub concurrency: usize,
    pub per_page: u32,
    pub token: Option<String>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            queries: vec![
                "language:Solidity stars:>50".into(),
                "topic:defi stars:>50".into(),
            ],
            window_days: 7,
            concurrency: 3,
            per_page: 30,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwitterMode {
    #[default]
    None,
    Rss,
    Api,
}

impl TwitterMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Some(Self::None),
            "rss" => Some(Self::Rss),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterSettings {
    pub mode: TwitterMode,
    pub rss: Vec<String>,
    pub query: String,
    pub max_results: u32,
    pub bearer_token: Option<String>,
    pub concurrency: usize,
}

impl Default for TwitterSettings {
    fn default() -> Self {
        Self {
            mode: TwitterMode::None,
            rss: Vec::new(),
            query: "web3 (launch OR mainnet OR grant OR partnership) -is:retweet lang:en".into(),
            max_results: 20,
            bearer_token: None,
            concurrency: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
    /// Default presentation/query window, also the first-run lookback.
    pub rolling_window_hours: i64,
    pub retention_days: i64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/signals.db"),
            rolling_window_hours: 24,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub run_interval_hours: u64,
    pub max_manual_runs_per_day: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            run_interval_hours: 6,
            max_manual_runs_per_day: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub top_signals_to_analyze: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            top_signals_to_analyze: 10,
        }
    }
}

/// One keyword bucket: `label → {keywords, weight}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub keywords: Vec<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomySettings {
    pub ecosystems: BTreeMap<String, CategorySpec>,
    pub sectors: BTreeMap<String, CategorySpec>,
    pub unknown_ecosystem_weight: f64,
    pub unknown_sector_weight: f64,
}

fn spec(keywords: &[&str], weight: f64) -> CategorySpec {
    CategorySpec {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        weight,
    }
}

impl Default for TaxonomySettings {
    fn default() -> Self {
        let mut ecosystems = BTreeMap::new();
        for (label, kws, w) in [
            (
                "ethereum_l2s",
                &[
                    "arbitrum", "optimism", "base", "zksync", "scroll", "starknet", "linea",
                    "polygon", "l2", "rollup",
                ][..],
                1.0,
            ),
            ("solana", &["solana", "spl", "jupiter", "raydium", "sol"][..], 0.95),
            (
                "bitcoin_l2s",
                &["bitcoin l2", "bitvm", "stacks", "lightning", "babylon", "rootstock", "rgb"][..],
                0.95,
            ),
        ] {
            ecosystems.insert(label.to_string(), spec(kws, w));
        }

        let mut sectors = BTreeMap::new();
        for (label, kws, w) in [
            (
                "defi",
                &[
                    "dex", "amm", "lending", "borrow", "perps", "derivatives", "yield",
                    "liquidity", "tvl", "vault",
                ][..],
                1.0,
            ),
            (
                "infrastructure",
                &[
                    "rpc", "indexer", "node", "oracle", "bridge", "sequencer",
                    "data availability", "zk", "rollup", "infra",
                ][..],
                0.95,
            ),
            (
                "ai_crypto",
                &["agent", "agents", "ai", "llm", "gpu", "inference", "model", "data", "compute"][..],
                0.9,
            ),
            ("gaming", &["game", "gaming", "metaverse"][..], 0.6),
            ("nft", &["nft", "collection", "mint"][..], 0.5),
        ] {
            sectors.insert(label.to_string(), spec(kws, w));
        }

        Self {
            ecosystems,
            sectors,
            unknown_ecosystem_weight: 0.7,
            unknown_sector_weight: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    pub recency_coef: f64,
    pub engagement_coef: f64,
    pub source_coef: f64,
    /// `exp(-age_hours / recency_tau_hours)`.
    pub recency_tau_hours: f64,
    pub source_weights: BTreeMap<String, f64>,
    pub default_source_weight: f64,
}

impl Default for RankingSettings {
    fn default() -> Self {
        let source_weights = [
            ("news", 1.0),
            ("funding", 1.0),
            ("github", 0.9),
            ("ecosystem", 0.85),
            ("twitter", 0.7),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            recency_coef: 0.45,
            engagement_coef: 0.35,
            source_coef: 0.20,
            recency_tau_hours: 24.0,
            source_weights,
            default_source_weight: 0.6,
        }
    }
}

impl Settings {
    /// Load from `$SIGNALS_CONFIG_PATH` or `config/settings.toml`, then apply env overrides.
    pub fn load_default() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut s = Self::load_from_file(&path);
        s.apply_env();
        s
    }

    /// Parse a TOML file; any failure degrades to defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml_str(&s).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                Self::default()
            }),
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "unreadable settings file, using defaults");
                }
                Self::default()
            }
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Environment overrides; plural values are comma separated.
    pub fn apply_env(&mut self) {
        let list = |key: &str, target: &mut Vec<String>| {
            if let Some(v) = env_list(key) {
                *target = v;
            }
        };
        list("NEWS_SOURCES", &mut self.ingestion.news.rss);
        list("NEWS_WEB_SOURCES", &mut self.ingestion.news.web);
        list("NEWS_API_SOURCES", &mut self.ingestion.news.api);
        list("FUNDING_RSS_SOURCES", &mut self.ingestion.funding.rss);
        list("FUNDING_WEB_SOURCES", &mut self.ingestion.funding.web);
        list("FUNDING_API_SOURCES", &mut self.ingestion.funding.api);
        list("ECOSYSTEM_RSS_SOURCES", &mut self.ingestion.ecosystem.rss);
        list("ECOSYSTEM_WEB_SOURCES", &mut self.ingestion.ecosystem.web);
        list("ECOSYSTEM_API_SOURCES", &mut self.ingestion.ecosystem.api);
        list("GITHUB_QUERIES", &mut self.github.queries);
        list("TWITTER_RSS_SOURCES", &mut self.twitter.rss);

        if let Ok(v) = std::env::var("TWITTER_MODE") {
            match TwitterMode::parse(&v) {
                Some(m) => self.twitter.mode = m,
                None => warn!(value = %v, "unknown TWITTER_MODE, keeping configured mode"),
            }
        }
        if let Some(v) = env_secret("GITHUB_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = env_secret("TWITTER_BEARER_TOKEN") {
            self.twitter.bearer_token = Some(v);
        }
        if let Some(v) = env_secret("COINMARKETCAP_API_KEY") {
            self.ingestion.coinmarketcap_api_key = Some(v);
        }
        if let Some(v) = env_secret("SQLITE_DB_PATH") {
            self.storage.db_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<i64>("ROLLING_WINDOW_HOURS") {
            self.storage.rolling_window_hours = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("RUN_INTERVAL_HOURS") {
            self.scheduler.run_interval_hours = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("MAX_SIGNALS") {
            self.analysis.top_signals_to_analyze = v.max(1);
        }
    }
}

fn env_secret(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}
