//! # Source Weights
//!
//! Maps a source family ("news", "github", ...) to the trust weight used by the
//! ranker's source term, in `[0.0, 1.0]`.
//!
//! - Loaded from `[ranking.source_weights]` in settings, or the built-in seed.
//! - Case-insensitive lookup with punctuation normalization.
//! - Aliases ("x", "tweets", "gh", ...) map onto canonical families.
//! - Fallback order: aliases → exact match → default.

use serde::Deserialize;
use std::collections::HashMap;

use crate::config::RankingSettings;
use crate::ingest::types::SourceKind;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeightsConfig {
    /// Weight if no match is found.
    #[serde(default = "default_default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_weight() -> f64 {
    0.60
}

impl Default for SourceWeightsConfig {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl SourceWeightsConfig {
    /// Configured weights on top of the seed aliases.
    pub fn from_settings(r: &RankingSettings) -> Self {
        let mut cfg = Self::default_seed();
        cfg.default_weight = r.default_source_weight;
        cfg.weights = r
            .source_weights
            .iter()
            .map(|(k, v)| (normalize(k), *v))
            .collect();
        cfg
    }

    pub fn weight_for(&self, source: &str) -> f64 {
        let s = normalize(source);

        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.weights.get(&normalize(canon)) {
                return clamp01(w);
            }
        }

        if let Some(&w) = self.weights.get(&s) {
            return clamp01(w);
        }

        clamp01(self.default_weight)
    }

    pub fn weight_for_kind(&self, kind: SourceKind) -> f64 {
        self.weight_for(kind.as_str())
    }

    /// Built-in weights per source family.
    pub(crate) fn default_seed() -> Self {
        let mut weights = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("news", 1.0),
            ("funding", 1.0),
            ("github", 0.9),
            ("ecosystem", 0.85),
            ("twitter", 0.7),
        ] {
            weights.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("x", "twitter"),
            ("tweet", "twitter"),
            ("tweets", "twitter"),
            ("social", "twitter"),
            ("gh", "github"),
            ("repos", "github"),
            ("raises", "funding"),
            ("vc", "funding"),
            ("governance", "ecosystem"),
            ("blog", "ecosystem"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_weight: 0.60,
            weights,
            aliases,
        }
    }
}

/// Lowercase, separators to spaces, collapse whitespace.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    out = out.replace(['—', '–', '-', '_', '/', '\\', '.', ','], " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
