use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::ingest::types::{SentimentValue, Signal};

static POSITIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bull", "bullish", "pump", "pumped", "pumping", "up", "uptrend", "breakout", "ath",
        "approve", "approved", "partnership", "launch", "released", "ship", "shipped", "upgrade",
        "upgraded", "growth", "record", "surge", "rally", "green",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bear", "bearish", "dump", "dumped", "down", "downtrend", "breakdown", "rekt", "exploit",
        "hacked", "hack", "rug", "rugpull", "attack", "incident", "lawsuit", "ban", "banned",
        "fraud", "scam", "warning", "red",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Returns (positive hits, negative hits).
    /// A negator within the previous 1..=3 tokens flips the polarity of a hit.
    pub fn count_hits(&self, text: &str) -> (u32, u32) {
        let tokens: Vec<String> = tokenize(text).collect();
        let (mut pos, mut neg) = (0u32, 0u32);

        for i in 0..tokens.len() {
            let w = tokens[i].as_str();
            let polarity = if POSITIVE.contains(w) {
                1
            } else if NEGATIVE.contains(w) {
                -1
            } else {
                continue;
            };

            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            if (polarity > 0) != negated {
                pos += 1;
            } else {
                neg += 1;
            }
        }

        (pos, neg)
    }

    /// `(pos - neg) / (pos + neg)`, or 0.0 without hits.
    pub fn score_text(&self, text: &str) -> f64 {
        let (pos, neg) = self.count_hits(text);
        if pos + neg == 0 {
            return 0.0;
        }
        (pos as f64 - neg as f64) / (pos + neg) as f64
    }
}

/// Alphanumeric lowercase tokens; punctuation is dropped.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(tok, "not" | "no" | "never" | "without" | "cannot" | "nor")
}

pub fn clamp_score(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Upstream labels to a score. Unknown labels are neutral.
pub fn label_to_score(label: &str) -> f64 {
    let l = label.trim().to_ascii_lowercase();
    match l.as_str() {
        "positive" | "bullish" => 1.0,
        "negative" | "bearish" => -1.0,
        "neutral" | "mixed" | "unclear" => 0.0,
        other => other.parse::<f64>().map(clamp_score).unwrap_or(0.0),
    }
}

/// Scores signals that arrive without sentiment and converts upstream labels.
pub fn add_sentiment(analyzer: &SentimentAnalyzer, signals: Vec<Signal>) -> Vec<Signal> {
    signals
        .into_iter()
        .map(|mut s| {
            let score = match &s.sentiment {
                Some(v) => v.as_f64(),
                None => analyzer.score_text(&format!("{} {}", s.title, s.description)),
            };
            s.sentiment = Some(SentimentValue::Score(score));
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;

    #[test]
    fn polarity_ratio() {
        let a = SentimentAnalyzer::new();
        assert_eq!(a.score_text("Bullish breakout, record highs!"), 1.0);
        assert_eq!(a.score_text("Bridge hacked; exploit drains funds"), -1.0);
        assert_eq!(a.score_text("Upgrade shipped after exploit"), 1.0 / 3.0);
        assert_eq!(a.score_text("Quarterly report"), 0.0);
    }

    #[test]
    fn negation_flips_hits() {
        let a = SentimentAnalyzer::new();
        assert_eq!(a.count_hits("not bullish at all"), (0, 1));
        assert_eq!(a.count_hits("no exploit found"), (1, 0));
    }

    #[test]
    fn labels_convert_without_raising() {
        assert_eq!(label_to_score("Bullish"), 1.0);
        assert_eq!(label_to_score("bearish"), -1.0);
        assert_eq!(label_to_score("mixed"), 0.0);
        assert_eq!(label_to_score("0.25"), 0.25);
        assert_eq!(label_to_score("7"), 1.0);
        assert_eq!(label_to_score("to the moon"), 0.0);
        assert_eq!(label_to_score("NaN"), 0.0);
    }

    #[test]
    fn add_sentiment_respects_upstream_values() {
        let a = SentimentAnalyzer::new();
        let mut labelled = Signal::new(SourceKind::Twitter, "x").with_content("dump", "", "");
        labelled.sentiment = Some(SentimentValue::Label("bullish".into()));
        let fresh = Signal::new(SourceKind::News, "f").with_content("Mainnet launch", "", "");

        let out = add_sentiment(&a, vec![labelled, fresh]);
        assert_eq!(out[0].sentiment, Some(SentimentValue::Score(1.0)));
        assert_eq!(out[1].sentiment, Some(SentimentValue::Score(1.0)));
    }
}
