// src/analyze/tagging.rs
use crate::config::{CategorySpec, TaxonomySettings};
use crate::ingest::types::Signal;
use crate::ingest::UNKNOWN;

/// Assigns chain and sector labels plus their ranking multipliers.
pub trait Tagger: Send + Sync {
    fn enrich(&self, signal: Signal) -> Signal;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub label: String,
    pub keywords: Vec<String>,
    pub weight: f64,
}

impl Category {
    fn matches(&self, haystack: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && haystack.contains(k.as_str()))
    }
}

/// Substring keyword matcher over injected tables.
#[derive(Debug, Clone)]
pub struct KeywordTagger {
    ecosystems: Vec<Category>,
    sectors: Vec<Category>,
    unknown_ecosystem_weight: f64,
    unknown_sector_weight: f64,
}

fn categories(table: &std::collections::BTreeMap<String, CategorySpec>) -> Vec<Category> {
    table
        .iter()
        .map(|(label, spec)| Category {
            label: label.clone(),
            keywords: spec.keywords.iter().map(|k| k.to_lowercase()).collect(),
            weight: spec.weight,
        })
        .collect()
}

/// Highest-weight matching category. Equal weights keep table order.
pub fn best_match<'c>(haystack: &str, cats: &'c [Category]) -> Option<&'c Category> {
    cats.iter()
        .filter(|c| c.matches(haystack))
        .fold(None, |best: Option<&Category>, c| match best {
            Some(b) if b.weight >= c.weight => Some(b),
            _ => Some(c),
        })
}

impl KeywordTagger {
    pub fn new(ecosystems: Vec<Category>, sectors: Vec<Category>) -> Self {
        let defaults = TaxonomySettings::default();
        Self {
            ecosystems,
            sectors,
            unknown_ecosystem_weight: defaults.unknown_ecosystem_weight,
            unknown_sector_weight: defaults.unknown_sector_weight,
        }
    }

    pub fn from_settings(t: &TaxonomySettings) -> Self {
        Self {
            ecosystems: categories(&t.ecosystems),
            sectors: categories(&t.sectors),
            unknown_ecosystem_weight: t.unknown_ecosystem_weight,
            unknown_sector_weight: t.unknown_sector_weight,
        }
    }
}

impl Default for KeywordTagger {
    fn default() -> Self {
        Self::from_settings(&TaxonomySettings::default())
    }
}

impl Tagger for KeywordTagger {
    fn enrich(&self, mut signal: Signal) -> Signal {
        let text = signal.haystack();

        match best_match(&text, &self.ecosystems) {
            Some(c) => {
                signal.chain = c.label.clone();
                signal.chain_weight = c.weight;
            }
            None => {
                signal.chain = UNKNOWN.to_string();
                signal.chain_weight = self.unknown_ecosystem_weight;
            }
        }

        match best_match(&text, &self.sectors) {
            Some(c) => {
                signal.sector = c.label.clone();
                signal.sector_weight = c.weight;
            }
            None => {
                signal.sector = UNKNOWN.to_string();
                signal.sector_weight = self.unknown_sector_weight;
            }
        }

        signal
    }
}

pub fn tag_all(tagger: &dyn Tagger, signals: Vec<Signal>) -> Vec<Signal> {
    signals.into_iter().map(|s| tagger.enrich(s)).collect()
}
