//! Signal ranking.
//!
//! ```text
//! recency    = exp(-age_hours / tau)                 (future items count as age 0)
//! engagement = log10(likes + 2*retweets + replies + 5*stars + 3*forks + 1) / 3
//! base       = c_recency*recency + c_engagement*engagement + c_source*source_weight
//! score      = min(100, 100 * base * chain_weight * sector_weight)
//! ```
//!
//! Coefficients and source weights come from `[ranking]`; the defaults are
//! 0.45 / 0.35 / 0.20 with `tau = 24h`.

use chrono::NaiveDateTime;
use std::cmp::Ordering;

use crate::config::RankingSettings;
use crate::ingest::types::{Engagement, Signal};
use crate::source_weights::SourceWeightsConfig;

/// Recency used when a signal somehow has no timestamp.
const MISSING_TIMESTAMP_RECENCY: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct Ranker {
    settings: RankingSettings,
    source_weights: SourceWeightsConfig,
    now: NaiveDateTime,
}

pub fn engagement_score(e: &Engagement) -> f64 {
    let weighted = e.likes as f64
        + 2.0 * e.retweets as f64
        + e.replies as f64
        + 5.0 * e.stars as f64
        + 3.0 * e.forks as f64;
    (weighted + 1.0).log10() / 3.0
}

pub fn recency_score(published: Option<NaiveDateTime>, now: NaiveDateTime, tau_hours: f64) -> f64 {
    let Some(at) = published else {
        return MISSING_TIMESTAMP_RECENCY;
    };
    let age_hours = ((now - at).num_seconds() as f64 / 3600.0).max(0.0);
    (-age_hours / tau_hours.max(1e-6)).exp()
}

/// Descending score, then newer first, then `dedup_key` ascending.
pub fn rank_order(a: &Signal, b: &Signal) -> Ordering {
    b.signal_score
        .total_cmp(&a.signal_score)
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.dedup_key.cmp(&b.dedup_key))
}

impl Ranker {
    pub fn new(settings: &RankingSettings, now: NaiveDateTime) -> Self {
        Self {
            settings: settings.clone(),
            source_weights: SourceWeightsConfig::from_settings(settings),
            now,
        }
    }

    pub fn score(&self, s: &Signal) -> f64 {
        let r = &self.settings;
        let recency = recency_score(s.published_at, self.now, r.recency_tau_hours);
        let engagement = engagement_score(&s.engagement);
        let source = self.source_weights.weight_for_kind(s.source);

        let base = r.recency_coef * recency + r.engagement_coef * engagement + r.source_coef * source;
        let raw = 100.0 * base * s.chain_weight * s.sector_weight;
        if !raw.is_finite() {
            return 0.0;
        }
        (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
    }

    /// Scores every signal and sorts by [`rank_order`].
    pub fn rank(&self, signals: Vec<Signal>) -> Vec<Signal> {
        let mut out: Vec<Signal> = signals
            .into_iter()
            .map(|mut s| {
                s.signal_score = self.score(&s);
                s
            })
            .collect();
        out.sort_by(rank_order);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use chrono::{Duration, NaiveDate};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn sig(age_h: i64) -> Signal {
        Signal::new(SourceKind::News, "f")
            .with_content("t", "", "u")
            .published(Some(now() - Duration::hours(age_h)))
    }

    fn ranker() -> Ranker {
        Ranker::new(&RankingSettings::default(), now())
    }

    #[test]
    fn fresh_news_scores_near_formula() {
        // 0.45*1 + 0.35*0 + 0.20*1.0 = 0.65
        assert!((ranker().score(&sig(0)) - 65.0).abs() < 1e-9);
    }

    #[test]
    fn recency_curve() {
        assert!((recency_score(Some(now()), now(), 24.0) - 1.0).abs() < 1e-12);
        let day = recency_score(Some(now() - Duration::hours(24)), now(), 24.0);
        assert!((day - (-1.0f64).exp()).abs() < 1e-12);
        // future timestamps do not get a bonus
        let future = recency_score(Some(now() + Duration::hours(5)), now(), 24.0);
        assert!((future - 1.0).abs() < 1e-12);
    }

    #[test]
    fn younger_never_scores_lower() {
        let r = ranker();
        for age in 0..72 {
            assert!(r.score(&sig(age)) >= r.score(&sig(age + 1)));
        }
    }

    #[test]
    fn more_engagement_never_scores_lower() {
        let r = ranker();
        let mut prev = r.score(&sig(3));
        for stars in [1u64, 10, 100, 1_000, 100_000] {
            let mut s = sig(3);
            s.engagement.stars = stars;
            let cur = r.score(&s);
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn higher_category_weight_never_scores_lower() {
        let r = ranker();
        let mut lo = sig(1);
        lo.sector_weight = 0.5;
        let mut hi = sig(1);
        hi.sector_weight = 1.0;
        assert!(r.score(&hi) >= r.score(&lo));
    }

    #[test]
    fn score_is_bounded() {
        let r = ranker();
        let mut s = sig(0);
        s.engagement.stars = u32::MAX as u64;
        s.chain_weight = 5.0;
        s.sector_weight = 5.0;
        assert_eq!(r.score(&s), 100.0);
        s.chain_weight = f64::NAN;
        assert_eq!(r.score(&s), 0.0);
    }

    #[test]
    fn ties_break_by_recency_then_key() {
        let r = ranker();
        let mut a = sig(2);
        a.dedup_key = Some("news:b".into());
        let mut b = sig(2);
        b.dedup_key = Some("news:a".into());
        let mut c = sig(2);
        c.dedup_key = Some("news:c".into());
        let out = r.rank(vec![a, b, c]);
        let keys: Vec<_> = out.iter().filter_map(|s| s.dedup_key.clone()).collect();
        assert_eq!(keys, vec!["news:a", "news:b", "news:c"]);

        let out = r.rank(vec![sig(5), sig(1)]);
        assert!(out[0].published_at > out[1].published_at);
    }
}
