//! Weighted eviction scoring
//!
//! Victims are chosen by a blended score of access rate, recency and size
//! rather than pure recency. Lower scores are evicted first. How many
//! entries a pass removes depends on how full the byte budget already is.

use crate::types::CacheEntry;
use chrono::{DateTime, Utc};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
/// Floor for age and idle time, so fresh entries don't divide by zero
const MIN_MINUTES: f64 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionWeights {
    pub access_rate: f64,
    pub recency: f64,
    pub size: f64,
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            access_rate: 0.5,
            recency: 0.3,
            size: 0.2,
        }
    }
}

/// Share of entries evicted per pass, by byte pressure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionFractions {
    pub mild: f64,
    pub elevated: f64,
    pub critical: f64,
    pub elevated_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for EvictionFractions {
    fn default() -> Self {
        Self {
            mild: 0.15,
            elevated: 0.25,
            critical: 0.40,
            elevated_threshold: 0.70,
            critical_threshold: 0.90,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvictionPolicy {
    pub weights: EvictionWeights,
    pub fractions: EvictionFractions,
}

impl EvictionPolicy {
    pub fn new(weights: EvictionWeights, fractions: EvictionFractions) -> Self {
        Self { weights, fractions }
    }

    /// Retention score; higher means more worth keeping
    pub fn score(&self, entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
        let age_minutes = minutes_between(entry.created_at, now);
        let idle_minutes = minutes_between(entry.last_access_at, now);

        let access_rate = entry.access_count as f64 / age_minutes;
        let recency = 1.0 / idle_minutes;
        let size = (entry.size_bytes as f64 / BYTES_PER_MB).min(1.0);

        self.weights.access_rate * access_rate
            + self.weights.recency * recency
            + self.weights.size * size
    }

    /// Fraction of entries to evict at the given byte pressure (0.0..=1.0+)
    pub fn eviction_fraction(&self, pressure: f64) -> f64 {
        let f = &self.fractions;
        if pressure > f.critical_threshold {
            f.critical
        } else if pressure >= f.elevated_threshold {
            f.elevated
        } else {
            f.mild
        }
    }

    /// Minimum number of entries one pass removes; always at least one
    pub fn batch_size(&self, candidates: usize, pressure: f64) -> usize {
        let batch = (candidates as f64 * self.eviction_fraction(pressure)).ceil() as usize;
        batch.clamp(1, candidates.max(1))
    }

    /// Order candidates from most to least evictable.
    ///
    /// Each candidate carries an insertion sequence number that breaks ties,
    /// oldest first.
    pub fn rank<'a, K, I>(&self, candidates: I, now: DateTime<Utc>) -> Vec<K>
    where
        K: Clone + 'a,
        I: IntoIterator<Item = (&'a K, &'a CacheEntry, u64)>,
    {
        let mut scored: Vec<(f64, u64, &K)> = candidates
            .into_iter()
            .map(|(key, entry, seq)| (self.score(entry, now), seq, key))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, _, key)| key.clone()).collect()
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let minutes = (to - from).num_milliseconds() as f64 / 60_000.0;
    minutes.max(MIN_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration;

    fn entry(created_ago: i64, idle: i64, accesses: u64, size: usize, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            payload: Bytes::from(vec![0u8; size]),
            size_bytes: size as u64,
            created_at: now - Duration::minutes(created_ago),
            last_access_at: now - Duration::minutes(idle),
            access_count: accesses,
        }
    }

    #[test]
    fn test_score_formula() {
        let now = Utc::now();
        let policy = EvictionPolicy::default();
        // 10 accesses over 10 minutes, idle 2 minutes, half a megabyte
        let e = entry(10, 2, 10, 512 * 1024, now);

        let expected = 0.5 * 1.0 + 0.3 * 0.5 + 0.2 * 0.5;
        assert!((policy.score(&e, now) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_size_factor_caps_at_one_megabyte() {
        let now = Utc::now();
        let policy = EvictionPolicy::new(
            EvictionWeights {
                access_rate: 0.0,
                recency: 0.0,
                size: 1.0,
            },
            EvictionFractions::default(),
        );
        let huge = entry(10, 10, 0, 3 * 1024 * 1024, now);
        assert!((policy.score(&huge, now) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_entry_has_finite_score() {
        let now = Utc::now();
        let e = entry(0, 0, 1, 10, now);
        assert!(EvictionPolicy::default().score(&e, now).is_finite());
    }

    #[test]
    fn test_fraction_by_pressure() {
        let policy = EvictionPolicy::default();
        assert_eq!(policy.eviction_fraction(0.2), 0.15);
        assert_eq!(policy.eviction_fraction(0.69), 0.15);
        assert_eq!(policy.eviction_fraction(0.70), 0.25);
        assert_eq!(policy.eviction_fraction(0.90), 0.25);
        assert_eq!(policy.eviction_fraction(0.95), 0.40);
    }

    #[test]
    fn test_batch_size_rounds_up_and_is_at_least_one() {
        let policy = EvictionPolicy::default();
        assert_eq!(policy.batch_size(2, 0.1), 1);
        assert_eq!(policy.batch_size(20, 0.1), 3);
        assert_eq!(policy.batch_size(20, 0.95), 8);
        assert_eq!(policy.batch_size(0, 0.95), 1);
    }

    #[test]
    fn test_rank_prefers_stale_rarely_used() {
        let now = Utc::now();
        let policy = EvictionPolicy::default();
        let hot = entry(5, 0, 100, 1000, now);
        let cold = entry(60, 60, 1, 1000, now);
        let keys = ["hot".to_string(), "cold".to_string()];

        let ranked = policy.rank([(&keys[0], &hot, 0), (&keys[1], &cold, 1)], now);
        assert_eq!(ranked, vec!["cold".to_string(), "hot".to_string()]);
    }

    #[test]
    fn test_rank_breaks_ties_by_insertion_order() {
        let now = Utc::now();
        let policy = EvictionPolicy::default();
        let a = entry(10, 10, 1, 100, now);
        let b = a.clone();
        let keys = ["later".to_string(), "earlier".to_string()];

        let ranked = policy.rank([(&keys[0], &a, 7), (&keys[1], &b, 3)], now);
        assert_eq!(ranked, vec!["earlier".to_string(), "later".to_string()]);
    }
}
