use std::time::Duration;

use tokio::time::Instant;

use aisle_core::cache::TtlCache;
use aisle_core::domain::classification::unit_interval;
use aisle_core::domain::search::SearchItem;
use aisle_core::text::{contains_phrase, normalize_text};

/// Alpha is bucketed in steps of 0.1, giving buckets `0..=10`.
pub fn alpha_bucket(alpha: f64) -> u8 {
    (unit_interval(alpha) * 10.0).round() as u8
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchCacheKey {
    pub text: String,
    pub alpha_bucket: u8,
}

impl SearchCacheKey {
    pub fn new(text: &str, alpha: f64) -> Self {
        Self { text: normalize_text(text), alpha_bucket: alpha_bucket(alpha) }
    }
}

/// Result sets from live searches, kept for degraded answers.
#[derive(Debug)]
pub struct SearchCache {
    entries: TtlCache<SearchCacheKey, Vec<SearchItem>>,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { entries: TtlCache::new(capacity, ttl) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: SearchCacheKey, items: Vec<SearchItem>, now: Instant) {
        if key.text.is_empty() || items.is_empty() {
            return;
        }
        self.entries.insert(key, items, now);
    }

    /// Most specific live entry for `key`: the exact key, then the same text
    /// at the nearest alpha bucket (lower bucket on a tie), then the longest
    /// cached text that contains or is contained in the query text as a
    /// whole-word phrase.
    pub fn lookup(&mut self, key: &SearchCacheKey, now: Instant) -> Option<Vec<SearchItem>> {
        if let Some(items) = self.entries.get(key, now) {
            return Some(items);
        }
        if key.text.is_empty() {
            return None;
        }

        let nearest_bucket = self
            .entries
            .live_entries(now)
            .filter(|(candidate, _)| candidate.text == key.text)
            .min_by_key(|(candidate, _)| {
                (candidate.alpha_bucket.abs_diff(key.alpha_bucket), candidate.alpha_bucket)
            })
            .map(|(candidate, _)| candidate.clone());
        if let Some(candidate) = nearest_bucket {
            return self.entries.get(&candidate, now);
        }

        let substring = self
            .entries
            .live_entries(now)
            .filter(|(candidate, _)| {
                contains_phrase(&key.text, &candidate.text)
                    || contains_phrase(&candidate.text, &key.text)
            })
            .max_by(|(left, _), (right, _)| {
                left.text
                    .len()
                    .cmp(&right.text.len())
                    .then_with(|| {
                        right
                            .alpha_bucket
                            .abs_diff(key.alpha_bucket)
                            .cmp(&left.alpha_bucket.abs_diff(key.alpha_bucket))
                    })
                    .then_with(|| right.cmp(left))
            })
            .map(|(candidate, _)| candidate.clone());

        substring.and_then(|candidate| self.entries.get(&candidate, now))
    }
}
