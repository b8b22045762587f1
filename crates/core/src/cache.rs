//! Size- and TTL-bounded map with least-recently-used eviction.
//!
//! Backs both the classification cache and the search result cache. Time is
//! read from `tokio::time::Instant` so paused-clock tests can drive expiry.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Debug)]
struct CacheSlot<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

#[derive(Clone, Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheSlot<V>>,
    recency: BTreeMap<u64, K>,
    ttl: Duration,
    capacity: usize,
    tick: u64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { entries: HashMap::new(), recency: BTreeMap::new(), ttl, capacity, tick: 0 }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a clone of the live value. An entry at or past its TTL is
    /// removed and reported as a miss.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(slot) => self.is_expired(slot, now),
        };
        if expired {
            self.remove(key);
            return None;
        }

        let tick = self.next_tick();
        let slot = self.entries.get_mut(key)?;
        self.recency.remove(&slot.last_used);
        slot.last_used = tick;
        self.recency.insert(tick, key.clone());
        Some(slot.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        self.remove(&key);
        while self.entries.len() >= self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }

        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, CacheSlot { value, inserted_at: now, last_used: tick });
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.last_used);
        Some(slot.value)
    }

    /// Live entries, without touching recency.
    pub fn live_entries(&self, now: Instant) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries
            .iter()
            .filter(move |(_, slot)| !self.is_expired(slot, now))
            .map(|(key, slot)| (key, &slot.value))
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired = self
            .entries
            .iter()
            .filter(|(_, slot)| self.is_expired(slot, now))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn is_expired(&self, slot: &CacheSlot<V>, now: Instant) -> bool {
        now.saturating_duration_since(slot.inserted_at) >= self.ttl
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
