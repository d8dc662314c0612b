//! Bounded in-process blob store

use crate::error::CacheError;
use crate::eviction::EvictionPolicy;
use crate::types::{CacheEntry, CacheKey, StoreBudget};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use file_blob_cache::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};

struct Slot {
    entry: CacheEntry,
    /// Insertion order, used to break score ties
    seq: u64,
}

#[derive(Default)]
struct MemoryState {
    slots: HashMap<CacheKey, Slot>,
    total_bytes: u64,
    next_seq: u64,
}

/// Point-in-time view of the memory tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub average_access_count: f64,
    pub pressure: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-memory blob store that never exceeds its budget.
///
/// Eviction runs inside the same critical section as the insert that
/// triggered it, so no caller can observe an over-budget state.
pub struct MemoryBlobStore {
    state: Mutex<MemoryState>,
    budget: StoreBudget,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new(budget: StoreBudget, policy: EvictionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            budget,
            policy,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_budget(budget: StoreBudget) -> Self {
        Self::new(budget, EvictionPolicy::default(), Arc::new(SystemClock))
    }

    pub fn budget(&self) -> StoreBudget {
        self.budget
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up an entry, recording the access
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut state = self.lock();

        match state.slots.get_mut(key) {
            Some(slot) => {
                slot.entry.touch(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up an entry without touching bookkeeping or counters
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().slots.contains_key(key)
    }

    /// Insert a payload, evicting as needed first.
    ///
    /// Returns false when the payload alone is larger than the whole budget
    /// and was therefore not cached.
    pub fn put(&self, key: CacheKey, payload: Bytes) -> bool {
        let size = payload.len() as u64;
        let now = self.clock.now();
        let mut state = self.lock();

        // The old bytes go even when the new ones are refused
        if let Some(previous) = state.slots.remove(&key) {
            state.total_bytes -= previous.entry.size_bytes;
        }

        if size > self.budget.max_bytes || self.budget.max_entries == 0 {
            debug!(key = %key, size, max_bytes = self.budget.max_bytes, "Blob exceeds memory budget, not cached");
            return false;
        }

        if !self
            .budget
            .allows(state.slots.len() + 1, state.total_bytes + size)
        {
            self.evict(&mut state, Some(size), now);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.total_bytes += size;
        state.slots.insert(
            key,
            Slot {
                entry: CacheEntry::new(payload, now),
                seq,
            },
        );

        self.enforce_budget(&mut state, now);
        true
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        let slot = state.slots.remove(key)?;
        state.total_bytes -= slot.entry.size_bytes;
        Some(slot.entry)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.slots.clear();
        state.total_bytes = 0;
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.lock();
        let entries = state.slots.len();
        let total_accesses: u64 = state.slots.values().map(|s| s.entry.access_count).sum();

        MemoryStats {
            entries,
            total_bytes: state.total_bytes,
            average_access_count: if entries == 0 {
                0.0
            } else {
                total_accesses as f64 / entries as f64
            },
            pressure: self.pressure(&state),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn pressure(&self, state: &MemoryState) -> f64 {
        if self.budget.max_bytes == 0 {
            return 1.0;
        }
        state.total_bytes as f64 / self.budget.max_bytes as f64
    }

    fn fits(&self, state: &MemoryState, incoming: Option<u64>) -> bool {
        match incoming {
            Some(size) => self
                .budget
                .allows(state.slots.len() + 1, state.total_bytes + size),
            None => self.budget.allows(state.slots.len(), state.total_bytes),
        }
    }

    /// Evict the lowest-scoring batch, then keep going until `incoming` fits
    fn evict(&self, state: &mut MemoryState, incoming: Option<u64>, now: DateTime<Utc>) -> usize {
        let pressure = self.pressure(state);
        let batch = self.policy.batch_size(state.slots.len(), pressure);
        let ranked: Vec<CacheKey> = self.policy.rank(
            state.slots.iter().map(|(key, slot)| (key, &slot.entry, slot.seq)),
            now,
        );

        let mut evicted = 0;
        for key in ranked {
            if evicted >= batch && self.fits(state, incoming) {
                break;
            }
            if let Some(slot) = state.slots.remove(&key) {
                state.total_bytes -= slot.entry.size_bytes;
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(
            evicted,
            pressure,
            remaining = state.slots.len(),
            "Memory eviction pass"
        );
        evicted
    }

    /// Last line of defence for the budget invariant
    fn enforce_budget(&self, state: &mut MemoryState, now: DateTime<Utc>) {
        if self.fits(state, None) {
            return;
        }

        let violation = CacheError::BudgetViolation {
            entries: state.slots.len(),
            max_entries: self.budget.max_entries,
            bytes: state.total_bytes,
            max_bytes: self.budget.max_bytes,
        };
        error!(error = %violation, "Forcing eviction pass");
        debug_assert!(false, "{}", violation);

        self.evict(state, None, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use file_blob_cache::ManualClock;

    fn key(n: usize) -> CacheKey {
        CacheKey::original(format!("https://cdn.example.com/{n}.jpg"))
    }

    fn store(max_entries: usize, max_bytes: u64) -> (MemoryBlobStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryBlobStore::new(
            StoreBudget::new(max_entries, max_bytes),
            EvictionPolicy::default(),
            clock.clone(),
        );
        (store, clock)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _) = store(10, 1024);
        assert!(store.put(key(1), Bytes::from_static(b"hello")));

        let entry = store.get(&key(1)).unwrap();
        assert_eq!(&entry.payload[..], b"hello");
        assert_eq!(entry.access_count, 1);
        assert!(store.get(&key(2)).is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_budget_holds_after_every_put() {
        let (store, clock) = store(7, 4_000);
        // Deterministic pseudo-random sizes and keys
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let size = (seed % 1_200) as usize + 1;
            let k = (seed % 23) as usize;

            store.put(key(k), Bytes::from(vec![0u8; size]));
            if seed % 3 == 0 {
                store.get(&key((seed % 11) as usize));
            }
            clock.advance(Duration::seconds(((seed % 90) + 1) as i64));

            let stats = store.stats();
            assert!(stats.entries <= 7, "entries {}", stats.entries);
            assert!(stats.total_bytes <= 4_000, "bytes {}", stats.total_bytes);
        }
    }

    #[test]
    fn test_hot_entry_survives_cold_one() {
        let (store, clock) = store(2, 1024 * 1024);

        store.put(key(1), Bytes::from_static(b"cold"));
        store.get(&key(1));
        clock.advance(Duration::minutes(30));

        store.put(key(2), Bytes::from_static(b"hot"));
        for _ in 0..100 {
            store.get(&key(2));
        }

        store.put(key(3), Bytes::from_static(b"new"));

        assert!(!store.contains(&key(1)));
        assert!(store.contains(&key(2)));
        assert!(store.contains(&key(3)));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_high_pressure_evicts_larger_batch() {
        let (store, clock) = store(10, 1000);
        for n in 0..10 {
            store.put(key(n), Bytes::from(vec![0u8; 95]));
            clock.advance(Duration::seconds(1));
        }
        // 950/1000 bytes in use: above the critical threshold, 40% of 10 go
        store.put(key(99), Bytes::from(vec![0u8; 10]));

        let stats = store.stats();
        assert_eq!(stats.evictions, 4);
        assert_eq!(stats.entries, 7);
    }

    #[test]
    fn test_mild_pressure_evicts_small_batch() {
        let (store, clock) = store(10, 100_000);
        for n in 0..10 {
            store.put(key(n), Bytes::from(vec![0u8; 10]));
            clock.advance(Duration::seconds(1));
        }
        store.put(key(99), Bytes::from(vec![0u8; 10]));

        // ceil(10 * 0.15) = 2
        assert_eq!(store.stats().evictions, 2);
        assert_eq!(store.stats().entries, 9);
    }

    #[test]
    fn test_large_payload_evicts_until_it_fits() {
        let (store, clock) = store(100, 1000);
        for n in 0..10 {
            store.put(key(n), Bytes::from(vec![0u8; 50]));
            clock.advance(Duration::seconds(1));
        }
        store.put(key(50), Bytes::from(vec![0u8; 900]));

        let stats = store.stats();
        assert!(stats.total_bytes <= 1000);
        assert!(store.contains(&key(50)));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let (store, _) = store(10, 100);
        store.put(key(1), Bytes::from_static(b"keep me"));

        assert!(!store.put(key(2), Bytes::from(vec![0u8; 101])));
        assert!(store.contains(&key(1)));
        assert!(!store.contains(&key(2)));
    }

    #[test]
    fn test_oversized_replacement_drops_stale_bytes() {
        let (store, _) = store(10, 100);
        store.put(key(1), Bytes::from_static(b"stale"));

        assert!(!store.put(key(1), Bytes::from(vec![0u8; 101])));
        assert!(store.get(&key(1)).is_none());
        assert_eq!(store.stats().total_bytes, 0);
    }

    #[test]
    fn test_replacing_key_does_not_double_count() {
        let (store, _) = store(10, 1000);
        store.put(key(1), Bytes::from(vec![0u8; 100]));
        store.put(key(1), Bytes::from(vec![0u8; 40]));

        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 40);
    }

    #[test]
    fn test_last_access_never_moves_backwards() {
        let (store, clock) = store(10, 1000);
        let start = clock.now();
        store.put(key(1), Bytes::from_static(b"x"));

        clock.set(start - Duration::minutes(10));
        let entry = store.get(&key(1)).unwrap();
        assert_eq!(entry.last_access_at, start);
    }

    #[test]
    fn test_peek_does_not_record_access() {
        let (store, _) = store(10, 1000);
        store.put(key(1), Bytes::from_static(b"x"));

        let before = store.peek(&key(1)).unwrap();
        store.stats();
        let after = store.peek(&key(1)).unwrap();
        assert_eq!(before.access_count, 0);
        assert_eq!(after.access_count, 0);
        assert_eq!(store.stats().hits, 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _) = store(10, 1000);
        store.put(key(1), Bytes::from_static(b"one"));
        store.put(key(2), Bytes::from_static(b"two"));

        assert!(store.remove(&key(1)).is_some());
        assert!(store.remove(&key(1)).is_none());
        assert_eq!(store.stats().total_bytes, 3);

        store.clear();
        let stats = store.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_stats_average_and_pressure() {
        let (store, _) = store(10, 100);
        store.put(key(1), Bytes::from(vec![0u8; 25]));
        store.put(key(2), Bytes::from(vec![0u8; 25]));
        store.get(&key(1));
        store.get(&key(1));
        store.get(&key(1));
        store.get(&key(2));

        let stats = store.stats();
        assert_eq!(stats.average_access_count, 2.0);
        assert!((stats.pressure - 0.5).abs() < 1e-9);
    }
}
