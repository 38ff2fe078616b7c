//! Key→entry mapping layered on the segmented LRU.
//!
//! `SizedMapping` is the single owner of cache state: the entry arena (via
//! the LRU), the key map, a secondary oid→revisions index used for MVCC
//! invalidation, and the operation counters. Every path that adds or removes
//! an entry flows through here, which is what keeps the map, the index, and
//! the ring accounting in agreement.

use std::collections::HashMap;

use tracing::trace;

use crate::config::GenerationWeights;
use crate::entry::{CacheKey, CacheValue, Generation};
use crate::slru::SegmentedLru;
use crate::stats::{Counters, RingStats, StatsSnapshot};

/// Borrowed view of one cache entry, as yielded by the ring iterators.
#[derive(Debug)]
pub struct EntryRef<'a> {
    pub key: CacheKey,
    pub value: &'a CacheValue,
    pub frequency: u32,
    pub generation: Generation,
}

/// A byte-bounded mapping of `(oid, tid)` keys to cached revisions.
pub struct SizedMapping {
    lru: SegmentedLru,
    map: HashMap<CacheKey, u32>,
    by_oid: HashMap<i64, Vec<i64>>,
    counters: Counters,
}

impl SizedMapping {
    /// Create a mapping with the default generation split.
    pub fn new(byte_budget: usize) -> Self {
        Self::with_weights(byte_budget, &GenerationWeights::default())
    }

    pub fn with_weights(byte_budget: usize, weights: &GenerationWeights) -> Self {
        Self {
            lru: SegmentedLru::new(byte_budget, weights),
            map: HashMap::new(),
            by_oid: HashMap::new(),
            counters: Counters::default(),
        }
    }

    #[inline]
    pub fn byte_budget(&self) -> usize {
        self.lru.byte_budget()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Current total weight across all generations.
    pub fn total_size(&self) -> usize {
        self.lru.total_size()
    }

    #[inline]
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or update. An existing key keeps its ring position history:
    /// the entry is re-weighed, made MRU of its current ring, and any
    /// overflow is settled by the next operation's catch-up pass.
    pub fn insert(&mut self, key: CacheKey, value: CacheValue) {
        let Self {
            lru,
            map,
            by_oid,
            counters,
        } = self;
        counters.sets += 1;
        if let Some(&idx) = map.get(&key) {
            lru.update(idx, value);
            return;
        }
        let idx = lru.add(key, value, &mut |victim: CacheKey| {
            map.remove(&victim);
            detach_revision(by_oid, victim);
            counters.evictions += 1;
            trace!(oid = victim.oid, tid = victim.tid, "evicted");
        });
        map.insert(key, idx);
        by_oid.entry(key.oid).or_default().push(key.tid);
    }

    /// Look up a key, recording the hit or miss and repositioning the entry
    /// per the segmented-LRU read policy.
    pub fn get(&mut self, key: &CacheKey) -> Option<&CacheValue> {
        let Self {
            lru,
            map,
            by_oid,
            counters,
        } = self;
        let Some(&idx) = map.get(key) else {
            counters.misses += 1;
            return None;
        };
        counters.hits += 1;
        lru.on_hit(idx, &mut |victim: CacheKey| {
            map.remove(&victim);
            detach_revision(by_oid, victim);
            counters.evictions += 1;
            trace!(oid = victim.oid, tid = victim.tid, "evicted");
        });
        Some(&lru.entry(idx).value)
    }

    /// Look up without touching recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheValue> {
        self.map.get(key).map(|&idx| &self.lru.entry(idx).value)
    }

    pub fn frequency(&self, key: &CacheKey) -> Option<u32> {
        self.map.get(key).map(|&idx| self.lru.entry(idx).frequency)
    }

    pub fn generation_of(&self, key: &CacheKey) -> Option<Generation> {
        self.map.get(key).map(|&idx| self.lru.entry(idx).generation)
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheValue> {
        let idx = self.map.remove(key)?;
        detach_revision(&mut self.by_oid, *key);
        Some(self.lru.delete(idx).value)
    }

    /// Drop every cached revision of `oid` except `keep_tid`. Returns the
    /// number of entries removed. This is the MVCC invalidation hook: after
    /// a poll reveals a newer committed revision, older ones must not be
    /// served again.
    pub fn remove_oid_except(&mut self, oid: i64, keep_tid: i64) -> usize {
        let Some(tids) = self.by_oid.get(&oid) else {
            return 0;
        };
        let stale: Vec<i64> = tids.iter().copied().filter(|&t| t != keep_tid).collect();
        let mut removed = 0;
        for tid in stale {
            if self.remove(&CacheKey::new(oid, tid)).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Drop everything; counters survive, budget and caps are kept.
    pub fn clear(&mut self) {
        self.lru.clear();
        self.map.clear();
        self.by_oid.clear();
    }

    /// Iterate one generation MRU→LRU. Order is the snapshot stream order.
    pub fn iter_mru(&self, generation: Generation) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        self.lru.iter_ring(generation).map(|(_, e)| EntryRef {
            key: e.key,
            value: &e.value,
            frequency: e.frequency,
            generation: e.generation,
        })
    }

    /// Iterate one generation LRU→MRU.
    pub fn iter_lru(&self, generation: Generation) -> impl Iterator<Item = EntryRef<'_>> + '_ {
        self.lru.iter_ring_rev(generation).map(|(_, e)| EntryRef {
            key: e.key,
            value: &e.value,
            frequency: e.frequency,
            generation: e.generation,
        })
    }

    /// Re-create an entry from a snapshot record, directly in its recorded
    /// generation and with its recorded frequency. Intended to be called in
    /// reverse stream order (LRU first). When the recorded generation cannot
    /// hold the entry under the current budget, the entry itself may be
    /// dropped again; that is not an error.
    pub fn restore_entry(
        &mut self,
        key: CacheKey,
        value: CacheValue,
        frequency: u32,
        generation: Generation,
    ) {
        let Self {
            lru,
            map,
            by_oid,
            counters,
        } = self;
        if map.contains_key(&key) {
            // Duplicate in the stream; the first occurrence is more recent.
            return;
        }
        let mut survived = true;
        let idx = lru.restore(key, value, frequency, generation, &mut |victim: CacheKey| {
            counters.evictions += 1;
            if victim == key {
                survived = false;
            } else {
                map.remove(&victim);
                detach_revision(by_oid, victim);
            }
        });
        if survived {
            map.insert(key, idx);
            by_oid.entry(key.oid).or_default().push(key.tid);
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.counters.hits,
            misses: self.counters.misses,
            sets: self.counters.sets,
            evictions: self.counters.evictions,
            size: self.total_size(),
            count: self.len(),
            byte_budget: self.byte_budget(),
        }
    }

    pub fn ring_stats(&self, generation: Generation) -> RingStats {
        let ring = self.lru.ring(generation);
        RingStats {
            generation,
            len: ring.len,
            size: ring.size,
            max_size: ring.max_size,
            over_size: ring.over_size,
        }
    }
}

fn detach_revision(by_oid: &mut HashMap<i64, Vec<i64>>, key: CacheKey) {
    if let Some(tids) = by_oid.get_mut(&key.oid) {
        tids.retain(|&t| t != key.tid);
        if tids.is_empty() {
            by_oid.remove(&key.oid);
        }
    }
}
