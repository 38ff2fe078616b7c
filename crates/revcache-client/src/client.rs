//! The local cache client.
//!
//! `LocalClient` wraps a [`SizedMapping`] behind a mutex and layers on the
//! storage-facing concerns: composing `(oid, tid)` keys, the value codec,
//! the per-object size ceiling, batched lookups, and snapshot persistence.
//! Critical sections are short and constant-time; compression and snapshot
//! I/O always run outside the lock.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

use revcache::{CacheKey, CacheValue, Generation, RingStats, SizedMapping, StatsSnapshot};

use crate::compress;
use crate::options::CacheOptions;
use crate::snapshot::{self, SnapshotError, SnapshotRecord};

/// Shared, mutex-serialized cache client. One instance is typically shared
/// by every connection of a process.
pub struct LocalClient {
    options: CacheOptions,
    inner: Mutex<SizedMapping>,
}

impl LocalClient {
    pub fn new(options: CacheOptions) -> Self {
        let inner = Mutex::new(SizedMapping::with_weights(
            options.byte_budget(),
            &options.weights,
        ));
        Self { options, inner }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Compose the mapping key for an object revision.
    #[inline]
    fn key(oid: i64, tid: i64) -> CacheKey {
        CacheKey::new(oid, tid)
    }

    /// Cache a state under `(oid, tid)`. Values above the configured
    /// per-object ceiling are dropped, not cached.
    pub fn set(&self, oid: i64, tid: i64, state: &[u8]) {
        if state.len() > self.options.object_max {
            warn!(
                oid,
                tid,
                len = state.len(),
                max = self.options.object_max,
                "dropping oversized value"
            );
            return;
        }
        let stored = compress::encode(self.options.compression, state);
        self.inner
            .lock()
            .insert(Self::key(oid, tid), CacheValue::new(stored, tid));
    }

    /// Cache "object does not exist at `tid`".
    pub fn set_tombstone(&self, oid: i64, tid: i64) {
        self.inner
            .lock()
            .insert(Self::key(oid, tid), CacheValue::tombstone(tid));
    }

    /// Look up `(oid, tid)`, decoding the stored state. Hits are recorded
    /// and reposition the entry; misses never fail.
    pub fn get(&self, oid: i64, tid: i64) -> Option<CacheValue> {
        let key = Self::key(oid, tid);
        let stored = self.inner.lock().get(&key).cloned()?;
        self.decode_value(key, stored)
    }

    /// Look up without touching recency or statistics.
    pub fn peek(&self, oid: i64, tid: i64) -> Option<CacheValue> {
        let key = Self::key(oid, tid);
        let stored = self.inner.lock().peek(&key).cloned()?;
        self.decode_value(key, stored)
    }

    /// Batched lookup. Returns only the hits; each hit is recorded exactly
    /// as an individual `get` would record it.
    pub fn get_multi(&self, keys: &[(i64, i64)]) -> HashMap<(i64, i64), CacheValue> {
        let stored: Vec<((i64, i64), CacheValue)> = {
            let mut inner = self.inner.lock();
            keys.iter()
                .filter_map(|&(oid, tid)| {
                    inner
                        .get(&Self::key(oid, tid))
                        .cloned()
                        .map(|value| ((oid, tid), value))
                })
                .collect()
        };
        stored
            .into_iter()
            .filter_map(|((oid, tid), value)| {
                self.decode_value(Self::key(oid, tid), value)
                    .map(|decoded| ((oid, tid), decoded))
            })
            .collect()
    }

    /// Remove one cached revision.
    pub fn delete(&self, oid: i64, tid: i64) -> bool {
        self.inner.lock().remove(&Self::key(oid, tid)).is_some()
    }

    /// Drop every cached revision of `oid` except `keep_tid`, returning how
    /// many were removed. This is the coordinator's invalidation hook.
    pub fn invalidate_except(&self, oid: i64, keep_tid: i64) -> usize {
        self.inner.lock().remove_oid_except(oid, keep_tid)
    }

    /// Drop the entire cache contents.
    pub fn flush_all(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.inner.lock().total_size()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.lock().stats()
    }

    pub fn ring_stats(&self, generation: Generation) -> RingStats {
        self.inner.lock().ring_stats(generation)
    }

    /// The `(oid, tid)` of a generation's least recently used entry.
    pub fn lru_key(&self, generation: Generation) -> Option<(i64, i64)> {
        self.inner
            .lock()
            .iter_lru(generation)
            .next()
            .map(|e| (e.key.oid, e.key.tid))
    }

    /// Persist the cache to the configured directory. Takes a structural
    /// copy under the lock, then streams to disk without it. With
    /// `overwrite` false, entries already present in the newest snapshot are
    /// skipped, producing a deduplicated delta file. Returns the written
    /// path.
    pub fn save(&self, overwrite: bool) -> Result<PathBuf, SnapshotError> {
        let dir = self.options.dir.clone().ok_or(SnapshotError::NoDirectory)?;
        let records = self.collect_records();
        snapshot::save(
            &dir,
            records,
            self.options.dir_count,
            self.options.dir_compress,
            overwrite,
        )
    }

    /// Load the newest snapshot from the configured directory, replacing the
    /// current contents. Returns the number of entries restored; zero when
    /// no snapshot exists. Any malformed snapshot aborts the restore and
    /// leaves the cache empty.
    pub fn restore(&self) -> Result<usize, SnapshotError> {
        let dir = self.options.dir.clone().ok_or(SnapshotError::NoDirectory)?;
        let loaded = snapshot::load_newest(&dir);
        let mut inner = self.inner.lock();
        inner.clear();
        let Some(records) = loaded? else {
            return Ok(0);
        };
        // The stream is MRU→LRU; replaying in reverse makes each ring's
        // insertion order rebuild its recency order.
        for record in records.into_iter().rev() {
            inner.restore_entry(
                CacheKey::new(record.oid, record.tid),
                CacheValue {
                    state: record.value,
                    tid: record.tid,
                },
                record.frequency,
                record.generation,
            );
        }
        Ok(inner.len())
    }

    fn collect_records(&self) -> Vec<SnapshotRecord> {
        let inner = self.inner.lock();
        let mut records = Vec::with_capacity(inner.len());
        for generation in Generation::ALL {
            for entry in inner.iter_mru(generation) {
                records.push(SnapshotRecord {
                    oid: entry.key.oid,
                    tid: entry.key.tid,
                    frequency: entry.frequency,
                    generation,
                    value: entry.value.state.clone(),
                });
            }
        }
        records
    }

    fn decode_value(&self, key: CacheKey, stored: CacheValue) -> Option<CacheValue> {
        let Some(bytes) = stored.state else {
            return Some(stored); // tombstone
        };
        match compress::decode(&bytes) {
            Ok(raw) => Some(CacheValue {
                state: Some(raw),
                tid: stored.tid,
            }),
            Err(err) => {
                warn!(oid = key.oid, tid = key.tid, %err, "dropping undecodable cached value");
                self.inner.lock().remove(&key);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Compression;

    fn client() -> LocalClient {
        LocalClient::new(CacheOptions::default())
    }

    #[test]
    fn test_set_get_round_trip() {
        let client = client();
        client.set(1, 42, b"object state");
        let value = client.get(1, 42).expect("hit");
        assert_eq!(value.state.as_deref(), Some(b"object state".as_slice()));
        assert_eq!(value.tid, 42);
        assert!(client.get(1, 43).is_none());
    }

    #[test]
    fn test_compressed_round_trip() {
        let options = CacheOptions::default().with_compression(Compression::Zlib);
        let client = LocalClient::new(options);
        let state = vec![7u8; 4_096];
        client.set(5, 10, &state);

        // The stored weight reflects the compressed size.
        assert!(client.total_size() < 1_024);
        assert_eq!(client.get(5, 10).unwrap().state.as_deref(), Some(state.as_slice()));
    }

    #[test]
    fn test_oversized_value_is_dropped() {
        let options = CacheOptions::default().with_object_max(1_024);
        let client = LocalClient::new(options);
        let before = client.total_size();
        client.set(1, 1, &vec![0u8; 4_096]);

        assert_eq!(client.total_size(), before);
        assert!(client.get(1, 1).is_none());
        assert_eq!(client.len(), 0);
    }

    #[test]
    fn test_tombstone() {
        let client = client();
        client.set_tombstone(9, 3);
        let value = client.get(9, 3).expect("tombstone is a hit");
        assert!(value.is_tombstone());
        assert_eq!(value.tid, 3);
    }

    #[test]
    fn test_get_multi_returns_only_hits() {
        let client = client();
        client.set(1, 1, b"one");
        client.set(2, 1, b"two");

        let hits = client.get_multi(&[(1, 1), (2, 1), (3, 1)]);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[&(1, 1)].state.as_deref(), Some(b"one".as_slice()));
        assert_eq!(hits[&(2, 1)].state.as_deref(), Some(b"two".as_slice()));
        assert!(!hits.contains_key(&(3, 1)));
        assert_eq!(client.stats().hits, 2);
        assert_eq!(client.stats().misses, 1);
    }

    #[test]
    fn test_invalidate_except() {
        let client = client();
        client.set(7, 1, b"old");
        client.set(7, 5, b"new");
        client.set(8, 1, b"other");

        assert_eq!(client.invalidate_except(7, 5), 1);
        assert!(client.get(7, 1).is_none());
        assert!(client.get(7, 5).is_some());
        assert!(client.get(8, 1).is_some());
    }

    #[test]
    fn test_flush_all() {
        let client = client();
        client.set(1, 1, b"x");
        client.flush_all();
        assert!(client.is_empty());
        assert_eq!(client.total_size(), 0);
    }

    #[test]
    fn test_stats_aggregation() {
        let client = client();
        client.set(1, 1, b"x");
        client.get(1, 1);
        client.get(2, 2);
        let stats = client.stats();
        assert_eq!((stats.sets, stats.hits, stats.misses), (1, 1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_without_dir_fails() {
        let client = client();
        assert!(matches!(client.save(true), Err(SnapshotError::NoDirectory)));
        assert!(matches!(client.restore(), Err(SnapshotError::NoDirectory)));
    }
}
