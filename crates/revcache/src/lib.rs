//! Segmented LRU cache core for serialized object revisions.
//!
//! `revcache` is the data-structure heart of a client-side MVCC object
//! cache: a byte-bounded key/value store keyed by `(oid, tid)` pairs,
//! organized as three generations with frequency-biased admission:
//!
//! - **eden** — tiny, absorbs insert churn
//! - **probation** — eden overflow, where new entries prove themselves
//! - **protected** — the bulk of the budget, holding entries hit while in
//!   probation
//!
//! When probation has no room for a spilling candidate, a TinyLFU-style
//! admission contest compares frequencies with probation's LRU; the
//! incumbent survives ties. All entries live in one arena and are addressed
//! by index, so ring moves and map lookups are O(1) and allocation-free.
//!
//! # Example
//!
//! ```
//! use revcache::{CacheKey, CacheValue, SizedMapping};
//!
//! let mut cache = SizedMapping::new(1024 * 1024);
//! cache.insert(CacheKey::new(1, 42), CacheValue::new(b"state".to_vec(), 42));
//!
//! let hit = cache.get(&CacheKey::new(1, 42)).unwrap();
//! assert_eq!(hit.tid, 42);
//! assert!(cache.get(&CacheKey::new(1, 7)).is_none());
//! ```

mod config;
mod entry;
mod invariants;
mod mapping;
mod ring;
mod slru;
mod stats;

pub use config::GenerationWeights;
pub use entry::{CacheKey, CacheValue, Generation, KEY_WEIGHT};
pub use mapping::{EntryRef, SizedMapping};
pub use stats::{RingStats, StatsSnapshot};
