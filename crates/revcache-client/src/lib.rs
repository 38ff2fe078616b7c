//! Local cache client for serialized object revisions.
//!
//! This crate layers the storage-facing concerns over the [`revcache`]
//! segmented LRU:
//!
//! - **Key encoding**: `(oid, tid)` pairs compose the mapping key
//! - **Value codec**: optional zlib compression with a stored tag byte
//! - **Size ceiling**: writes above `object_max` are dropped, not cached
//! - **Snapshots**: a versioned, little-endian, crc-checked file format that
//!   persists entries MRU→LRU so a restore reproduces the ring layout
//!
//! The client is shared across connections and serialized by a single
//! mutex; no lock is ever held across disk I/O or compression.
//!
//! # Example
//!
//! ```
//! use revcache_client::{CacheOptions, Compression, LocalClient};
//!
//! let client = LocalClient::new(
//!     CacheOptions::default().with_local_mb(32).with_compression(Compression::Zlib),
//! );
//! client.set(1, 42, b"serialized revision");
//! assert_eq!(client.get(1, 42).unwrap().tid, 42);
//! ```

mod client;
mod compress;
mod options;
mod snapshot;

pub use client::LocalClient;
pub use compress::{Compression, DecodeError, COMPRESSION_THRESHOLD};
pub use options::CacheOptions;
pub use snapshot::SnapshotError;

// Re-export the core types callers handle directly.
pub use revcache::{CacheKey, CacheValue, Generation, RingStats, StatsSnapshot};
