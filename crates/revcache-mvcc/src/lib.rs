//! MVCC visibility coordination for a shared object cache.
//!
//! This crate layers multi-version concurrency control over the
//! [`revcache_client`] local cache:
//!
//! - [`TransactionRangeObjectIndex`] — an immutable `(oid → tid)` map valid
//!   over one polling interval `(complete_since, highest_visible]`
//! - [`MvccCoordinator`] — the process-wide chain of indexes plus the
//!   registry of connection caches; polls extend the chain and broadcast
//!   invalidations
//! - [`StorageCache`] — the per-connection facade: visibility-bounded
//!   loads, poll application, and the two-phase-commit write buffer
//! - [`Adapter`] — the capability seam to the authoritative store, with
//!   [`MemoryAdapter`] as the in-process flavor
//!
//! Visibility is determined solely by a connection's highest visible tid
//! and the index chain: within one polling interval a connection's view of
//! any object is stable, no matter what other connections commit.

mod adapter;
mod coordinator;
mod error;
mod storage;
mod tri;

pub use adapter::{Adapter, MemoryAdapter};
pub use coordinator::{ConnectionId, InvalidationSink, MvccCoordinator};
pub use error::{AdapterError, MvccError};
pub use storage::{LoadedObject, StorageCache};
pub use tri::TransactionRangeObjectIndex;
