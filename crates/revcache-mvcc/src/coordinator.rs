//! The cross-connection visibility coordinator.
//!
//! One coordinator serves every connection of a process. It owns a
//! contiguous, monotone chain of transaction-range indexes and the set of
//! registered connection caches. Polls extend the chain and broadcast
//! invalidations; reads resolve an object's visible tid against the chain,
//! bounded by the asking connection's own highest visible tid, so each
//! connection keeps a stable view between its polls.
//!
//! Locking: one mutex over the chain and the registration set. `poll`
//! mutates and broadcasts while holding it; sinks must accept invalidations
//! synchronously and without calling back into the coordinator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use revcache_client::LocalClient;

use crate::error::MvccError;
use crate::tri::TransactionRangeObjectIndex;

/// Receives invalidations broadcast by [`MvccCoordinator::poll`].
///
/// `invalidate(oid, keep_tid)` means: `keep_tid` is now the latest visible
/// revision of `oid`; any other cached revision of it must not be served
/// again.
pub trait InvalidationSink: Send + Sync {
    fn invalidate(&self, oid: i64, keep_tid: i64);
}

impl InvalidationSink for LocalClient {
    fn invalidate(&self, oid: i64, keep_tid: i64) {
        self.invalidate_except(oid, keep_tid);
    }
}

/// Identity of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Registration {
    sink: Arc<dyn InvalidationSink>,
    highest_visible_tid: i64,
}

#[derive(Default)]
struct State {
    chain: VecDeque<Arc<TransactionRangeObjectIndex>>,
    connections: HashMap<ConnectionId, Registration>,
    next_id: u64,
}

impl State {
    fn current_hvt(&self) -> i64 {
        self.chain
            .back()
            .map_or(0, |tri| tri.highest_visible_tid())
    }

    fn gc(&mut self) {
        let current = self.current_hvt();
        let min_hvt = self
            .connections
            .values()
            .map(|r| r.highest_visible_tid)
            .min()
            .unwrap_or(current);
        let mut dropped = 0usize;
        while self.chain.len() > 1
            && self
                .chain
                .front()
                .is_some_and(|tri| tri.highest_visible_tid() < min_hvt)
        {
            self.chain.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, min_hvt, "dropped unreferenced indexes");
        }
    }
}

/// Registry of connection caches plus the shared index chain.
#[derive(Default)]
pub struct MvccCoordinator {
    state: Mutex<State>,
}

impl MvccCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's cache for invalidation delivery. The
    /// connection starts at the coordinator's current highest visible tid.
    pub fn register(&self, sink: Arc<dyn InvalidationSink>) -> ConnectionId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ConnectionId(state.next_id);
        let highest_visible_tid = state.current_hvt();
        state.connections.insert(
            id,
            Registration {
                sink,
                highest_visible_tid,
            },
        );
        id
    }

    /// Remove a connection. Returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        let removed = state.connections.remove(&id).is_some();
        if removed {
            state.gc();
        }
        removed
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.state.lock().connections.contains_key(&id)
    }

    /// The chain's newest tid; zero before the first poll.
    pub fn highest_visible_tid(&self) -> i64 {
        self.state.lock().current_hvt()
    }

    /// The hvt a connection last advanced to.
    pub fn connection_hvt(&self, id: ConnectionId) -> Option<i64> {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(|r| r.highest_visible_tid)
    }

    /// Number of indexes currently retained.
    pub fn index_count(&self) -> usize {
        self.state.lock().chain.len()
    }

    /// Ingest one polling interval `(since_tid, until_tid]` with its change
    /// list, on behalf of `connection`.
    ///
    /// When the interval advances the chain it must abut the chain end;
    /// a new index is appended and every changed oid is invalidated in all
    /// registered caches, keeping only its newest tid. An interval the
    /// chain already covers only advances the connection's hvt. Constructor
    /// or contiguity failures abort the poll with coordinator state
    /// untouched.
    pub fn poll(
        &self,
        connection: ConnectionId,
        since_tid: i64,
        until_tid: i64,
        changes: &[(i64, i64)],
    ) -> Result<(), MvccError> {
        let mut state = self.state.lock();
        let current = state.current_hvt();

        if state.chain.is_empty() || until_tid > current {
            if !state.chain.is_empty() && since_tid != current {
                return Err(MvccError::NonContiguous {
                    expected: current,
                    got: since_tid,
                });
            }
            let tri = TransactionRangeObjectIndex::new(
                since_tid,
                until_tid,
                changes.iter().copied(),
            )?;
            let tri = Arc::new(tri);
            state.chain.push_back(tri.clone());
            debug!(
                since_tid,
                until_tid,
                changed = tri.len(),
                "extended index chain"
            );
            for registration in state.connections.values() {
                for (oid, tid) in tri.iter() {
                    registration.sink.invalidate(oid, tid);
                }
            }
        }

        if let Some(registration) = state.connections.get_mut(&connection) {
            registration.highest_visible_tid = registration.highest_visible_tid.max(until_tid);
        }
        state.gc();
        Ok(())
    }

    /// Resolve the tid of `oid` visible to a connection whose highest
    /// visible tid is `connection_hvt`. `None` means the chain knows of no
    /// change; the caller falls back to the adapter's current revision.
    pub fn visible_tid(&self, oid: i64, connection_hvt: i64) -> Option<i64> {
        let state = self.state.lock();
        for tri in state.chain.iter().rev() {
            if tri.highest_visible_tid() > connection_hvt {
                continue;
            }
            if let Some(tid) = tri.lookup(oid) {
                return Some(tid);
            }
        }
        None
    }

    /// Drop indexes no registered connection can still observe.
    pub fn gc(&self) {
        self.state.lock().gc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlainMutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: PlainMutex<Vec<(i64, i64)>>,
    }

    impl InvalidationSink for RecordingSink {
        fn invalidate(&self, oid: i64, keep_tid: i64) {
            self.seen.lock().push((oid, keep_tid));
        }
    }

    #[test]
    fn test_register_unregister() {
        let coordinator = MvccCoordinator::new();
        let sink = Arc::new(RecordingSink::default());
        let id = coordinator.register(sink);
        assert!(coordinator.is_registered(id));
        assert!(coordinator.unregister(id));
        assert!(!coordinator.is_registered(id));
        assert!(!coordinator.unregister(id));
    }

    #[test]
    fn test_poll_extends_chain_and_resolves_visibility() {
        let coordinator = MvccCoordinator::new();
        let sink = Arc::new(RecordingSink::default());
        let id = coordinator.register(sink);

        coordinator.poll(id, 0, 10, &[(1, 5), (2, 7)]).unwrap();
        coordinator.poll(id, 10, 20, &[(1, 15)]).unwrap();

        assert_eq!(coordinator.highest_visible_tid(), 20);
        assert_eq!(coordinator.visible_tid(1, 20), Some(15));
        assert_eq!(coordinator.visible_tid(2, 20), Some(7));
        assert_eq!(coordinator.visible_tid(3, 20), None);

        // A connection still at hvt 10 must not see the newer revision.
        assert_eq!(coordinator.visible_tid(1, 10), Some(5));
    }

    #[test]
    fn test_poll_rejects_gap_and_leaves_state_unchanged() {
        let coordinator = MvccCoordinator::new();
        let sink = Arc::new(RecordingSink::default());
        let id = coordinator.register(sink);

        coordinator.poll(id, 0, 10, &[(1, 5)]).unwrap();
        let err = coordinator.poll(id, 12, 20, &[(1, 15)]).unwrap_err();
        assert!(matches!(err, MvccError::NonContiguous { expected: 10, got: 12 }));
        assert_eq!(coordinator.highest_visible_tid(), 10);
        assert_eq!(coordinator.index_count(), 1);
    }

    #[test]
    fn test_poll_rejects_bad_datum_and_leaves_state_unchanged() {
        let coordinator = MvccCoordinator::new();
        let sink = Arc::new(RecordingSink::default());
        let id = coordinator.register(sink);

        coordinator.poll(id, 0, 10, &[]).unwrap();
        assert!(coordinator.poll(id, 10, 20, &[(1, 25)]).is_err());
        assert_eq!(coordinator.highest_visible_tid(), 10);
    }

    #[test]
    fn test_poll_broadcasts_invalidations_to_all_sinks() {
        let coordinator = MvccCoordinator::new();
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let id_a = coordinator.register(a.clone());
        let _id_b = coordinator.register(b.clone());

        coordinator.poll(id_a, 0, 10, &[(1, 5), (2, 9)]).unwrap();

        let mut seen_a = a.seen.lock().clone();
        let mut seen_b = b.seen.lock().clone();
        seen_a.sort_unstable();
        seen_b.sort_unstable();
        assert_eq!(seen_a, vec![(1, 5), (2, 9)]);
        assert_eq!(seen_b, seen_a);
    }

    #[test]
    fn test_covered_interval_only_advances_connection() {
        let coordinator = MvccCoordinator::new();
        let a = Arc::new(RecordingSink::default());
        let id_a = coordinator.register(a.clone());
        coordinator.poll(id_a, 0, 20, &[(1, 5)]).unwrap();

        // A second connection catching up over an already-covered window.
        let b = Arc::new(RecordingSink::default());
        let id_b = coordinator.register(b.clone());
        coordinator.poll(id_b, 0, 20, &[(1, 5)]).unwrap();

        assert_eq!(coordinator.index_count(), 1);
        assert_eq!(coordinator.connection_hvt(id_b), Some(20));
        assert!(b.seen.lock().is_empty(), "no re-broadcast for covered window");
    }

    #[test]
    fn test_gc_drops_indexes_below_minimum_connection_hvt() {
        let coordinator = MvccCoordinator::new();
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let id_a = coordinator.register(a);
        let id_b = coordinator.register(b);

        coordinator.poll(id_a, 0, 10, &[(1, 5)]).unwrap();
        coordinator.poll(id_a, 10, 20, &[(1, 15)]).unwrap();
        coordinator.poll(id_a, 20, 30, &[(2, 25)]).unwrap();

        // b never advanced past 0, so everything is retained.
        assert_eq!(coordinator.index_count(), 3);

        coordinator.poll(id_b, 0, 30, &[]).unwrap();
        coordinator.gc();
        assert_eq!(coordinator.index_count(), 1, "only the newest index survives");
        assert_eq!(coordinator.highest_visible_tid(), 30);
    }
}
