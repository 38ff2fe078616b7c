//! The per-connection storage cache facade.
//!
//! `StorageCache` is what a transactional connection talks to: it resolves
//! an object's visible tid through the coordinator, serves states out of the
//! shared local client, falls back to the adapter on a miss, and buffers
//! two-phase-commit writes until the final tid is known.
//!
//! Within one connection, reads reflect everything committed up to its last
//! `after_poll`, plus its own commits (tracked in `recent_changes` until the
//! next poll folds them into the shared index chain).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use revcache_client::LocalClient;

use crate::adapter::Adapter;
use crate::coordinator::{ConnectionId, MvccCoordinator};
use crate::error::MvccError;

/// A loaded object revision: the serialized state and the tid it was
/// committed at.
pub type LoadedObject = (Vec<u8>, i64);

pub struct StorageCache<A: Adapter> {
    adapter: Arc<A>,
    client: Arc<LocalClient>,
    coordinator: Arc<MvccCoordinator>,
    connection: ConnectionId,
    /// This connection's visibility bound.
    highest_visible_tid: i64,
    /// Changes this connection knows about ahead of the shared chain:
    /// its own commits since the last poll.
    recent_changes: HashMap<i64, i64>,
    /// Two-phase-commit write buffer, alive between `tpc_begin` and
    /// `after_tpc_finish` / `tpc_abort`.
    temp: Option<Vec<(i64, Vec<u8>)>>,
}

impl<A: Adapter> StorageCache<A> {
    /// Open a connection facade. Registers the shared client with the
    /// coordinator; the registration is dropped again on close.
    pub fn new(adapter: Arc<A>, client: Arc<LocalClient>, coordinator: Arc<MvccCoordinator>) -> Self {
        let connection = coordinator.register(client.clone());
        let highest_visible_tid = coordinator.highest_visible_tid();
        Self {
            adapter,
            client,
            coordinator,
            connection,
            highest_visible_tid,
            recent_changes: HashMap::new(),
            temp: None,
        }
    }

    #[inline]
    pub fn highest_visible_tid(&self) -> i64 {
        self.highest_visible_tid
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Load the revision of `oid` visible to this connection. Cache misses
    /// fall through to the adapter and the result is cached under its actual
    /// tid; `Ok(None)` means the object does not exist in this view.
    pub fn load(&self, oid: i64) -> Result<Option<LoadedObject>, MvccError> {
        let known_tid = self
            .recent_changes
            .get(&oid)
            .copied()
            .or_else(|| self.coordinator.visible_tid(oid, self.highest_visible_tid));

        if let Some(tid) = known_tid {
            if let Some(value) = self.client.get(oid, tid) {
                return Ok(match value.state {
                    Some(state) => Some((state, value.tid)),
                    None => None, // cached tombstone
                });
            }
        }

        match self.adapter.load_current(oid)? {
            Some((state, tid)) => {
                self.client.set(oid, tid, &state);
                Ok(Some((state, tid)))
            }
            None => {
                if let Some(tid) = known_tid {
                    // The index says the object changed at `tid` but the
                    // store has no current row: created and undone. Cache
                    // the nonexistence.
                    self.client.set_tombstone(oid, tid);
                }
                Ok(None)
            }
        }
    }

    /// Load a specific historical revision, bypassing visibility. Served
    /// from cache when present, fetched and cached otherwise.
    pub fn load_revision(&self, oid: i64, tid: i64) -> Result<Option<Vec<u8>>, MvccError> {
        if let Some(value) = self.client.get(oid, tid) {
            return Ok(value.state);
        }
        match self.adapter.load_revision(oid, tid)? {
            Some(state) => {
                self.client.set(oid, tid, &state);
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Poll the adapter for changes past this connection's hvt and apply
    /// them. Convenience wrapper over [`after_poll`].
    ///
    /// [`after_poll`]: Self::after_poll
    pub fn poll(&mut self) -> Result<i64, MvccError> {
        let last = self.adapter.last_committed_tid()?;
        if last <= self.highest_visible_tid {
            return Ok(self.highest_visible_tid);
        }
        let since = self
            .coordinator
            .highest_visible_tid()
            .max(self.highest_visible_tid);
        let changes = self.adapter.list_changes(since, last)?;
        self.after_poll(since, last, &changes)?;
        Ok(self.highest_visible_tid)
    }

    /// Apply one polling interval: advance this connection's visibility to
    /// `new_tid`, feed the change list to the coordinator (which broadcasts
    /// invalidations), and drop transaction-local buffers.
    pub fn after_poll(
        &mut self,
        prior_tid: i64,
        new_tid: i64,
        changes: &[(i64, i64)],
    ) -> Result<(), MvccError> {
        self.coordinator
            .poll(self.connection, prior_tid, new_tid, changes)?;
        self.highest_visible_tid = new_tid;
        self.recent_changes.clear();
        self.temp = None;
        debug!(
            connection = ?self.connection,
            new_tid,
            changed = changes.len(),
            "poll applied"
        );
        Ok(())
    }

    /// Open the two-phase-commit write buffer.
    pub fn tpc_begin(&mut self) {
        self.temp = Some(Vec::new());
    }

    /// Buffer a state written by the in-progress transaction. No visibility
    /// change; nothing is cached until the final tid is known.
    pub fn store_temp(&mut self, oid: i64, state: &[u8]) {
        self.temp
            .get_or_insert_with(Vec::new)
            .push((oid, state.to_vec()));
    }

    /// Discard the in-progress write buffer.
    pub fn tpc_abort(&mut self) {
        self.temp = None;
    }

    /// The transaction committed as `final_tid`: flush buffered writes into
    /// the shared cache under their final keys and remember them as this
    /// connection's own changes until the next poll.
    pub fn after_tpc_finish(&mut self, final_tid: i64) {
        let Some(buffer) = self.temp.take() else {
            return;
        };
        for (oid, state) in buffer {
            self.client.set(oid, final_tid, &state);
            self.recent_changes.insert(oid, final_tid);
        }
    }
}

impl<A: Adapter> Drop for StorageCache<A> {
    fn drop(&mut self) {
        self.coordinator.unregister(self.connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use revcache_client::CacheOptions;

    fn harness() -> (Arc<MemoryAdapter>, Arc<LocalClient>, Arc<MvccCoordinator>) {
        (
            Arc::new(MemoryAdapter::new()),
            Arc::new(LocalClient::new(CacheOptions::default())),
            Arc::new(MvccCoordinator::new()),
        )
    }

    #[test]
    fn test_load_miss_fetches_and_caches() {
        let (adapter, client, coordinator) = harness();
        adapter.commit(5, &[(1, b"one@5")]).unwrap();
        let mut cache = StorageCache::new(adapter, client.clone(), coordinator);
        cache.poll().unwrap();

        assert_eq!(cache.load(1).unwrap(), Some((b"one@5".to_vec(), 5)));
        // Second load is served from the client cache.
        assert_eq!(cache.load(1).unwrap(), Some((b"one@5".to_vec(), 5)));
        assert_eq!(client.stats().hits, 1);
        assert_eq!(cache.load(99).unwrap(), None, "missing object is not an error");
    }

    #[test]
    fn test_connection_registration_lifecycle() {
        let (adapter, client, coordinator) = harness();
        let cache = StorageCache::new(adapter, client, coordinator.clone());
        let id = cache.connection();
        assert!(coordinator.is_registered(id));
        drop(cache);
        assert!(!coordinator.is_registered(id));
    }

    #[test]
    fn test_two_phase_commit_flushes_under_final_tid() {
        let (adapter, client, coordinator) = harness();
        let mut cache = StorageCache::new(adapter.clone(), client.clone(), coordinator);

        cache.tpc_begin();
        cache.store_temp(1, b"draft one");
        cache.store_temp(2, b"draft two");
        // The committing machinery drives the adapter side.
        adapter.commit(7, &[(1, b"draft one"), (2, b"draft two")]).unwrap();
        cache.after_tpc_finish(7);

        // Own writes are visible before the next poll.
        assert_eq!(cache.load(1).unwrap(), Some((b"draft one".to_vec(), 7)));
        assert_eq!(client.peek(2, 7).unwrap().tid, 7);
    }

    #[test]
    fn test_tpc_abort_discards_buffer() {
        let (adapter, client, coordinator) = harness();
        let mut cache = StorageCache::new(adapter, client.clone(), coordinator);
        cache.tpc_begin();
        cache.store_temp(1, b"never committed");
        cache.tpc_abort();
        cache.after_tpc_finish(9);
        assert!(client.is_empty());
        assert_eq!(cache.load(1).unwrap(), None);
    }

    #[test]
    fn test_load_revision_bypasses_visibility() {
        let (adapter, client, coordinator) = harness();
        adapter.commit(5, &[(1, b"one@5")]).unwrap();
        adapter.commit(9, &[(1, b"one@9")]).unwrap();
        let cache = StorageCache::new(adapter, client, coordinator);

        assert_eq!(cache.load_revision(1, 5).unwrap(), Some(b"one@5".to_vec()));
        assert_eq!(cache.load_revision(1, 6).unwrap(), None);
    }
}
