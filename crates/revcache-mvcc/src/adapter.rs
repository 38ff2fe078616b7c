//! The seam to the authoritative store.
//!
//! The cache consumes a small capability set from whatever backs the
//! database: load the current revision of an object, load a specific
//! revision, list committed changes, and the three temp-table steps of a
//! two-phase commit. Real deployments implement this per database flavor;
//! [`MemoryAdapter`] is the in-process flavor used by tests and the
//! simulation harness.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::AdapterError;

/// Capabilities the cache requires from the authoritative store.
pub trait Adapter: Send + Sync {
    /// The current revision of `oid`: `(state, tid)`, or `None` when the
    /// object does not exist.
    fn load_current(&self, oid: i64) -> Result<Option<(Vec<u8>, i64)>, AdapterError>;

    /// The state of `oid` as of exactly `tid`, if that revision exists.
    fn load_revision(&self, oid: i64, tid: i64) -> Result<Option<Vec<u8>>, AdapterError>;

    /// Committed changes with `after_tid < tid <= last_tid`, as
    /// `(oid, tid)` pairs.
    fn list_changes(&self, after_tid: i64, last_tid: i64) -> Result<Vec<(i64, i64)>, AdapterError>;

    /// The newest committed tid.
    fn last_committed_tid(&self) -> Result<i64, AdapterError>;

    /// Stage a state in the transaction's temp area.
    fn store_temp(&self, oid: i64, state: &[u8]) -> Result<(), AdapterError>;

    /// Move every staged state into history under `tid`. Returns the
    /// affected oids.
    fn move_from_temp(&self, tid: i64) -> Result<Vec<i64>, AdapterError>;

    /// Point the current-revision table at `tid` for every object moved
    /// there, publishing the transaction.
    fn update_current(&self, tid: i64) -> Result<(), AdapterError>;
}

#[derive(Default)]
struct MemoryState {
    current: HashMap<i64, (Vec<u8>, i64)>,
    history: HashMap<(i64, i64), Vec<u8>>,
    /// Committed `(oid, tid)` pairs in commit order.
    changes: Vec<(i64, i64)>,
    temp: HashMap<i64, Vec<u8>>,
    /// Moved-but-unpublished oids per tid.
    staged: HashMap<i64, Vec<i64>>,
    last_tid: i64,
}

/// In-memory authoritative store.
#[derive(Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a batch of writes at `tid` in one call: the store-temp /
    /// move-from-temp / update-current sequence the real machinery runs.
    pub fn commit(&self, tid: i64, writes: &[(i64, &[u8])]) -> Result<(), AdapterError> {
        for &(oid, state) in writes {
            self.store_temp(oid, state)?;
        }
        self.move_from_temp(tid)?;
        self.update_current(tid)
    }
}

impl Adapter for MemoryAdapter {
    fn load_current(&self, oid: i64) -> Result<Option<(Vec<u8>, i64)>, AdapterError> {
        Ok(self.state.lock().current.get(&oid).cloned())
    }

    fn load_revision(&self, oid: i64, tid: i64) -> Result<Option<Vec<u8>>, AdapterError> {
        Ok(self.state.lock().history.get(&(oid, tid)).cloned())
    }

    fn list_changes(&self, after_tid: i64, last_tid: i64) -> Result<Vec<(i64, i64)>, AdapterError> {
        Ok(self
            .state
            .lock()
            .changes
            .iter()
            .copied()
            .filter(|&(_, tid)| after_tid < tid && tid <= last_tid)
            .collect())
    }

    fn last_committed_tid(&self) -> Result<i64, AdapterError> {
        Ok(self.state.lock().last_tid)
    }

    fn store_temp(&self, oid: i64, state: &[u8]) -> Result<(), AdapterError> {
        self.state.lock().temp.insert(oid, state.to_vec());
        Ok(())
    }

    fn move_from_temp(&self, tid: i64) -> Result<Vec<i64>, AdapterError> {
        let mut inner = self.state.lock();
        if tid <= inner.last_tid {
            return Err(AdapterError::new(format!(
                "tid {tid} does not advance past committed tid {}",
                inner.last_tid
            )));
        }
        let temp = std::mem::take(&mut inner.temp);
        let mut oids: Vec<i64> = temp.keys().copied().collect();
        oids.sort_unstable();
        for (oid, state) in temp {
            inner.history.insert((oid, tid), state);
        }
        inner.staged.insert(tid, oids.clone());
        Ok(oids)
    }

    fn update_current(&self, tid: i64) -> Result<(), AdapterError> {
        let mut inner = self.state.lock();
        let oids = inner
            .staged
            .remove(&tid)
            .ok_or_else(|| AdapterError::new(format!("nothing staged at tid {tid}")))?;
        for oid in oids {
            let state = inner.history[&(oid, tid)].clone();
            inner.current.insert(oid, (state, tid));
            inner.changes.push((oid, tid));
        }
        inner.last_tid = inner.last_tid.max(tid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_publishes_current_and_history() {
        let adapter = MemoryAdapter::new();
        adapter.commit(5, &[(1, b"one@5"), (2, b"two@5")]).unwrap();
        adapter.commit(9, &[(1, b"one@9")]).unwrap();

        assert_eq!(
            adapter.load_current(1).unwrap(),
            Some((b"one@9".to_vec(), 9))
        );
        assert_eq!(
            adapter.load_revision(1, 5).unwrap(),
            Some(b"one@5".to_vec())
        );
        assert_eq!(adapter.load_revision(1, 6).unwrap(), None);
        assert_eq!(adapter.load_current(3).unwrap(), None);
        assert_eq!(adapter.last_committed_tid().unwrap(), 9);
    }

    #[test]
    fn test_list_changes_window_is_half_open() {
        let adapter = MemoryAdapter::new();
        adapter.commit(5, &[(1, b"a")]).unwrap();
        adapter.commit(9, &[(2, b"b")]).unwrap();
        adapter.commit(12, &[(1, b"c")]).unwrap();

        let changes = adapter.list_changes(5, 12).unwrap();
        assert_eq!(changes, vec![(2, 9), (1, 12)]);
        assert!(adapter.list_changes(12, 12).unwrap().is_empty());
    }

    #[test]
    fn test_move_from_temp_rejects_stale_tid() {
        let adapter = MemoryAdapter::new();
        adapter.commit(5, &[(1, b"a")]).unwrap();
        adapter.store_temp(2, b"b").unwrap();
        assert!(adapter.move_from_temp(5).is_err());
    }

    #[test]
    fn test_update_current_requires_move() {
        let adapter = MemoryAdapter::new();
        assert!(adapter.update_current(3).is_err());
    }
}
