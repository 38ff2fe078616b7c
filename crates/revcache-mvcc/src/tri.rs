//! Transaction-range object indexes.
//!
//! A `TransactionRangeObjectIndex` records, for one polling interval, which
//! objects changed and at which transaction. It is valid over the half-open
//! window `(complete_since_tid, highest_visible_tid]`: every committed
//! change inside that window appears in `data`, so a missing oid means
//! "unchanged in this window", not "unknown".
//!
//! Indexes are immutable after construction. Longer windows are built by
//! composing adjacent indexes with [`extend_with`], which requires exact
//! abutment; any gap would silently lose changes, so it is an error.
//!
//! [`extend_with`]: TransactionRangeObjectIndex::extend_with

use std::collections::HashMap;

use crate::error::MvccError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRangeObjectIndex {
    complete_since_tid: i64,
    highest_visible_tid: i64,
    data: HashMap<i64, i64>,
}

impl TransactionRangeObjectIndex {
    /// Build an index for `(complete_since_tid, highest_visible_tid]` from a
    /// change list. Fails when the window is reversed or empty, or when any
    /// datum falls outside the window. A repeated oid keeps its highest tid.
    pub fn new(
        complete_since_tid: i64,
        highest_visible_tid: i64,
        changes: impl IntoIterator<Item = (i64, i64)>,
    ) -> Result<Self, MvccError> {
        if complete_since_tid >= highest_visible_tid {
            return Err(MvccError::InvalidTidRange {
                complete_since: complete_since_tid,
                highest_visible: highest_visible_tid,
            });
        }
        let mut data = HashMap::new();
        for (oid, tid) in changes {
            if tid <= complete_since_tid || tid > highest_visible_tid {
                return Err(MvccError::InvalidDatum {
                    oid,
                    tid,
                    complete_since: complete_since_tid,
                    highest_visible: highest_visible_tid,
                });
            }
            let slot = data.entry(oid).or_insert(tid);
            *slot = (*slot).max(tid);
        }
        Ok(Self {
            complete_since_tid,
            highest_visible_tid,
            data,
        })
    }

    #[inline]
    pub fn complete_since_tid(&self) -> i64 {
        self.complete_since_tid
    }

    #[inline]
    pub fn highest_visible_tid(&self) -> i64 {
        self.highest_visible_tid
    }

    /// Number of changed objects in the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The tid at which `oid` last changed inside this window, if it did.
    #[inline]
    pub fn lookup(&self, oid: i64) -> Option<i64> {
        self.data.get(&oid).copied()
    }

    /// Iterate the `(oid, tid)` pairs of this window.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.data.iter().map(|(&oid, &tid)| (oid, tid))
    }

    /// Compose with an index that begins exactly where this one ends,
    /// yielding an index over the union window. Where both windows touched
    /// an oid, the newer tid wins.
    pub fn extend_with(&self, other: &Self) -> Result<Self, MvccError> {
        if other.complete_since_tid != self.highest_visible_tid {
            return Err(MvccError::NonContiguous {
                expected: self.highest_visible_tid,
                got: other.complete_since_tid,
            });
        }
        let mut data = self.data.clone();
        for (&oid, &tid) in &other.data {
            data.insert(oid, tid);
        }
        Ok(Self {
            complete_since_tid: self.complete_since_tid,
            highest_visible_tid: other.highest_visible_tid,
            data,
        })
    }

    /// Whether the transaction window `(lo, hi]` is fully described by this
    /// index.
    #[inline]
    pub fn contains_range(&self, lo: i64, hi: i64) -> bool {
        self.complete_since_tid <= lo && hi <= self.highest_visible_tid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_reversed_window() {
        let err = TransactionRangeObjectIndex::new(2, 1, []).unwrap_err();
        assert!(matches!(err, MvccError::InvalidTidRange { .. }));
        // Empty windows are invalid too.
        assert!(TransactionRangeObjectIndex::new(2, 2, []).is_err());
    }

    #[test]
    fn test_rejects_datum_outside_window() {
        // Too high.
        assert!(matches!(
            TransactionRangeObjectIndex::new(0, 2, [(1, 3)]),
            Err(MvccError::InvalidDatum { tid: 3, .. })
        ));
        // Too low: the window is open at complete_since.
        assert!(matches!(
            TransactionRangeObjectIndex::new(0, 2, [(1, 0)]),
            Err(MvccError::InvalidDatum { tid: 0, .. })
        ));
        // Just right.
        let index = TransactionRangeObjectIndex::new(0, 2, [(1, 1)]).unwrap();
        assert_eq!(index.highest_visible_tid(), 2);
        assert_eq!(index.complete_since_tid(), 0);
        assert_eq!(index.lookup(1), Some(1));
    }

    #[test]
    fn test_duplicate_oid_keeps_highest_tid() {
        let index = TransactionRangeObjectIndex::new(0, 10, [(1, 3), (1, 7), (1, 5)]).unwrap();
        assert_eq!(index.lookup(1), Some(7));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_extend_with_contiguous() {
        let a = TransactionRangeObjectIndex::new(0, 10, [(1, 5), (2, 7)]).unwrap();
        let b = TransactionRangeObjectIndex::new(10, 20, [(1, 15)]).unwrap();

        let merged = a.extend_with(&b).unwrap();
        assert_eq!(merged.complete_since_tid(), 0);
        assert_eq!(merged.highest_visible_tid(), 20);
        assert_eq!(merged.lookup(1), Some(15), "newer window wins");
        assert_eq!(merged.lookup(2), Some(7));
        assert!(merged.contains_range(0, 20));
    }

    #[test]
    fn test_extend_with_gap_fails() {
        let a = TransactionRangeObjectIndex::new(0, 10, []).unwrap();
        let c = TransactionRangeObjectIndex::new(12, 20, []).unwrap();
        assert!(matches!(
            a.extend_with(&c),
            Err(MvccError::NonContiguous { expected: 10, got: 12 })
        ));
        // Extension is directional: the argument must be the newer index.
        let b = TransactionRangeObjectIndex::new(10, 12, []).unwrap();
        assert!(b.extend_with(&a).is_err());
    }

    #[test]
    fn test_contains_range() {
        let index = TransactionRangeObjectIndex::new(5, 20, []).unwrap();
        assert!(index.contains_range(5, 20));
        assert!(index.contains_range(7, 15));
        assert!(!index.contains_range(4, 15));
        assert!(!index.contains_range(7, 21));
    }
}
