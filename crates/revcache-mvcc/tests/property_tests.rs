//! Property-based tests for transaction-range index invariants.
//!
//! Coverage:
//! - the constructor accepts `(cs, hvt, data)` exactly when `cs < hvt` and
//!   every datum tid satisfies `cs < tid <= hvt`
//! - any chain accepted by `extend_with` composes into a contiguous,
//!   monotone index whose lookups prefer the newest window

use proptest::prelude::*;
use revcache_mvcc::TransactionRangeObjectIndex;

proptest! {
    /// Constructor acceptance matches the window invariants exactly.
    #[test]
    fn prop_constructor_acceptance_domain(
        cs in -5i64..10,
        hvt in -5i64..10,
        data in prop::collection::vec((0i64..8, -5i64..12), 0..8),
    ) {
        let result = TransactionRangeObjectIndex::new(cs, hvt, data.iter().copied());
        let window_ok = cs < hvt;
        let data_ok = data.iter().all(|&(_, tid)| cs < tid && tid <= hvt);
        prop_assert_eq!(result.is_ok(), window_ok && data_ok);

        if let Ok(index) = result {
            prop_assert_eq!(index.complete_since_tid(), cs);
            prop_assert_eq!(index.highest_visible_tid(), hvt);
            for &(oid, tid) in &data {
                let found = index.lookup(oid).expect("datum oid present");
                // A repeated oid resolves to its highest tid.
                prop_assert!(found >= tid);
            }
        }
    }

    /// Chains of adjacent windows compose: the merged index is contiguous,
    /// monotone, and resolves every oid to its newest change.
    #[test]
    fn prop_extended_chain_is_contiguous_and_newest_wins(
        // Segment lengths define adjacent windows starting at tid 0.
        segments in prop::collection::vec(1i64..6, 1..8),
        oids in prop::collection::vec(0i64..4, 1..8),
    ) {
        let mut lo = 0i64;
        let mut chain = Vec::new();
        for (i, &len) in segments.iter().enumerate() {
            let hi = lo + len;
            // One change per window, cycling the oid space; tid = window end.
            let oid = oids[i % oids.len()];
            chain.push(TransactionRangeObjectIndex::new(lo, hi, [(oid, hi)]).unwrap());
            lo = hi;
        }

        let mut merged = chain[0].clone();
        for tri in &chain[1..] {
            merged = merged.extend_with(tri).unwrap();
        }

        prop_assert_eq!(merged.complete_since_tid(), 0);
        prop_assert_eq!(merged.highest_visible_tid(), lo);
        prop_assert!(merged.contains_range(0, lo));

        // Every oid that ever changed resolves to the end of the *last*
        // window that touched it.
        for i in 0..segments.len() {
            let oid = oids[i % oids.len()];
            let newest = segments
                .iter()
                .enumerate()
                .filter(|&(j, _)| oids[j % oids.len()] == oid)
                .map(|(j, _)| segments[..=j].iter().sum::<i64>())
                .max()
                .unwrap();
            prop_assert_eq!(merged.lookup(oid), Some(newest));
        }

        // Extending with a non-adjacent window fails.
        let gapped = TransactionRangeObjectIndex::new(lo + 1, lo + 2, []).unwrap();
        prop_assert!(merged.extend_with(&gapped).is_err());
    }
}
