//! Debug assertion macros for cache accounting invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is zero overhead
//! in release builds. Used by the rings and the segmented LRU.

/// Assert that a ring's size sum covers a weight about to be subtracted.
///
/// **Invariant**: a ring's `size` is the sum of the weights of the entries
/// linked on it, so removing an entry can never underflow.
macro_rules! debug_assert_size_covers {
    ($size:expr, $weight:expr) => {
        debug_assert!(
            $size >= $weight,
            "ring size accounting underflow: size {} < weight {}",
            $size,
            $weight
        )
    };
}

/// Assert that an entry is linked on the ring it claims as its generation.
///
/// **Invariant**: every live entry belongs to exactly one ring, and its
/// `generation` field names that ring.
macro_rules! debug_assert_generation {
    ($ring:expr, $entry:expr) => {
        debug_assert!(
            $ring == $entry,
            "entry claims generation {:?} but is linked on the {:?} ring",
            $entry,
            $ring
        )
    };
}

/// Assert that the per-ring byte caps partition the total budget exactly.
///
/// **Invariant**: `eden.max + probation.max + protected.max == budget`, so
/// the budget authority is the ring caps alone.
macro_rules! debug_assert_budget_partition {
    ($rings:expr, $budget:expr) => {
        debug_assert!(
            $rings.iter().map(|r| r.max_size).sum::<usize>() == $budget,
            "ring caps do not partition the byte budget {}",
            $budget
        )
    };
}

pub(crate) use debug_assert_budget_partition;
pub(crate) use debug_assert_generation;
pub(crate) use debug_assert_size_covers;
