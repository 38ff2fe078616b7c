//! Intrusive generation rings.
//!
//! A ring is a doubly-linked MRU→LRU list threaded through arena entries by
//! index, with a running byte-size sum and a fixed cap. All operations are
//! O(1) and allocation-free; the arena owns the nodes, the ring owns only
//! the `head`/`tail` indices and the accounting.
//!
//! `over_size` records that the ring exceeded its nominal cap and the
//! eviction routine still has work to do. Insertions report the condition to
//! the caller; the segmented LRU decides whether to spill, demote, or evict.

use crate::entry::{Arena, Generation, NIL};
use crate::invariants::{debug_assert_generation, debug_assert_size_covers};

pub(crate) struct Ring {
    pub generation: Generation,
    pub max_size: usize,
    pub size: usize,
    pub len: usize,
    pub over_size: bool,
    head: u32,
    tail: u32,
}

impl Ring {
    pub fn new(generation: Generation, max_size: usize) -> Self {
        Self {
            generation,
            max_size,
            size: 0,
            len: 0,
            over_size: false,
            head: NIL,
            tail: NIL,
        }
    }

    /// Most recently used entry, or `None` when the ring is empty.
    #[inline]
    pub fn mru(&self) -> Option<u32> {
        (self.head != NIL).then_some(self.head)
    }

    /// Least recently used entry, or `None` when the ring is empty.
    #[inline]
    pub fn lru(&self) -> Option<u32> {
        (self.tail != NIL).then_some(self.tail)
    }

    /// Link `idx` in as the new MRU and claim it for this generation.
    /// Returns whether the ring is now over its nominal byte cap; the caller
    /// decides whether that means spilling, demoting, or evicting.
    pub fn push_front(&mut self, arena: &mut Arena, idx: u32) -> bool {
        let old_head = self.head;
        let weight = {
            let entry = arena.get_mut(idx);
            entry.generation = self.generation;
            entry.prev = NIL;
            entry.next = old_head;
            entry.weight
        };
        if old_head == NIL {
            self.tail = idx;
        } else {
            arena.get_mut(old_head).prev = idx;
        }
        self.head = idx;
        self.len += 1;
        self.size += weight;
        self.over_size = self.size > self.max_size;
        self.over_size
    }

    /// Unlink `idx`. The slot itself stays live in the arena.
    pub fn remove(&mut self, arena: &mut Arena, idx: u32) {
        let (prev, next, weight) = {
            let entry = arena.get(idx);
            debug_assert_generation!(self.generation, entry.generation);
            (entry.prev, entry.next, entry.weight)
        };
        if prev == NIL {
            self.head = next;
        } else {
            arena.get_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            arena.get_mut(next).prev = prev;
        }
        let entry = arena.get_mut(idx);
        entry.prev = NIL;
        entry.next = NIL;

        debug_assert_size_covers!(self.size, weight);
        self.len -= 1;
        self.size -= weight;
        self.over_size = self.size > self.max_size;
    }

    /// Re-link `idx` as MRU. No net size change.
    pub fn move_to_front(&mut self, arena: &mut Arena, idx: u32) {
        if self.head == idx {
            return;
        }
        self.remove(arena, idx);
        self.push_front(arena, idx);
    }

    /// Apply a weight change after a value update. Returns whether the ring
    /// is now over its nominal cap; `over_size` stays set until the eviction
    /// routine catches up.
    pub fn update_weight(&mut self, old: usize, new: usize) -> bool {
        debug_assert_size_covers!(self.size, old);
        self.size = self.size - old + new;
        self.over_size = self.size > self.max_size;
        self.over_size
    }

    /// Forget all entries. The arena is cleared separately by the owner.
    pub fn reset(&mut self) {
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
        self.size = 0;
        self.over_size = false;
    }
}

/// Unlink `idx` from `src` and push it to the front of `dst`, adjusting both
/// size sums. Returns whether `dst` is now over its nominal cap.
pub(crate) fn move_from_foreign(src: &mut Ring, dst: &mut Ring, arena: &mut Arena, idx: u32) -> bool {
    src.remove(arena, idx);
    dst.push_front(arena, idx)
}
