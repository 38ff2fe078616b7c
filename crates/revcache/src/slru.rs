//! The three-generation segmented LRU.
//!
//! New entries are admitted to **eden**, a deliberately small ring that
//! absorbs churn. When eden overflows, its oldest entries spill into
//! **probation**. A probation entry that is hit again is promoted into
//! **protected**, which holds the bulk of the budget; protected overflow
//! demotes its LRU back to the *front* of probation so demoted entries are
//! not immediately evicted. When probation has no room for a spilling
//! candidate, a TinyLFU-style admission contest compares the candidate's
//! frequency against the probation LRU's; the incumbent survives ties.
//!
//! The three caps partition one byte budget. While protected is
//! under-filled, probation may borrow its unused bytes (and vice versa), so
//! a cold cache is not artificially constrained to 20% of the budget.
//!
//! Eviction is the only place entries leave the cache without an explicit
//! delete; every eviction is reported through a callback so the owning
//! mapping can keep its key index and statistics consistent.

use crate::config::GenerationWeights;
use crate::entry::{entry_weight, Arena, CacheKey, CacheValue, Entry, Generation};
use crate::invariants::debug_assert_budget_partition;
use crate::ring::{move_from_foreign, Ring};

const PROTECTED: usize = Generation::Protected as usize;
const PROBATION: usize = Generation::Probation as usize;
const EDEN: usize = Generation::Eden as usize;

pub(crate) struct SegmentedLru {
    arena: Arena,
    rings: [Ring; 3],
    byte_budget: usize,
}

impl SegmentedLru {
    pub fn new(byte_budget: usize, weights: &GenerationWeights) -> Self {
        let [protected, probation, eden] = weights.ring_budgets(byte_budget);
        let rings = [
            Ring::new(Generation::Protected, protected),
            Ring::new(Generation::Probation, probation),
            Ring::new(Generation::Eden, eden),
        ];
        debug_assert_budget_partition!(rings, byte_budget);
        Self {
            arena: Arena::new(),
            rings,
            byte_budget,
        }
    }

    #[inline]
    pub fn byte_budget(&self) -> usize {
        self.byte_budget
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn total_size(&self) -> usize {
        self.rings.iter().map(|r| r.size).sum()
    }

    #[inline]
    pub fn ring(&self, generation: Generation) -> &Ring {
        &self.rings[generation as usize]
    }

    #[inline]
    pub fn entry(&self, idx: u32) -> &Entry {
        self.arena.get(idx)
    }

    /// Admit a new entry: run any pending catch-up eviction, insert at the
    /// front of eden with frequency 1, then rebalance. The entry being
    /// admitted is never a victim of its own insertion.
    pub fn add<F: FnMut(CacheKey)>(&mut self, key: CacheKey, value: CacheValue, evict: &mut F) -> u32 {
        self.catch_up(evict);
        let idx = self.arena.insert(Entry::new(key, value));
        let over = self.rings[EDEN].push_front(&mut self.arena, idx);
        if over {
            self.spill_eden(evict);
            self.shrink_probation(evict);
        }
        idx
    }

    /// Record a hit: saturating frequency bump, then reposition according to
    /// the owning ring. Runs catch-up eviction afterwards, which can evict
    /// other entries but never the one just hit.
    pub fn on_hit<F: FnMut(CacheKey)>(&mut self, idx: u32, evict: &mut F) {
        let generation = {
            let entry = self.arena.get_mut(idx);
            entry.frequency = entry.frequency.saturating_add(1);
            entry.generation
        };
        match generation {
            Generation::Eden => self.rings[EDEN].move_to_front(&mut self.arena, idx),
            Generation::Protected => self.rings[PROTECTED].move_to_front(&mut self.arena, idx),
            Generation::Probation => self.promote(idx),
        }
        self.catch_up(evict);
    }

    /// Replace an entry's value, keeping the owning ring's size sum in step
    /// and making the entry MRU. Overflow is recorded on the ring; the next
    /// admission or hit runs the catch-up eviction.
    pub fn update(&mut self, idx: u32, value: CacheValue) {
        let generation = {
            let entry = self.arena.get_mut(idx);
            let old = entry.weight;
            entry.value = value;
            entry.weight = entry_weight(&entry.value);
            let new = entry.weight;
            let generation = entry.generation;
            self.rings[generation as usize].update_weight(old, new);
            generation
        };
        self.rings[generation as usize].move_to_front(&mut self.arena, idx);
    }

    /// Unlink and free `idx`, returning the entry.
    pub fn delete(&mut self, idx: u32) -> Entry {
        let generation = self.arena.get(idx).generation;
        self.rings[generation as usize].remove(&mut self.arena, idx);
        self.arena.remove(idx)
    }

    /// Re-create an entry in a recorded generation with a recorded
    /// frequency, as the new MRU of that ring. Snapshot restore replays the
    /// saved stream in reverse, so successive calls rebuild each ring's
    /// recency order exactly. Unlike `add`, the entry itself may be evicted
    /// when the recorded generation cannot hold it under the current budget;
    /// the callback observes that as an eviction of its own key.
    pub fn restore<F: FnMut(CacheKey)>(
        &mut self,
        key: CacheKey,
        value: CacheValue,
        frequency: u32,
        generation: Generation,
        evict: &mut F,
    ) -> u32 {
        let mut entry = Entry::new(key, value);
        entry.frequency = frequency;
        let idx = self.arena.insert(entry);
        let over = self.rings[generation as usize].push_front(&mut self.arena, idx);
        if over {
            match generation {
                Generation::Eden => {
                    self.spill_eden(evict);
                    self.shrink_probation(evict);
                }
                Generation::Probation => self.shrink_probation(evict),
                Generation::Protected => {
                    self.shrink_protected();
                    self.shrink_probation(evict);
                }
            }
        }
        idx
    }

    /// Drop everything, keeping budget and caps.
    pub fn clear(&mut self) {
        self.arena.clear();
        for ring in &mut self.rings {
            ring.reset();
        }
    }

    /// Iterate a generation MRU→LRU.
    pub fn iter_ring(&self, generation: Generation) -> RingCursor<'_> {
        RingCursor {
            arena: &self.arena,
            next: self.rings[generation as usize].mru(),
            reverse: false,
        }
    }

    /// Iterate a generation LRU→MRU.
    pub fn iter_ring_rev(&self, generation: Generation) -> RingCursor<'_> {
        RingCursor {
            arena: &self.arena,
            next: self.rings[generation as usize].lru(),
            reverse: true,
        }
    }

    /// Run any pending eviction work recorded on the rings by `update`,
    /// promotion demotions, or an uncompleted earlier pass.
    pub fn catch_up<F: FnMut(CacheKey)>(&mut self, evict: &mut F) {
        if self.rings[EDEN].over_size {
            self.spill_eden(evict);
        }
        if self.rings[PROTECTED].over_size {
            self.shrink_protected();
        }
        if self.rings[PROBATION].over_size {
            self.shrink_probation(evict);
        }
    }

    // ---------------------------------------------------------------------
    // POLICY INTERNALS
    // ---------------------------------------------------------------------

    /// Bytes probation may use beyond its own cap while protected is
    /// under-filled.
    fn probation_effective_max(&self) -> usize {
        let slack = self.rings[PROTECTED]
            .max_size
            .saturating_sub(self.rings[PROTECTED].size);
        self.rings[PROBATION].max_size + slack
    }

    /// Bytes protected may use beyond its own cap while probation is
    /// under-filled.
    fn protected_effective_max(&self) -> usize {
        let slack = self.rings[PROBATION]
            .max_size
            .saturating_sub(self.rings[PROBATION].size);
        self.rings[PROTECTED].max_size + slack
    }

    /// Mutable access to two distinct rings plus the arena.
    fn rings_pair(&mut self, a: usize, b: usize) -> (&mut Ring, &mut Ring, &mut Arena) {
        debug_assert!(a != b);
        let arena = &mut self.arena;
        if a < b {
            let (lo, hi) = self.rings.split_at_mut(b);
            (&mut lo[a], &mut hi[0], arena)
        } else {
            let (lo, hi) = self.rings.split_at_mut(a);
            (&mut hi[0], &mut lo[b], arena)
        }
    }

    /// Move eden's LRU entries out while eden is over budget, leaving the
    /// most recent entry in place. Candidates that fit go to the front of
    /// probation; the rest face the admission contest.
    fn spill_eden<F: FnMut(CacheKey)>(&mut self, evict: &mut F) {
        while self.rings[EDEN].size > self.rings[EDEN].max_size && self.rings[EDEN].len > 1 {
            let candidate = match self.rings[EDEN].lru() {
                Some(idx) => idx,
                None => break,
            };
            let weight = self.arena.get(candidate).weight;
            if self.rings[PROBATION].size + weight <= self.probation_effective_max() {
                let (eden, probation, arena) = self.rings_pair(EDEN, PROBATION);
                move_from_foreign(eden, probation, arena, candidate);
            } else {
                self.admission_contest(candidate, evict);
            }
        }
    }

    /// Frequency contest between an eden candidate and the probation LRU.
    /// The candidate wins only with a strictly greater frequency; the
    /// incumbent survives ties, favoring stability.
    fn admission_contest<F: FnMut(CacheKey)>(&mut self, candidate: u32, evict: &mut F) {
        match self.rings[PROBATION].lru() {
            Some(victim)
                if self.arena.get(candidate).frequency > self.arena.get(victim).frequency =>
            {
                self.evict_entry(Generation::Probation, victim, evict);
                let (eden, probation, arena) = self.rings_pair(EDEN, PROBATION);
                move_from_foreign(eden, probation, arena, candidate);
            }
            // Ties favor the incumbent. An empty probation that still has no
            // room means the candidate can never fit at all.
            _ => self.evict_entry(Generation::Eden, candidate, evict),
        }
    }

    /// Evict probation's LRU until probation fits inside its effective cap
    /// (nominal plus whatever protected leaves unused).
    fn shrink_probation<F: FnMut(CacheKey)>(&mut self, evict: &mut F) {
        while self.rings[PROBATION].size > self.probation_effective_max() {
            let victim = match self.rings[PROBATION].lru() {
                Some(idx) => idx,
                None => break,
            };
            self.evict_entry(Generation::Probation, victim, evict);
        }
        // Within borrowed slack is a settled state, not pending work.
        self.rings[PROBATION].over_size = false;
    }

    /// Demote protected's LRU to the front of probation until protected fits
    /// inside its effective cap. The most recent protected entry stays.
    fn shrink_protected(&mut self) {
        while self.rings[PROTECTED].size > self.protected_effective_max()
            && self.rings[PROTECTED].len > 1
        {
            let victim = match self.rings[PROTECTED].lru() {
                Some(idx) => idx,
                None => break,
            };
            let (protected, probation, arena) = self.rings_pair(PROTECTED, PROBATION);
            move_from_foreign(protected, probation, arena, victim);
        }
        if self.rings[PROTECTED].size <= self.protected_effective_max() {
            self.rings[PROTECTED].over_size = false;
        }
    }

    /// Move a probation entry that was hit into protected, then demote as
    /// needed. Demoted entries land at the front of probation so they are
    /// not immediately evicted.
    fn promote(&mut self, idx: u32) {
        let (probation, protected, arena) = self.rings_pair(PROBATION, PROTECTED);
        move_from_foreign(probation, protected, arena, idx);
        self.shrink_protected();
    }

    fn evict_entry<F: FnMut(CacheKey)>(&mut self, generation: Generation, idx: u32, evict: &mut F) {
        self.rings[generation as usize].remove(&mut self.arena, idx);
        let entry = self.arena.remove(idx);
        evict(entry.key);
    }
}

/// Walks one ring's intrusive links in either direction.
pub(crate) struct RingCursor<'a> {
    arena: &'a Arena,
    next: Option<u32>,
    reverse: bool,
}

impl<'a> Iterator for RingCursor<'a> {
    type Item = (u32, &'a Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let entry = self.arena.get(idx);
        let link = if self.reverse { entry.prev } else { entry.next };
        self.next = (link != crate::entry::NIL).then_some(link);
        Some((idx, entry))
    }
}
