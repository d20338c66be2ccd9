//! Fixed-capacity segment arena.
//!
//! Every variable-length buffer in the kernel is a chain of uniform
//! segments taken from one [`SegmentPool`]. Segments are addressed by a
//! typed [`SegmentId`] (index + generation), never by pointer. The pool is
//! sized once at startup and never grows.
//!
//! The pool is shared between execution contexts. Each operation takes the
//! arena lock for its own duration only; nothing holds it across a signal
//! handler.

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{fatal, InvariantViolation, PoolError};
use crate::wire::RNIL;

/// Words of payload per segment.
pub const DATA_LENGTH: usize = 60;

/// Typed segment handle. The generation changes every time the slot is
/// released, so a handle that outlives its segment is detected on use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId {
    index: u32,
    generation: u32,
}

impl SegmentId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Raw i-value of an optional handle; `None` maps to `RNIL`.
    pub fn to_ival(id: Option<SegmentId>) -> u32 {
        id.map_or(RNIL, |id| id.index)
    }
}

/// One arena slot's payload.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub(crate) data: [u32; DATA_LENGTH],
    /// Owner tag, set by whoever imported the chain.
    pub(crate) owner: u32,
    /// Total section size in words. Head segments only; 0 elsewhere.
    pub(crate) size: u32,
    /// Tail of the chain. Head segments only; `None` elsewhere.
    pub(crate) last: Option<SegmentId>,
    pub(crate) next: Option<SegmentId>,
}

impl Segment {
    fn empty() -> Self {
        Self {
            data: [0; DATA_LENGTH],
            owner: 0,
            size: 0,
            last: None,
            next: None,
        }
    }

    /// Reset the header to the form every non-head segment carries.
    pub(crate) fn normalize_header(&mut self) {
        self.size = 0;
        self.last = None;
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    segment: Segment,
}

/// The arena proper. Only reachable through the pool lock.
#[derive(Debug)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    high_water: usize,
    seize_failures: u64,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                live: false,
                segment: Segment::empty(),
            })
            .collect();
        // Pop order hands out low indices first
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free,
            high_water: 0,
            seize_failures: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn seize(&mut self) -> Result<SegmentId, PoolError> {
        let Some(index) = self.free.pop() else {
            self.seize_failures += 1;
            tracing::warn!(
                capacity = self.capacity(),
                failures = self.seize_failures,
                "segment pool exhausted"
            );
            return Err(PoolError::Exhausted {
                capacity: self.capacity(),
            });
        };

        let slot = &mut self.slots[index as usize];
        slot.live = true;
        slot.segment.owner = 0;
        slot.segment.normalize_header();
        slot.segment.next = None;
        let generation = slot.generation;

        let in_use = self.in_use();
        if in_use > self.high_water {
            self.high_water = in_use;
        }

        Ok(SegmentId { index, generation })
    }

    pub(crate) fn release(&mut self, id: SegmentId) {
        self.check(id);
        let slot = &mut self.slots[id.index as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    /// Release `count` segments chained from `head`; the last one must be `tail`.
    pub(crate) fn release_list(&mut self, count: usize, head: SegmentId, tail: SegmentId) {
        let mut current = Some(head);
        let mut released = None;
        for _ in 0..count {
            let Some(id) = current else { break };
            current = self.get(id).next;
            self.release(id);
            released = Some(id);
        }
        if released != Some(tail) {
            fatal(InvariantViolation::ReleaseListMismatch {
                count,
                head: head.index,
                tail: tail.index,
            });
        }
    }

    fn check(&self, id: SegmentId) {
        let Some(slot) = self.slots.get(id.index as usize) else {
            fatal(InvariantViolation::HandleOutOfRange { index: id.index });
        };
        if !slot.live || slot.generation != id.generation {
            fatal(InvariantViolation::StaleHandle {
                index: id.index,
                generation: id.generation,
            });
        }
    }

    /// Like `get`, but reports a dead handle instead of aborting.
    pub(crate) fn try_get(&self, id: SegmentId) -> Option<&Segment> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.live && s.generation == id.generation)
            .map(|s| &s.segment)
    }

    pub(crate) fn get(&self, id: SegmentId) -> &Segment {
        self.check(id);
        &self.slots[id.index as usize].segment
    }

    pub(crate) fn get_mut(&mut self, id: SegmentId) -> &mut Segment {
        self.check(id);
        &mut self.slots[id.index as usize].segment
    }

    /// Walk `n` links forward from `id`.
    pub(crate) fn advance(&self, mut id: SegmentId, n: usize) -> Option<SegmentId> {
        for _ in 0..n {
            id = self.get(id).next?;
        }
        Some(id)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            in_use: self.in_use(),
            free: self.free.len(),
            high_water: self.high_water,
            seize_failures: self.seize_failures,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub free: usize,
    pub high_water: usize,
    pub seize_failures: u64,
}

/// Shared, fixed-capacity segment pool.
#[derive(Debug)]
pub struct SegmentPool {
    pub(crate) arena: RwLock<Arena>,
}

impl SegmentPool {
    /// Create a pool of `capacity` segments. Capacity must stay below `RNIL`.
    pub fn new(capacity: usize) -> Self {
        if capacity >= RNIL as usize {
            fatal(InvariantViolation::CapacityTooLarge(capacity));
        }
        tracing::debug!(capacity, words = capacity * DATA_LENGTH, "segment pool created");
        Self {
            arena: RwLock::new(Arena::new(capacity)),
        }
    }

    /// Take one segment. Exhaustion is logged and returned, never retried.
    pub fn seize(&self) -> Result<SegmentId, PoolError> {
        self.arena.write().seize()
    }

    pub fn release(&self, id: SegmentId) {
        self.arena.write().release(id);
    }

    /// Return `count` chained segments from `head` to `tail` in one pass.
    pub fn release_list(&self, count: usize, head: SegmentId, tail: SegmentId) {
        self.arena.write().release_list(count, head, tail);
    }

    /// Live handle currently occupying raw index `ival`, if any.
    pub fn id_from_ival(&self, ival: u32) -> Option<SegmentId> {
        if ival == RNIL {
            return None;
        }
        let arena = self.arena.read();
        arena.slots.get(ival as usize).filter(|s| s.live).map(|s| SegmentId {
            index: ival,
            generation: s.generation,
        })
    }

    /// Whether `id` names a live segment.
    pub fn is_live(&self, id: SegmentId) -> bool {
        self.arena.read().try_get(id).is_some()
    }

    /// Next segment in the chain, `None` at the tail.
    pub fn next_of(&self, id: SegmentId) -> Option<SegmentId> {
        self.arena.read().get(id).next
    }

    pub fn capacity(&self) -> usize {
        self.arena.read().capacity()
    }

    pub fn free_count(&self) -> usize {
        self.arena.read().free.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.arena.read().stats()
    }
}
