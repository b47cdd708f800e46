//! Slot Table
//!
//! Fixed-capacity mapping from slot index to the node whose values are packed
//! there. Occupancy lives in atomics so the pack pass reads it without taking
//! a lock; assignment is serialized by a mutex that also owns the free set.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use slotmap::{Key, KeyData};

use crate::scene::NodeKey;

const EMPTY: u64 = 0;

#[inline]
fn encode(key: NodeKey) -> u64 {
    key.data().as_ffi()
}

#[inline]
fn decode(raw: u64) -> Option<NodeKey> {
    (raw != EMPTY).then(|| NodeKey::from(KeyData::from_ffi(raw)))
}

pub struct SlotTable {
    slots: Box<[AtomicU64]>,
    /// Highest occupied slot + 1.
    high_water: AtomicUsize,
    /// Empty slots, lowest first.
    free: Mutex<BTreeSet<usize>>,
}

impl SlotTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(EMPTY)).collect(),
            high_water: AtomicUsize::new(0),
            free: Mutex::new((0..capacity).collect()),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Node currently in `slot`. `None` for empty or out-of-range slots.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<NodeKey> {
        self.slots
            .get(slot)
            .and_then(|s| decode(s.load(Ordering::Acquire)))
    }

    /// Puts `node` into an empty `slot`, or empties an occupied one.
    ///
    /// # Panics
    ///
    /// If `slot` is out of range, if `Some` targets an occupied slot, or if
    /// `None` targets an empty one. Replacing an occupant directly is never
    /// allowed; release it first.
    pub fn assign_slot(&self, slot: usize, node: Option<NodeKey>) {
        assert!(
            slot < self.capacity(),
            "slot {slot} out of range (capacity {})",
            self.capacity()
        );
        let mut free = self.free.lock();
        let current = self.slots[slot].load(Ordering::Acquire);

        match node {
            Some(key) => {
                assert!(current == EMPTY, "slot {slot} is already occupied by {:?}", decode(current));
                self.occupy(&mut free, slot, key);
            }
            None => {
                assert!(current != EMPTY, "slot {slot} is already empty");
                self.vacate(&mut free, slot);
            }
        }
    }

    /// Puts `node` into the lowest empty slot. Returns `None` when full.
    pub fn allocate(&self, node: NodeKey) -> Option<usize> {
        let mut free = self.free.lock();
        let Some(slot) = free.first().copied() else {
            log::warn!("Slot table full ({} slots), cannot place {node:?}", self.capacity());
            return None;
        };
        self.occupy(&mut free, slot, node);
        Some(slot)
    }

    /// Empties `slot`, returning its former occupant. `None` when the slot was
    /// already empty or is out of range.
    pub fn release(&self, slot: usize) -> Option<NodeKey> {
        let mut free = self.free.lock();
        let previous = decode(self.slots.get(slot)?.load(Ordering::Acquire))?;
        self.vacate(&mut free, slot);
        Some(previous)
    }

    /// Number of leading slots the pack pass must visit.
    #[inline]
    #[must_use]
    pub fn number_slots_to_pack(&self) -> usize {
        self.high_water.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.capacity() - self.free.lock().len()
    }

    /// First slot holding `node`, by linear scan.
    #[must_use]
    pub fn slot_of(&self, node: NodeKey) -> Option<usize> {
        let raw = encode(node);
        self.slots[..self.number_slots_to_pack()]
            .iter()
            .position(|s| s.load(Ordering::Acquire) == raw)
    }

    /// Occupied `(slot, node)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, NodeKey)> + '_ {
        (0..self.number_slots_to_pack()).filter_map(|slot| self.get(slot).map(|key| (slot, key)))
    }

    fn occupy(&self, free: &mut BTreeSet<usize>, slot: usize, key: NodeKey) {
        free.remove(&slot);
        self.slots[slot].store(encode(key), Ordering::Release);
        self.high_water.fetch_max(slot + 1, Ordering::AcqRel);
    }

    fn vacate(&self, free: &mut BTreeSet<usize>, slot: usize) {
        self.slots[slot].store(EMPTY, Ordering::Release);
        free.insert(slot);

        // Assignment is serialized, so only this thread moves the mark down.
        let mut high = self.high_water.load(Ordering::Acquire);
        if slot + 1 == high {
            while high > 0 && self.slots[high - 1].load(Ordering::Acquire) == EMPTY {
                high -= 1;
            }
            self.high_water.store(high, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("slots_to_pack", &self.number_slots_to_pack())
            .finish_non_exhaustive()
    }
}
