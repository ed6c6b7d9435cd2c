//! Fixed-capacity object pools, addressed by `{pool_id, slot_id}` rather
//! than pointers (see Design Notes: "pool + index, not pointer graphs").
//!
//! Used for the reception/transmission slot pools in the DoCAN transport
//! layer and for the lifecycle component registry's transition-executor
//! working set.

use crate::error::PoolExhausted;

/// A small integer identifying a slot inside a specific [`Pool`]. Carries no
/// lifetime and is cheap to pass across callback boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

enum Slot<T> {
    Empty,
    Occupied(T),
}

/// A fixed-capacity slab. Never grows past the capacity given at
/// construction; allocation beyond that returns [`PoolExhausted`] rather
/// than falling back to the heap, satisfying the "no dynamic allocation
/// beyond fixed pools" non-goal.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Empty);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    /// Allocate the first free slot, initializing it with `value`.
    pub fn allocate(&mut self, value: T) -> Result<SlotId, PoolExhausted> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Empty) {
                *slot = Slot::Occupied(value);
                return Ok(SlotId(idx));
            }
        }
        Err(PoolExhausted)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.slots.get(id.0) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.slots.get_mut(id.0) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    /// Release a slot, returning its value if it was occupied.
    pub fn release(&mut self, id: SlotId) -> Option<T> {
        match self.slots.get_mut(id.0) {
            Some(slot @ Slot::Occupied(_)) => match std::mem::replace(slot, Slot::Empty) {
                Slot::Occupied(v) => Some(v),
                Slot::Empty => unreachable!(),
            },
            _ => None,
        }
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| match slot {
            Slot::Occupied(v) => Some((SlotId(idx), v)),
            Slot::Empty => None,
        })
    }

    pub fn iter_occupied_mut(&mut self) -> impl Iterator<Item = (SlotId, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Slot::Occupied(v) => Some((SlotId(idx), v)),
                Slot::Empty => None,
            })
    }
}
