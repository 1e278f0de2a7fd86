//! Derivation Arena
//!
//! Slot storage for live derivations. Ids are reserved before the
//! derivation is built (a derivation knows its own id), then filled.
//! Removal is O(1) and the slot is recycled with a bumped generation.

use std::rc::Rc;

use super::node::{Derivation, DerivationId};

struct Slot {
    generation: u32,
    entry: Option<Rc<dyn Derivation>>,
}

#[derive(Default)]
pub(crate) struct DerivationArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl DerivationArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id. The slot stays empty until [`fill`](Self::fill).
    pub fn reserve(&mut self) -> DerivationId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            DerivationId::from_parts(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
            DerivationId::from_parts(index, 0)
        }
    }

    pub fn fill(&mut self, id: DerivationId, derivation: Rc<dyn Derivation>) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.generation == id.generation() && slot.entry.is_none() {
                slot.entry = Some(derivation);
                self.live += 1;
            }
        }
    }

    pub fn get(&self, id: DerivationId) -> Option<Rc<dyn Derivation>> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.clone()
    }

    pub fn contains(&self, id: DerivationId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation() && slot.entry.is_some())
    }

    pub fn remove(&mut self, id: DerivationId) -> Option<Rc<dyn Derivation>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        self.live -= 1;
        self.free.push(id.index() as u32);
        Some(entry)
    }

    /// Remove every derivation, returning them for teardown.
    pub fn drain(&mut self) -> Vec<(DerivationId, Rc<dyn Derivation>)> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                drained.push((DerivationId::from_parts(index as u32, slot.generation), entry));
                self.free.push(index as u32);
            }
        }
        self.live = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.live
    }
}
