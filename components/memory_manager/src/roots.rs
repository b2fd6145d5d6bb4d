//! Mutator-visible root sets.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::object::GcRef;

pub(crate) type RootSlots = Vec<Option<GcRef>>;

/// A caller-owned, cheaply cloneable set of root slots.
///
/// The collector reads every slot during a collection and rewrites slots
/// whose target moved; slot order is preserved, only slot contents change.
/// Cloning hands out another handle to the same slots, so a value can be
/// rooted from several places. The heap holds only a weak registration,
/// which means dropping every clone unregisters the set and everything it
/// kept alive becomes collectible.
///
/// A reference must be pushed before the object becomes otherwise
/// unreachable and popped once it is no longer needed; a forgotten slot
/// retains its target indefinitely.
#[derive(Clone, Debug)]
pub struct RootSet {
    slots: Rc<RefCell<RootSlots>>,
}

impl RootSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<RootSlots>> {
        Rc::downgrade(&self.slots)
    }

    /// Appends a slot holding `target` and returns its index.
    pub fn push(&self, target: GcRef) -> usize {
        let mut slots = self.slots.borrow_mut();
        slots.push(Some(target));
        slots.len() - 1
    }

    /// Removes the last slot and returns its content.
    pub fn pop(&self) -> Option<GcRef> {
        self.slots.borrow_mut().pop().flatten()
    }

    /// Reads slot `index`; `None` for empty or out-of-range slots.
    pub fn get(&self, index: usize) -> Option<GcRef> {
        self.slots.borrow().get(index).copied().flatten()
    }

    /// Overwrites slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set(&self, index: usize, target: Option<GcRef>) {
        self.slots.borrow_mut()[index] = target;
    }

    /// Number of slots, including empty ones.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Empties the set.
    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }
}
