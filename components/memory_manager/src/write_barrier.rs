//! Write barrier and remembered set: old-to-young edge tracking.
//!
//! A minor collection only walks the young generation, so any pointer from
//! an old object into young memory must be recorded or the young target
//! would be collected out from under it. Every reference-field store goes
//! through [`Heap::update_pointer`], which invokes the barrier here before
//! the write lands.

use crate::heap::Heap;
use crate::object::{GcRef, FLAG_REMEMBERED};

/// Old-generation containers known to hold at least one young reference.
///
/// Stored as a plain vector: entries stay rare, removal swaps with the
/// back, and the container's remembered flag keeps the vector free of
/// duplicates without a lookup structure.
#[derive(Debug, Default)]
pub struct RememberedSet {
    entries: Vec<GcRef>,
}

impl RememberedSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of tracked containers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no container is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `container` is currently tracked.
    pub fn contains(&self, container: GcRef) -> bool {
        self.entries.contains(&container)
    }

    pub(crate) fn entries(&self) -> &[GcRef] {
        &self.entries
    }

    pub(crate) fn add(&mut self, container: GcRef) {
        debug_assert!(!self.contains(container), "duplicate remembered entry");
        self.entries.push(container);
    }

    /// Removes `container` if present; order is not preserved.
    pub(crate) fn remove(&mut self, container: GcRef) {
        if let Some(index) = self.entries.iter().position(|&entry| entry == container) {
            self.entries.swap_remove(index);
        }
    }

    /// Rebinds any entry equal to `old` to `new`.
    pub(crate) fn rewrite(&mut self, old: GcRef, new: GcRef) {
        for entry in &mut self.entries {
            if *entry == old {
                *entry = new;
            }
        }
    }
}

/// Records an old-to-young edge before a field of `container` is written.
///
/// Only stores of a young target into an old container do anything; every
/// other combination returns immediately. The barrier never writes the
/// field itself.
pub(crate) fn write_barrier(heap: &mut Heap, container: GcRef, target: Option<GcRef>) {
    let stores_young = matches!(target, Some(target) if target.is_young());
    if !stores_young || !container.is_old() {
        return;
    }

    let mut header = heap.header(container);
    if header.flag(FLAG_REMEMBERED) {
        return;
    }
    header.set_flag(FLAG_REMEMBERED);
    heap.set_header(container, header);
    heap.remembered.add(container);

    #[cfg(feature = "gc_logging")]
    tracing::trace!(target: "memory_manager::gc", container = ?container, "remembered");
}
