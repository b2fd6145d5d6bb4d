//! Mark-and-sweep collection for the fixed-cell old generation.
//!
//! The old generation is a run of equal-sized cells, one object per cell,
//! with an intrusive free list threaded through the free cells. Objects
//! here never move; a full pass marks everything reachable from
//! old-targeting root slots and sweeps the rest back onto the free list.

use std::collections::HashSet;
use std::ptr;
use std::rc::Weak;

use crate::heap::{Heap, Region};
use crate::object::{GcRef, Generation, FLAG_MARKED};

/// Free-list terminator; no cell ever starts at this offset.
pub(crate) const NO_CELL: u32 = u32::MAX;

/// The old generation's cell table.
#[derive(Debug)]
pub(crate) struct OldGen {
    pub region: Region,
    pub cell_size: usize,
    pub cell_count: usize,
    /// Offset of the first free cell, or [`NO_CELL`].
    pub free_head: u32,
    /// One flag per cell, true while the cell holds an object.
    pub occupied: Vec<bool>,
    pub live_cells: usize,
}

impl OldGen {
    pub fn new(region: Region, cell_size: usize, cell_count: usize) -> Self {
        Self {
            region,
            cell_size,
            cell_count,
            free_head: NO_CELL,
            occupied: vec![false; cell_count],
            live_cells: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cell_count * self.cell_size
    }

    pub fn used_bytes(&self) -> usize {
        self.live_cells * self.cell_size
    }

    fn cell_index(&self, offset: usize) -> usize {
        debug_assert!(self.region.contains(offset), "offset outside old region");
        (offset - self.region.start) / self.cell_size
    }

    fn cell_offset(&self, index: usize) -> usize {
        self.region.start + index * self.cell_size
    }

    pub fn is_occupied_offset(&self, offset: usize) -> bool {
        self.region.contains(offset) && self.occupied[self.cell_index(offset)]
    }
}

impl Heap {
    /// Links every free cell into the intrusive free list, lowest offset
    /// first.
    pub(crate) fn thread_free_list(&mut self) {
        let mut head = NO_CELL;
        for index in (0..self.old.cell_count).rev() {
            let offset = self.old.cell_offset(index);
            self.write_free_link(offset, head);
            head = offset as u32;
        }
        self.old.free_head = head;
    }

    fn write_free_link(&mut self, offset: usize, next: u32) {
        // SAFETY: offset is a cell start inside the buffer; a free cell's
        // first word holds the link.
        unsafe {
            ptr::write(self.base().add(offset) as *mut u32, next);
        }
    }

    pub(crate) fn read_free_link(&self, offset: usize) -> u32 {
        // SAFETY: as in write_free_link.
        unsafe { ptr::read(self.base().add(offset) as *const u32) }
    }

    /// Takes the head cell off the free list, or `None` when every cell is
    /// occupied.
    pub(crate) fn claim_cell(&mut self) -> Option<usize> {
        if self.old.free_head == NO_CELL {
            return None;
        }
        let offset = self.old.free_head as usize;
        self.old.free_head = self.read_free_link(offset);

        let index = self.old.cell_index(offset);
        debug_assert!(!self.old.occupied[index], "free list hit a live cell");
        self.old.occupied[index] = true;
        self.old.live_cells += 1;
        Some(offset)
    }

    /// Claims a free cell, running one mark-sweep pass when none is left.
    ///
    /// # Panics
    ///
    /// Panics when every cell is still live after the pass.
    pub(crate) fn claim_cell_or_collect(&mut self) -> usize {
        if let Some(offset) = self.claim_cell() {
            return offset;
        }
        self.mark_sweep();
        match self.claim_cell() {
            Some(offset) => offset,
            None => panic!(
                "old generation exhausted: all {} cells of {} bytes are live after mark-sweep",
                self.old.cell_count, self.config.cell_size
            ),
        }
    }

    /// Runs one full mark-sweep pass over the old generation.
    pub(crate) fn mark_sweep(&mut self) {
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "memory_manager::gc",
            live_cells = self.old.live_cells,
            "mark-sweep start"
        );

        self.mark_old();
        let reclaimed = self.sweep_old();
        self.old_gc_count += 1;
        self.cells_reclaimed += reclaimed;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "memory_manager::gc",
            reclaimed,
            live_cells = self.old.live_cells,
            "mark-sweep done"
        );
    }

    /// Marks every old-generation object reachable from old-targeting root
    /// slots.
    ///
    /// Seeding ignores young-targeting slots, but traversal follows field
    /// enumeration through young objects, so an old object held by a young
    /// field of an old-rooted graph survives. An old object whose only
    /// path from the roots starts at a young slot does not; callers must
    /// root such objects directly.
    fn mark_old(&mut self) {
        let mut stack: Vec<GcRef> = Vec::new();

        self.roots.retain(|weak| weak.strong_count() > 0);
        let sets: Vec<_> = self.roots.iter().filter_map(Weak::upgrade).collect();
        for set in &sets {
            for slot in set.borrow().iter() {
                if let Some(target) = slot {
                    if target.is_old() {
                        stack.push(*target);
                    }
                }
            }
        }

        // Cells promoted by an in-progress minor collection are live even
        // though the root slots leading to them are not rewritten yet.
        stack.extend(self.promoted_this_pass.iter().copied());

        // Old cells carry the marked flag; young pass-throughs are tracked
        // on the side so no transient mark outlives this pass.
        let mut visited_young: HashSet<GcRef> = HashSet::new();

        while let Some(current) = stack.pop() {
            if current.is_old() {
                let mut header = self.header(current);
                if header.flag(FLAG_MARKED) {
                    continue;
                }
                header.set_flag(FLAG_MARKED);
                self.set_header(current, header);
            } else if !visited_young.insert(current) {
                continue;
            }

            if let Some(fields) = self.managed(current).fields() {
                for slot in fields {
                    if let Some(target) = slot {
                        if target.generation() != Generation::Permanent {
                            stack.push(target);
                        }
                    }
                }
            }
        }
    }

    /// Walks cells in address order; keeps marked cells (unmarking them for
    /// the next pass) and returns unmarked ones to the free list. Returns
    /// the number of cells reclaimed.
    fn sweep_old(&mut self) -> usize {
        let mut reclaimed = 0;
        for index in 0..self.old.cell_count {
            if !self.old.occupied[index] {
                continue;
            }
            let offset = self.old.cell_offset(index);
            let handle = GcRef::new(Generation::Old, offset as u32);
            let mut header = self.header(handle);
            if header.flag(FLAG_MARKED) {
                header.clear_flag(FLAG_MARKED);
                self.set_header(handle, header);
            } else {
                // A reclaimed container must not be rescanned on the next
                // minor cycle, and a rescan already in flight must learn
                // that this cell changed hands.
                self.remembered.remove(handle);
                self.swept_this_pass.push(handle);
                self.release_cell(index);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Zeroes a cell and pushes it back onto the free list.
    fn release_cell(&mut self, index: usize) {
        let offset = self.old.cell_offset(index);
        // SAFETY: the cell lies inside the buffer.
        unsafe {
            ptr::write_bytes(self.base().add(offset), 0, self.old.cell_size);
        }
        self.write_free_link(offset, self.old.free_head);
        self.old.free_head = offset as u32;
        self.old.occupied[index] = false;
        self.old.live_cells -= 1;
    }
}
