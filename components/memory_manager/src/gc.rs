//! Copying collection for the young generation.
//!
//! A minor collection evacuates live young objects into the To survivor
//! space (or promotes them into the old generation), rewriting root slots
//! and object fields as it goes:
//! 1. Reset To's bump offset and snapshot the remembered set.
//! 2. Evacuate the young target of every registered root slot.
//! 3. Rescan every container remembered before the pass; evacuate its
//!    young fields and drop containers that no longer hold any.
//! 4. Evacuation itself recurses through each moved object's fields;
//!    forwarding pointers make shared and cyclic structure converge.
//! 5. Zero Eden and From, swap the survivor roles, reset Eden's offset.

use std::ptr;
use std::rc::Weak;

use crate::heap::{Heap, Region};
use crate::object::{GcRef, Generation, FLAG_FORWARDED, FLAG_MARKED, FLAG_REMEMBERED};

impl Heap {
    /// Runs one minor collection over the young generation.
    ///
    /// Young handles held outside root sets are stale afterwards; re-read
    /// them from a root slot or a parent field.
    pub fn collect_garbage(&mut self) {
        self.minor_collection();
    }

    /// Runs a minor collection followed by a full old-generation
    /// mark-sweep.
    ///
    /// The mark phase seeds from root slots targeting the old generation
    /// and traverses fields from there, young links included. An old
    /// object whose only path from the roots starts at a young slot is
    /// reclaimed here; callers that depend on such an object across a full
    /// collection must root it directly.
    pub fn full_gc(&mut self) {
        self.minor_collection();
        self.mark_sweep();
    }

    fn minor_collection(&mut self) {
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "memory_manager::gc",
            eden_used = self.young.eden_used,
            from_used = self.young.from_used,
            remembered = self.remembered.len(),
            "minor collection start"
        );

        self.young.to_used = 0;
        self.promoted_this_pass.clear();
        self.swept_this_pass.clear();

        // Entries recorded after this point belong to objects promoted by
        // this pass; promote() has already evacuated their children and
        // rewritten their fields, so rescanning them would copy a To-space
        // resident a second time.
        let snapshot: Vec<GcRef> = self.remembered.entries().to_vec();

        self.evacuate_roots();
        self.rescan_remembered(snapshot);

        let eden = self.young.eden;
        let from = self.young.from_space();
        self.zero_region(eden);
        self.zero_region(from);
        self.young.eden_used = 0;
        self.young.from_is_a = !self.young.from_is_a;
        self.young.from_used = self.young.to_used;
        self.young.to_used = 0;

        self.promoted_this_pass.clear();
        self.young_gc_count += 1;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "memory_manager::gc",
            survivors = self.young.from_used,
            promoted = self.objects_promoted,
            "minor collection done"
        );
    }

    /// Evacuates the young target of every slot in every live root set,
    /// rewriting the slot to the moved handle.
    fn evacuate_roots(&mut self) {
        self.roots.retain(|weak| weak.strong_count() > 0);
        let sets: Vec<_> = self.roots.iter().filter_map(Weak::upgrade).collect();

        for set in &sets {
            let len = set.borrow().len();
            for index in 0..len {
                // The borrow must not outlive this read: evacuation can
                // trigger a mark-sweep, which walks the root sets itself.
                let target = {
                    let slots = set.borrow();
                    match slots.get(index) {
                        Some(&Some(target)) if target.is_young() => target,
                        _ => continue,
                    }
                };
                let moved = self.evacuate(target);
                set.borrow_mut()[index] = Some(moved);
            }
        }
    }

    /// Rescans the fields of every container in `snapshot`, evacuating
    /// young targets; containers with no remaining young field are dropped
    /// from the set.
    fn rescan_remembered(&mut self, snapshot: Vec<GcRef>) {
        for container in snapshot {
            if self.container_reclaimed(container) {
                // Reclaimed by a promotion-triggered sweep earlier in this
                // pass.
                continue;
            }
            let keeps_young = self.rescan_container(container);
            if !keeps_young && !self.container_reclaimed(container) {
                let mut header = self.header(container);
                header.clear_flag(FLAG_REMEMBERED);
                self.set_header(container, header);
                self.remembered.remove(container);
            }
        }
    }

    /// True once a sweep nested in the current pass reclaimed `container`,
    /// or its entry is otherwise gone. The entry set alone cannot answer
    /// this: a reclaimed cell can already hold a freshly promoted object
    /// whose handle compares equal to the dead container's.
    fn container_reclaimed(&self, container: GcRef) -> bool {
        self.swept_this_pass.contains(&container) || !self.remembered.contains(container)
    }

    fn rescan_container(&mut self, container: GcRef) -> bool {
        let fields = match self.managed(container).fields() {
            Some(fields) => fields,
            None => return false,
        };

        let mut keeps_young = false;
        for (index, slot) in fields.into_iter().enumerate() {
            let target = match slot {
                Some(target) if target.is_young() => target,
                _ => continue,
            };
            let moved = self.evacuate(target);
            if self.container_reclaimed(container) {
                // A nested sweep reclaimed the container while its child
                // was being copied; the cell may already hold a new
                // tenant.
                return false;
            }
            self.managed_mut(container).set_field(index, Some(moved));
            if moved.is_young() {
                keeps_young = true;
            }
        }
        keeps_young
    }

    /// Moves one live young object out of Eden/From, returning its new
    /// handle. Already-forwarded objects return their forwarding target so
    /// the caller still rewrites its slot.
    pub(crate) fn evacuate(&mut self, source: GcRef) -> GcRef {
        debug_assert!(source.is_young(), "evacuate expects a young handle");

        let header = self.header(source);
        if header.flag(FLAG_FORWARDED) {
            return header.forward;
        }

        let footprint = header.size as usize;
        let to = self.young.to_space();
        if header.age >= self.config.max_age || self.young.to_used + footprint > to.size {
            return self.promote(source);
        }

        let offset = to.start + self.young.to_used;
        self.young.to_used += footprint;
        let moved = GcRef::new(Generation::Young, offset as u32);
        self.move_object(source, moved);
        self.forward(source, moved);
        self.scan_children(moved);
        moved
    }

    /// Moves `source` into a fresh old-generation cell.
    fn promote(&mut self, source: GcRef) -> GcRef {
        let footprint = self.header(source).size as usize;
        if footprint > self.config.cell_size {
            panic!(
                "cannot promote a {}-byte object into a {}-byte old-generation cell",
                footprint, self.config.cell_size
            );
        }

        let offset = self.claim_cell_or_collect();
        let moved = GcRef::new(Generation::Old, offset as u32);
        self.move_object(source, moved);
        self.forward(source, moved);
        self.promoted_this_pass.push(moved);
        self.objects_promoted += 1;

        #[cfg(feature = "gc_logging")]
        tracing::trace!(target: "memory_manager::gc", from = ?source, to = ?moved, "promoted");

        self.scan_children(moved);

        // Conservative remembered decision: scan every field after the
        // subtree settled, no early break.
        let keeps_young = match self.managed(moved).fields() {
            Some(fields) => fields.iter().flatten().any(|target| target.is_young()),
            None => false,
        };
        if keeps_young {
            let mut header = self.header(moved);
            if !header.flag(FLAG_REMEMBERED) {
                header.set_flag(FLAG_REMEMBERED);
                self.set_header(moved, header);
                self.remembered.add(moved);
            }
        }
        moved
    }

    /// Duplicates header and payload of `source` at `dest`.
    fn move_object(&mut self, source: GcRef, dest: GcRef) {
        let header = self.header(source);
        // SAFETY: dest was carved out of free space sized for the whole
        // footprint, and source and dest never overlap.
        unsafe {
            ptr::write(self.header_ptr(dest), header);
            let payload = self.payload_ptr(dest);
            self.managed(source).relocate_to(payload);
        }
    }

    /// Ages the duplicate, clears its transient flags, and marks `source`
    /// forwarded so later edges into it converge on `dest`.
    fn forward(&mut self, source: GcRef, dest: GcRef) {
        let mut dup = self.header(dest);
        dup.age = dup.age.saturating_add(1);
        dup.clear_flag(FLAG_FORWARDED);
        dup.clear_flag(FLAG_REMEMBERED);
        dup.clear_flag(FLAG_MARKED);
        self.set_header(dest, dup);

        let mut src = self.header(source);
        src.set_flag(FLAG_FORWARDED);
        src.forward = dest;
        self.set_header(source, src);

        self.remembered.rewrite(source, dest);
    }

    /// Evacuates every young field of `parent`, rewriting the field to the
    /// moved handle.
    fn scan_children(&mut self, parent: GcRef) {
        let fields = match self.managed(parent).fields() {
            Some(fields) => fields,
            None => return,
        };
        for (index, slot) in fields.into_iter().enumerate() {
            let target = match slot {
                Some(target) if target.is_young() => target,
                _ => continue,
            };
            let moved = self.evacuate(target);
            self.managed_mut(parent).set_field(index, Some(moved));
        }
    }

    fn zero_region(&mut self, region: Region) {
        // SAFETY: the region lies inside the buffer.
        unsafe {
            ptr::write_bytes(self.base().add(region.start), 0, region.size);
        }
    }
}
