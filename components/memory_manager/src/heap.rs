//! Heap management with generational garbage collection.
//!
//! The heap owns one contiguous buffer split into:
//! - Young generation: Eden plus two survivor semi-spaces, copying-collected
//! - Old generation: fixed-size cells, mark-and-sweep collected
//!
//! Objects are addressed through [`GcRef`] handles; all pointer arithmetic
//! stays inside this module.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::any::TypeId;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::rc::Weak;

use thiserror::Error;

use crate::mark_sweep::OldGen;
use crate::object::{GcHeader, GcRef, Generation, Managed, TypeTable};
use crate::roots::{RootSet, RootSlots};
use crate::write_barrier::{write_barrier, RememberedSet};

/// Alignment of every heap block, in bytes.
pub(crate) const HEAP_ALIGN: usize = 8;

/// Rounds `n` up to the next multiple of [`HEAP_ALIGN`].
pub(crate) fn align_up(n: usize) -> usize {
    (n + HEAP_ALIGN - 1) & !(HEAP_ALIGN - 1)
}

/// Rounds `n` down to a multiple of [`HEAP_ALIGN`].
pub(crate) fn align_down(n: usize) -> usize {
    n & !(HEAP_ALIGN - 1)
}

/// Configuration errors reported by [`Heap::with_config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GcError {
    #[error("generation weights must be positive, got young:old = {young}:{old}")]
    ZeroGenerationWeight { young: usize, old: usize },
    #[error("eden weight must be positive")]
    ZeroEdenWeight,
    #[error("survivor spaces need equal positive weights, got from:to = {from}:{to}")]
    UnequalSurvivors { from: usize, to: usize },
    #[error("combined weights overflow the partition arithmetic")]
    OverflowingWeights,
    #[error("cell size {0} is not a multiple of 8")]
    UnalignedCellSize(usize),
    #[error("cell size {cell} cannot hold a header plus a minimal payload ({min} bytes)")]
    CellTooSmall { cell: usize, min: usize },
    #[error("heap of {size} bytes is too small for the requested partition")]
    HeapTooSmall { size: usize },
    #[error("heap of {size} bytes exceeds the addressable limit of {limit}")]
    HeapTooLarge { size: usize, limit: usize },
}

/// Tuning knobs for the heap partition and the promotion policy.
///
/// Weights are ratios, not byte counts: with the defaults the young and old
/// generations split the heap 2:8, and Eden and the two survivor spaces
/// split the young generation 8:1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Total managed heap size in bytes.
    pub heap_size: usize,
    /// Relative weight of the young generation.
    pub young_weight: usize,
    /// Relative weight of the old generation.
    pub old_weight: usize,
    /// Relative weight of Eden within the young generation.
    pub eden_weight: usize,
    /// Relative weight of the From survivor space.
    pub from_weight: usize,
    /// Relative weight of the To survivor space.
    pub to_weight: usize,
    /// Minor collections an object survives before promotion.
    pub max_age: u8,
    /// Old-generation cell size in bytes.
    pub cell_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            heap_size: 1024 * 1024,
            young_weight: 2,
            old_weight: 8,
            eden_weight: 8,
            from_weight: 1,
            to_weight: 1,
            max_age: 3,
            cell_size: 128,
        }
    }
}

/// A contiguous byte range inside the heap buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    pub start: usize,
    pub size: usize,
}

impl Region {
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.start + self.size
    }
}

/// Bump-allocated young generation: Eden plus two survivor semi-spaces.
///
/// One survivor space is From (holds last collection's survivors), the
/// other is To (empty, the copy target). The roles swap at the end of every
/// minor collection.
#[derive(Debug)]
pub(crate) struct YoungGen {
    pub eden: Region,
    pub survivor_a: Region,
    pub survivor_b: Region,
    /// True while survivor A plays the From role.
    pub from_is_a: bool,
    pub eden_used: usize,
    pub from_used: usize,
    pub to_used: usize,
}

impl YoungGen {
    pub fn from_space(&self) -> Region {
        if self.from_is_a {
            self.survivor_a
        } else {
            self.survivor_b
        }
    }

    pub fn to_space(&self) -> Region {
        if self.from_is_a {
            self.survivor_b
        } else {
            self.survivor_a
        }
    }

    pub fn used(&self) -> usize {
        self.eden_used + self.from_used + self.to_used
    }
}

/// Capacity and usage snapshot for one heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionStats {
    /// Total bytes the region can hold.
    pub capacity: usize,
    /// Bytes occupied by live allocations.
    pub used: usize,
}

impl RegionStats {
    fn new(capacity: usize, used: usize) -> Self {
        Self { capacity, used }
    }

    /// Bytes still available.
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }
}

/// Usage figures and collector counters reported by [`Heap::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// Eden usage.
    pub eden: RegionStats,
    /// Usage of the survivor space currently holding objects.
    pub from_space: RegionStats,
    /// Usage of the copy-target survivor space; nonzero only while a minor
    /// collection is in progress.
    pub to_space: RegionStats,
    /// Old-generation usage, counted in whole cells.
    pub old: RegionStats,
    /// Minor collections run so far.
    pub young_gc_count: usize,
    /// Mark-sweep passes run so far.
    pub old_gc_count: usize,
    /// Objects moved into the old generation.
    pub objects_promoted: usize,
    /// Old-generation cells reclaimed by sweeping.
    pub cells_reclaimed: usize,
    /// Current remembered-set size.
    pub remembered: usize,
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "eden:       {}/{} bytes", self.eden.used, self.eden.capacity)?;
        writeln!(
            f,
            "from-space: {}/{} bytes",
            self.from_space.used, self.from_space.capacity
        )?;
        writeln!(
            f,
            "to-space:   {}/{} bytes",
            self.to_space.used, self.to_space.capacity
        )?;
        writeln!(f, "old:        {}/{} bytes", self.old.used, self.old.capacity)?;
        writeln!(f, "minor collections: {}", self.young_gc_count)?;
        writeln!(f, "major collections: {}", self.old_gc_count)?;
        writeln!(f, "objects promoted:  {}", self.objects_promoted)?;
        writeln!(f, "cells reclaimed:   {}", self.cells_reclaimed)?;
        write!(f, "remembered edges:  {}", self.remembered)
    }
}

/// The generational heap for handle-addressed managed objects.
///
/// New objects go to Eden and are promoted to the old generation once they
/// survive enough minor collections (or when the To space overflows during
/// one). Old-to-young references are tracked through [`Heap::update_pointer`]
/// so minor collections never scan the whole old generation.
#[derive(Debug)]
pub struct Heap {
    /// Backing buffer for both generations; the address is fixed for the
    /// heap's lifetime, so offsets stay valid across collections.
    buf: NonNull<u8>,
    layout: Layout,
    pub(crate) young: YoungGen,
    pub(crate) old: OldGen,
    pub(crate) remembered: RememberedSet,
    pub(crate) roots: Vec<Weak<RefCell<RootSlots>>>,
    /// Permanent allocations, addressed by slot index.
    permanent: Vec<(NonNull<u8>, Layout)>,
    /// Cells promoted by the minor collection currently in progress;
    /// treated as mark roots so a nested sweep cannot reclaim them before
    /// their referents are rewritten.
    pub(crate) promoted_this_pass: Vec<GcRef>,
    /// Cells reclaimed by a sweep nested in the minor collection in
    /// progress. A reclaimed cell can be handed straight to a promoted
    /// object, whose handle then compares equal to the dead container's,
    /// so the rescan needs more than the entry set to tell them apart.
    pub(crate) swept_this_pass: Vec<GcRef>,
    pub(crate) config: GcConfig,
    pub(crate) young_gc_count: usize,
    pub(crate) old_gc_count: usize,
    pub(crate) objects_promoted: usize,
    pub(crate) cells_reclaimed: usize,
}

impl Heap {
    /// Creates a heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default()).expect("default configuration is valid")
    }

    /// Creates a heap partitioned according to `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`GcError`] when the weights, cell size, or heap size
    /// cannot produce a usable partition.
    ///
    /// # Panics
    ///
    /// Panics if the backing buffer cannot be allocated.
    pub fn with_config(config: GcConfig) -> Result<Self, GcError> {
        let min_object = align_up(mem::size_of::<GcHeader>() + HEAP_ALIGN);

        if config.young_weight == 0 || config.old_weight == 0 {
            return Err(GcError::ZeroGenerationWeight {
                young: config.young_weight,
                old: config.old_weight,
            });
        }
        if config.eden_weight == 0 {
            return Err(GcError::ZeroEdenWeight);
        }
        if config.from_weight != config.to_weight || config.from_weight == 0 {
            return Err(GcError::UnequalSurvivors {
                from: config.from_weight,
                to: config.to_weight,
            });
        }
        if config.cell_size % HEAP_ALIGN != 0 {
            return Err(GcError::UnalignedCellSize(config.cell_size));
        }
        if config.cell_size < min_object {
            return Err(GcError::CellTooSmall {
                cell: config.cell_size,
                min: min_object,
            });
        }
        let limit = u32::MAX as usize;
        if config.heap_size > limit {
            return Err(GcError::HeapTooLarge {
                size: config.heap_size,
                limit,
            });
        }

        let gen_total = config
            .young_weight
            .checked_add(config.old_weight)
            .ok_or(GcError::OverflowingWeights)?;
        let young_share = config
            .heap_size
            .checked_mul(config.young_weight)
            .ok_or(GcError::OverflowingWeights)?;
        let young_total = align_down(young_share / gen_total);
        let space_total = config
            .eden_weight
            .checked_add(config.from_weight)
            .and_then(|sum| sum.checked_add(config.to_weight))
            .ok_or(GcError::OverflowingWeights)?;
        let survivor_share = young_total
            .checked_mul(config.from_weight)
            .ok_or(GcError::OverflowingWeights)?;
        let survivor_size = align_down(survivor_share / space_total);
        let eden_size = young_total.saturating_sub(2 * survivor_size);
        let old_start = young_total;
        let cell_count = config.heap_size.saturating_sub(old_start) / config.cell_size;

        if survivor_size < min_object || eden_size < min_object || cell_count == 0 {
            return Err(GcError::HeapTooSmall {
                size: config.heap_size,
            });
        }

        let layout = Layout::from_size_align(config.heap_size, HEAP_ALIGN).expect("Invalid layout");
        // SAFETY: the layout has a non-zero size, checked above.
        let raw = unsafe { alloc_zeroed(layout) };
        if raw.is_null() {
            panic!("Failed to allocate heap of size {}", config.heap_size);
        }
        // SAFETY: raw was just checked non-null.
        let buf = unsafe { NonNull::new_unchecked(raw) };

        let eden = Region {
            start: 0,
            size: eden_size,
        };
        let survivor_a = Region {
            start: eden_size,
            size: survivor_size,
        };
        let survivor_b = Region {
            start: eden_size + survivor_size,
            size: survivor_size,
        };
        let old_region = Region {
            start: old_start,
            size: cell_count * config.cell_size,
        };

        let mut heap = Heap {
            buf,
            layout,
            young: YoungGen {
                eden,
                survivor_a,
                survivor_b,
                from_is_a: true,
                eden_used: 0,
                from_used: 0,
                to_used: 0,
            },
            old: OldGen::new(old_region, config.cell_size, cell_count),
            remembered: RememberedSet::new(),
            roots: Vec::new(),
            permanent: Vec::new(),
            promoted_this_pass: Vec::new(),
            swept_this_pass: Vec::new(),
            config,
            young_gc_count: 0,
            old_gc_count: 0,
            objects_promoted: 0,
            cells_reclaimed: 0,
        };
        heap.thread_free_list();
        Ok(heap)
    }

    /// The active configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.buf.as_ptr()
    }

    /// Resolves a handle to its header location.
    ///
    /// # Panics
    ///
    /// Panics on a dangling permanent handle.
    pub(crate) fn header_ptr(&self, r: GcRef) -> *mut GcHeader {
        match r.generation() {
            Generation::Permanent => {
                let index = r.offset() as usize;
                if index >= self.permanent.len() {
                    panic!("dangling permanent handle {:?}", r);
                }
                self.permanent[index].0.as_ptr() as *mut GcHeader
            }
            Generation::Young | Generation::Old => {
                let offset = r.offset() as usize;
                debug_assert!(
                    offset + mem::size_of::<GcHeader>() <= self.config.heap_size,
                    "handle out of bounds: {:?}",
                    r
                );
                if r.is_old() {
                    debug_assert!(
                        self.old.is_occupied_offset(offset),
                        "handle to a reclaimed cell: {:?}",
                        r
                    );
                }
                // SAFETY: the offset stays within the buffer allocation.
                unsafe { self.base().add(offset) as *mut GcHeader }
            }
        }
    }

    pub(crate) fn header(&self, r: GcRef) -> GcHeader {
        // SAFETY: header_ptr points at an initialized header.
        unsafe { *self.header_ptr(r) }
    }

    pub(crate) fn set_header(&mut self, r: GcRef, header: GcHeader) {
        // SAFETY: same location header() reads from.
        unsafe { *self.header_ptr(r) = header }
    }

    pub(crate) fn payload_ptr(&self, r: GcRef) -> *mut u8 {
        // SAFETY: the payload begins immediately after the header, inside
        // the same allocation.
        unsafe { (self.header_ptr(r) as *mut u8).add(mem::size_of::<GcHeader>()) }
    }

    /// Borrows the object behind `r` through its type table.
    pub(crate) fn managed(&self, r: GcRef) -> &dyn Managed {
        let header = self.header(r);
        // SAFETY: the handle refers to a live object whose payload was
        // installed together with the table stored in its header.
        unsafe { &*(header.table.cast)(self.payload_ptr(r)) }
    }

    pub(crate) fn managed_mut(&mut self, r: GcRef) -> &mut dyn Managed {
        let header = self.header(r);
        // SAFETY: as in managed(); `&mut self` keeps the borrow unique.
        unsafe { &mut *(header.table.cast)(self.payload_ptr(r)) }
    }

    /// Borrows the payload behind `handle` as `T`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was allocated with a different payload type.
    pub fn get<T: Managed>(&self, handle: GcRef) -> &T {
        self.check_type::<T>(handle);
        // SAFETY: check_type proved the payload is a T.
        unsafe { &*(self.payload_ptr(handle) as *const T) }
    }

    /// Mutably borrows the payload behind `handle` as `T`.
    ///
    /// Reference fields must still be written through
    /// [`update_pointer`](Heap::update_pointer); mutating value fields
    /// directly is fine.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was allocated with a different payload type.
    pub fn get_mut<T: Managed>(&mut self, handle: GcRef) -> &mut T {
        self.check_type::<T>(handle);
        // SAFETY: check_type proved the payload is a T.
        unsafe { &mut *(self.payload_ptr(handle) as *mut T) }
    }

    fn check_type<T: Managed>(&self, handle: GcRef) {
        let header = self.header(handle);
        if (header.table.type_id)() != TypeId::of::<T>() {
            panic!(
                "type mismatch: handle holds {}, requested {}",
                (header.table.type_name)(),
                std::any::type_name::<T>()
            );
        }
    }

    fn footprint_of<T>(&self) -> usize {
        align_up(mem::size_of::<GcHeader>() + mem::size_of::<T>())
    }

    fn check_payload_alignment<T>(&self) {
        assert!(
            mem::align_of::<T>() <= HEAP_ALIGN,
            "payload alignment {} exceeds heap alignment {}",
            mem::align_of::<T>(),
            HEAP_ALIGN
        );
    }

    /// Allocates `value` in Eden and returns its handle.
    ///
    /// When Eden is full this runs one minor collection and retries.
    ///
    /// # Panics
    ///
    /// Panics if the object still does not fit afterwards, or if `T`
    /// requires alignment above 8.
    pub fn allocate_young<T: Managed>(&mut self, value: T) -> GcRef {
        self.check_payload_alignment::<T>();
        let footprint = self.footprint_of::<T>();

        let offset = match self.bump_eden(footprint) {
            Some(offset) => offset,
            None => {
                self.collect_garbage();
                match self.bump_eden(footprint) {
                    Some(offset) => offset,
                    None => panic!(
                        "young generation exhausted: {} bytes requested, {} free in eden after minor collection",
                        footprint,
                        self.young.eden.size - self.young.eden_used
                    ),
                }
            }
        };

        let handle = GcRef::new(Generation::Young, offset as u32);
        self.install(handle, footprint, value);
        handle
    }

    fn bump_eden(&mut self, footprint: usize) -> Option<usize> {
        if self.young.eden_used + footprint > self.young.eden.size {
            return None;
        }
        let offset = self.young.eden.start + self.young.eden_used;
        self.young.eden_used += footprint;
        Some(offset)
    }

    /// Allocates `value` directly in an old-generation cell.
    ///
    /// When every cell is occupied this runs one mark-sweep pass and
    /// retries.
    ///
    /// # Panics
    ///
    /// Panics if the footprint exceeds the configured cell size, if no cell
    /// is free after the pass, or if `T` requires alignment above 8.
    pub fn allocate_old<T: Managed>(&mut self, value: T) -> GcRef {
        self.check_payload_alignment::<T>();
        let footprint = self.footprint_of::<T>();
        if footprint > self.config.cell_size {
            panic!(
                "cannot fit a {}-byte object into a {}-byte old-generation cell",
                footprint, self.config.cell_size
            );
        }

        let offset = self.claim_cell_or_collect();
        let handle = GcRef::new(Generation::Old, offset as u32);
        self.install(handle, footprint, value);
        handle
    }

    /// Allocates `value` outside both generations.
    ///
    /// Permanent objects are never scanned or moved and are released only
    /// when the heap is dropped, without running teardown. Their fields must
    /// not reference collectible objects, since no collection ever visits
    /// them.
    pub fn allocate_permanent<T: Managed>(&mut self, value: T) -> GcRef {
        self.check_payload_alignment::<T>();
        let footprint = self.footprint_of::<T>();
        let layout = Layout::from_size_align(footprint, HEAP_ALIGN).expect("Invalid layout");
        // SAFETY: footprint always covers at least a header, never zero.
        let raw = unsafe { alloc_zeroed(layout) };
        if raw.is_null() {
            panic!("Failed to allocate permanent object of size {}", footprint);
        }
        // SAFETY: raw was just checked non-null.
        let block = unsafe { NonNull::new_unchecked(raw) };

        let index = self.permanent.len();
        assert!(index <= u32::MAX as usize, "permanent slot index overflow");
        self.permanent.push((block, layout));

        let handle = GcRef::new(Generation::Permanent, index as u32);
        self.install(handle, footprint, value);
        handle
    }

    fn install<T: Managed>(&mut self, handle: GcRef, footprint: usize, value: T) {
        let header = GcHeader::new(footprint as u32, TypeTable::of::<T>());
        // SAFETY: the handle was just carved out of free space large enough
        // for the header plus the payload.
        unsafe {
            ptr::write(self.header_ptr(handle), header);
            ptr::write(self.payload_ptr(handle) as *mut T, value);
        }
    }

    /// Stores `target` into reference slot `slot` of `container`.
    ///
    /// All reference-field writes go through here; a direct field store
    /// would bypass the write barrier and a later minor collection could
    /// miss an old-to-young edge.
    pub fn update_pointer(&mut self, container: GcRef, slot: usize, target: Option<GcRef>) {
        write_barrier(self, container, target);
        self.managed_mut(container).set_field(slot, target);
    }

    /// Creates a root set whose slots the collector treats as live.
    ///
    /// The heap keeps a weak registration; dropping every clone of the
    /// returned set unregisters it.
    pub fn register_root_set(&mut self) -> RootSet {
        self.roots.retain(|weak| weak.strong_count() > 0);
        let set = RootSet::new();
        self.roots.push(set.downgrade());
        set
    }

    /// Minor collections the object behind `handle` has survived.
    pub fn age_of(&self, handle: GcRef) -> u8 {
        self.header(handle).age
    }

    /// The remembered set of old-generation containers holding young
    /// references.
    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered
    }

    /// A point-in-time snapshot of usage figures and collector counters.
    pub fn stats(&self) -> GcStats {
        GcStats {
            eden: RegionStats::new(self.young.eden.size, self.young.eden_used),
            from_space: RegionStats::new(self.young.from_space().size, self.young.from_used),
            to_space: RegionStats::new(self.young.to_space().size, self.young.to_used),
            old: RegionStats::new(self.old.capacity(), self.old.used_bytes()),
            young_gc_count: self.young_gc_count,
            old_gc_count: self.old_gc_count,
            objects_promoted: self.objects_promoted,
            cells_reclaimed: self.cells_reclaimed,
            remembered: self.remembered.len(),
        }
    }

    /// Zeroes the collection counters; usage figures are unaffected.
    pub fn reset_stats(&mut self) {
        self.young_gc_count = 0;
        self.old_gc_count = 0;
        self.objects_promoted = 0;
        self.cells_reclaimed = 0;
    }

    /// Total bytes of managed memory across both generations.
    pub fn total_memory(&self) -> usize {
        self.config.heap_size
    }

    /// Bytes currently used in the young generation.
    pub fn young_generation_size(&self) -> usize {
        self.young.used()
    }

    /// Bytes currently used in the old generation, counted in whole cells.
    pub fn old_generation_size(&self) -> usize {
        self.old.used_bytes()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Payload destructors never run; the Managed contract forbids
        // owning teardown-dependent resources.
        for (block, layout) in self.permanent.drain(..) {
            // SAFETY: each block was allocated in allocate_permanent with
            // this exact layout.
            unsafe { dealloc(block.as_ptr(), layout) };
        }
        // SAFETY: buf was allocated in with_config with self.layout.
        unsafe { dealloc(self.buf.as_ptr(), self.layout) };
    }
}
