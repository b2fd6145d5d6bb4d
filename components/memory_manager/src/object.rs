//! The managed-object contract: handles, allocation headers, and the
//! [`Managed`] trait every collectible type implements.

use std::any::TypeId;
use std::fmt;
use std::mem;
use std::ptr;

/// Heap region a handle points into.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Generation {
    /// Eden plus the two survivor spaces; copying-collected.
    Young,
    /// The fixed-size cell region; mark-sweep collected.
    Old,
    /// Never collected; freed only when the heap is dropped.
    Permanent,
}

/// Handle to a managed object: a generation tag plus an offset the heap
/// resolves internally.
///
/// Handles are issued by the heap and stay opaque to the mutator. A minor
/// collection moves young objects, so a young handle held outside a root
/// set is stale once a collection runs; the collector rewrites root-set
/// slots and object fields, and the mutator re-reads current handles from
/// there.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    generation: Generation,
    offset: u32,
}

impl GcRef {
    pub(crate) fn new(generation: Generation, offset: u32) -> Self {
        Self { generation, offset }
    }

    /// The region this handle points into.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Byte offset within the heap buffer (or slot index for permanent
    /// allocations).
    pub(crate) fn offset(&self) -> u32 {
        self.offset
    }

    /// True if the target lives in the young generation.
    pub fn is_young(&self) -> bool {
        self.generation == Generation::Young
    }

    /// True if the target lives in the old generation.
    pub fn is_old(&self) -> bool {
        self.generation == Generation::Old
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:?}+{:#x})", self.generation, self.offset)
    }
}

/// Set when an old-generation container holds at least one young reference.
pub(crate) const FLAG_REMEMBERED: u8 = 0b001;
/// Set on an original after its bytes moved; `forward` holds the new handle.
pub(crate) const FLAG_FORWARDED: u8 = 0b010;
/// Set during the mark phase on reachable old-generation objects.
pub(crate) const FLAG_MARKED: u8 = 0b100;

/// Collector-owned header preceding every allocation.
///
/// The header is written by the allocator and only ever touched by the
/// collector; payload types know nothing about it.
#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct GcHeader {
    /// Total footprint in bytes (header plus payload), 8-aligned.
    pub size: u32,
    /// Minor collections survived.
    pub age: u8,
    /// Remembered / forwarded / marked bits.
    pub flags: u8,
    _pad: [u8; 2],
    /// Relocation target; meaningful only while `FLAG_FORWARDED` is set.
    pub forward: GcRef,
    /// Per-type dispatch captured at allocation time.
    pub table: &'static TypeTable,
}

impl GcHeader {
    pub fn new(size: u32, table: &'static TypeTable) -> Self {
        Self {
            size,
            age: 0,
            flags: 0,
            _pad: [0; 2],
            forward: GcRef::new(Generation::Young, 0),
            table,
        }
    }

    pub fn flag(&self, bit: u8) -> bool {
        self.flags & bit != 0
    }

    pub fn set_flag(&mut self, bit: u8) {
        self.flags |= bit;
    }

    pub fn clear_flag(&mut self, bit: u8) {
        self.flags &= !bit;
    }
}

/// Per-type dispatch for payloads stored as raw bytes.
///
/// Captured once per concrete type at allocation time: how to rebuild a
/// trait-object pointer from the payload bytes, and the payload's identity
/// for checked typed access.
pub(crate) struct TypeTable {
    pub cast: unsafe fn(*mut u8) -> *mut dyn Managed,
    pub type_id: fn() -> TypeId,
    pub type_name: fn() -> &'static str,
}

impl TypeTable {
    pub(crate) fn of<T: Managed>() -> &'static TypeTable {
        trait Table {
            const TABLE: TypeTable;
        }
        impl<T: Managed> Table for T {
            const TABLE: TypeTable = TypeTable {
                cast: cast_payload::<T>,
                type_id: TypeId::of::<T>,
                type_name: std::any::type_name::<T>,
            };
        }
        &<T as Table>::TABLE
    }
}

/// Rebuilds a trait-object pointer from payload bytes.
///
/// # Safety
///
/// `payload` must point at a live, properly aligned `T`.
unsafe fn cast_payload<T: Managed>(payload: *mut u8) -> *mut dyn Managed {
    payload as *mut T as *mut dyn Managed
}

/// Contract every collectible type satisfies.
///
/// The collector stores objects as raw bytes behind a header; this trait is
/// how it walks and moves them without knowing their concrete type. Three
/// rules keep that sound:
///
/// - Every reference field the object owns must appear in [`fields`] at a
///   stable index, or the collector cannot preserve reachability across a
///   move.
/// - [`relocate_to`] must be a structural copy. No teardown ever runs, so
///   implementors must not own non-relocatable external resources; owned
///   allocations inside a payload are leaked when the object dies.
/// - Reference fields are only written through the heap's `update_pointer`,
///   which routes the store through the write barrier.
///
/// [`fields`]: Managed::fields
/// [`relocate_to`]: Managed::relocate_to
pub trait Managed: 'static {
    /// Every reference slot in a fixed order; `None` entries are empty
    /// slots. Returning `None` marks the type as a leaf with no reference
    /// fields.
    fn fields(&self) -> Option<Vec<Option<GcRef>>> {
        None
    }

    /// Stores `target` into the reference slot at `index`, using the same
    /// ordering as [`fields`](Managed::fields). Called by the collector when
    /// a target moves and by the heap's `update_pointer`.
    fn set_field(&mut self, index: usize, target: Option<GcRef>) {
        let _ = (index, target);
    }

    /// Duplicates this object's payload at `dst` without invoking teardown.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `size_bytes()` writes, 8-aligned, and must
    /// not overlap the source payload.
    unsafe fn relocate_to(&self, dst: *mut u8) {
        let size = mem::size_of_val(self);
        // SAFETY: the caller guarantees dst is valid for `size` bytes and
        // disjoint from self.
        unsafe {
            ptr::copy_nonoverlapping((self as *const Self).cast::<u8>(), dst, size);
        }
    }

    /// Payload size in bytes.
    fn size_bytes(&self) -> usize {
        mem::size_of_val(self)
    }
}
