//! Contract tests verifying the memory_manager API keeps its documented shape.
//! These tests ensure all exported types and functions exist with correct signatures.

use memory_manager::{GcConfig, GcRef, Generation, Heap, Managed};

struct Leaf {
    value: u64,
}

impl Managed for Leaf {}

struct Cell {
    inner: Option<GcRef>,
}

impl Managed for Cell {
    fn fields(&self) -> Option<Vec<Option<GcRef>>> {
        Some(vec![self.inner])
    }

    fn set_field(&mut self, index: usize, target: Option<GcRef>) {
        assert_eq!(index, 0);
        self.inner = target;
    }
}

/// Test Heap contract: new() -> Self
#[test]
fn contract_heap_new() {
    let heap = Heap::new();
    // Should create a new heap
    let _ = heap;
}

/// Test Heap contract: with_config(GcConfig) -> Result<Self, GcError>
#[test]
fn contract_heap_with_config() {
    let heap = Heap::with_config(GcConfig::default());
    assert!(heap.is_ok());

    let rejected = Heap::with_config(GcConfig {
        from_weight: 1,
        to_weight: 2,
        ..GcConfig::default()
    });
    assert!(rejected.is_err());
}

/// Test Heap contract: allocate_young<T: Managed>(T) -> GcRef
#[test]
fn contract_heap_allocate_young() {
    let mut heap = Heap::new();
    let handle = heap.allocate_young(Leaf { value: 1 });
    assert!(handle.is_young());
    assert_eq!(heap.get::<Leaf>(handle).value, 1);
}

/// Test Heap contract: allocate_old<T: Managed>(T) -> GcRef
#[test]
fn contract_heap_allocate_old() {
    let mut heap = Heap::new();
    let handle = heap.allocate_old(Leaf { value: 2 });
    assert!(handle.is_old());
    assert_eq!(heap.get::<Leaf>(handle).value, 2);
}

/// Test Heap contract: allocate_permanent<T: Managed>(T) -> GcRef
#[test]
fn contract_heap_allocate_permanent() {
    let mut heap = Heap::new();
    let handle = heap.allocate_permanent(Leaf { value: 3 });
    assert_eq!(handle.generation(), Generation::Permanent);
    assert_eq!(heap.get::<Leaf>(handle).value, 3);
}

/// Test Heap contract: get_mut<T: Managed>(GcRef) -> &mut T
#[test]
fn contract_heap_get_mut() {
    let mut heap = Heap::new();
    let handle = heap.allocate_young(Leaf { value: 4 });
    heap.get_mut::<Leaf>(handle).value = 5;
    assert_eq!(heap.get::<Leaf>(handle).value, 5);
}

/// Test Heap contract: update_pointer(GcRef, usize, Option<GcRef>) -> ()
#[test]
fn contract_heap_update_pointer() {
    let mut heap = Heap::new();
    let container = heap.allocate_young(Cell { inner: None });
    let target = heap.allocate_young(Leaf { value: 6 });
    heap.update_pointer(container, 0, Some(target));
    assert_eq!(heap.get::<Cell>(container).inner, Some(target));
}

/// Test Heap contract: collect_garbage() -> ()
#[test]
fn contract_heap_collect_garbage() {
    let mut heap = Heap::new();
    heap.collect_garbage();
    // Should complete without error
    assert_eq!(heap.stats().young_gc_count, 1);
}

/// Test Heap contract: full_gc() -> ()
#[test]
fn contract_heap_full_gc() {
    let mut heap = Heap::new();
    heap.full_gc();
    assert_eq!(heap.stats().young_gc_count, 1);
    assert_eq!(heap.stats().old_gc_count, 1);
}

/// Test Heap contract: young_generation_size() / old_generation_size() -> usize
#[test]
fn contract_heap_generation_sizes() {
    let mut heap = Heap::new();
    // Sizes report used space - both start at 0 for an empty heap
    assert_eq!(heap.young_generation_size(), 0);
    assert_eq!(heap.old_generation_size(), 0);

    let _ = heap.allocate_young(Leaf { value: 1 });
    let _ = heap.allocate_old(Leaf { value: 2 });
    assert!(heap.young_generation_size() > 0);
    assert!(heap.old_generation_size() > 0);
}

/// Test Heap contract: total_memory() -> usize
#[test]
fn contract_heap_total_memory() {
    let heap = Heap::new();
    assert_eq!(heap.total_memory(), GcConfig::default().heap_size);
}

/// Test Heap contract: stats() -> GcStats and reset_stats() -> ()
#[test]
fn contract_heap_stats() {
    let mut heap = Heap::new();
    heap.collect_garbage();
    let stats = heap.stats();
    assert_eq!(stats.young_gc_count, 1);
    assert!(stats.eden.capacity > 0);
    assert!(!stats.to_string().is_empty());

    heap.reset_stats();
    assert_eq!(heap.stats().young_gc_count, 0);
}

/// Test Heap contract: age_of(GcRef) -> u8
#[test]
fn contract_heap_age_of() {
    let mut heap = Heap::new();
    let handle = heap.allocate_young(Leaf { value: 7 });
    assert_eq!(heap.age_of(handle), 0);
}

/// Test Heap contract: remembered_set() -> &RememberedSet
#[test]
fn contract_heap_remembered_set() {
    let heap = Heap::new();
    assert!(heap.remembered_set().is_empty());
    assert_eq!(heap.remembered_set().len(), 0);
}

/// Test Heap contract: register_root_set() -> RootSet with slot operations
#[test]
fn contract_root_set_operations() {
    let mut heap = Heap::new();
    let roots = heap.register_root_set();
    let handle = heap.allocate_young(Leaf { value: 8 });

    let slot = roots.push(handle);
    assert_eq!(roots.len(), 1);
    assert!(!roots.is_empty());
    assert_eq!(roots.get(slot), Some(handle));

    roots.set(slot, None);
    assert_eq!(roots.get(slot), None);

    roots.set(slot, Some(handle));
    assert_eq!(roots.pop(), Some(handle));
    assert!(roots.is_empty());

    roots.push(handle);
    roots.clear();
    assert!(roots.is_empty());
}

/// Test GcRef contract: generation() and the generation predicates agree
#[test]
fn contract_gc_ref_accessors() {
    let mut heap = Heap::new();
    let young = heap.allocate_young(Leaf { value: 9 });
    assert_eq!(young.generation(), Generation::Young);
    assert!(young.is_young());
    assert!(!young.is_old());

    // Handles are plain copyable values
    let copy = young;
    assert_eq!(copy, young);
}

/// Test GcConfig contract: Default carries the documented geometry
#[test]
fn contract_gc_config_default() {
    let config = GcConfig::default();
    assert_eq!(config.heap_size, 1024 * 1024);
    assert_eq!(config.young_weight, 2);
    assert_eq!(config.old_weight, 8);
    assert_eq!(config.max_age, 3);
    assert_eq!(config.cell_size, 128);
}

/// Test GcError contract: rejection reasons render as messages
#[test]
fn contract_gc_error_display() {
    let err = Heap::with_config(GcConfig {
        young_weight: 0,
        ..GcConfig::default()
    })
    .unwrap_err();
    assert!(!err.to_string().is_empty());
}

/// Test Managed contract: default methods describe a leaf object
#[test]
fn contract_managed_defaults() {
    let leaf = Leaf { value: 10 };
    assert!(leaf.fields().is_none());
    assert_eq!(leaf.size_bytes(), std::mem::size_of::<Leaf>());
}
