//! Property-based tests for heap partitioning and collection invariants
//!
//! Random geometries and object graphs explore the state space that the
//! example-driven tests pin down point by point: partitions never overlap
//! or escape the heap, handles always carry the generation they were
//! allocated into, and collection preserves exactly the rooted subgraph.

use proptest::prelude::*;

use memory_manager::{GcConfig, GcRef, Generation, Heap, Managed};

struct Leaf {
    value: u64,
}

impl Managed for Leaf {}

struct Node {
    next: Option<GcRef>,
    value: u64,
}

impl Managed for Node {
    fn fields(&self) -> Option<Vec<Option<GcRef>>> {
        Some(vec![self.next])
    }

    fn set_field(&mut self, index: usize, target: Option<GcRef>) {
        assert_eq!(index, 0);
        self.next = target;
    }
}

/// Builds a rooted singly linked list holding `values` front to back and
/// returns the root slot index.
fn build_list(heap: &mut Heap, roots: &memory_manager::RootSet, values: &[u64]) -> usize {
    let mut next = None;
    for &value in values.iter().rev() {
        let node = heap.allocate_young(Node { next: None, value });
        if let Some(tail) = next {
            heap.update_pointer(node, 0, Some(tail));
        }
        next = Some(node);
    }
    roots.push(next.expect("values is non-empty"))
}

/// Walks a list from `head` and returns the values in order.
fn read_list(heap: &Heap, head: GcRef) -> Vec<u64> {
    let mut values = Vec::new();
    let mut cursor = Some(head);
    while let Some(node) = cursor {
        let node = heap.get::<Node>(node);
        values.push(node.value);
        cursor = node.next;
    }
    values
}

proptest! {
    /// Invariant: an accepted configuration carves disjoint aligned regions
    /// that fit inside the requested heap
    #[test]
    fn prop_partition_fits_heap(
        heap_size in 2048usize..65536,
        young_weight in 1usize..5,
        old_weight in 1usize..9,
        eden_weight in 1usize..9,
        survivor_weight in 1usize..5,
        cell_units in 4usize..33
    ) {
        let cell_size = cell_units * 8;
        let config = GcConfig {
            heap_size,
            young_weight,
            old_weight,
            eden_weight,
            from_weight: survivor_weight,
            to_weight: survivor_weight,
            max_age: 3,
            cell_size,
        };

        let heap = match Heap::with_config(config) {
            Ok(heap) => heap,
            // Degenerate geometries are rejected, not mis-partitioned.
            Err(_) => return Ok(()),
        };

        let stats = heap.stats();
        prop_assert_eq!(stats.eden.capacity % 8, 0);
        prop_assert_eq!(stats.from_space.capacity % 8, 0);
        prop_assert_eq!(stats.to_space.capacity, stats.from_space.capacity);
        prop_assert_eq!(stats.old.capacity % cell_size, 0);
        prop_assert!(stats.eden.capacity > 0);
        prop_assert!(stats.from_space.capacity > 0);
        prop_assert!(stats.old.capacity >= cell_size);
        prop_assert!(
            stats.eden.capacity + 2 * stats.from_space.capacity + stats.old.capacity
                <= heap_size,
            "regions must fit: eden {} + 2x{} + old {} > {}",
            stats.eden.capacity,
            stats.from_space.capacity,
            stats.old.capacity,
            heap_size
        );
        prop_assert_eq!(heap.total_memory(), heap_size);
    }

    /// Invariant: a handle carries the generation it was allocated into and
    /// resolves back to the stored value
    #[test]
    fn prop_generation_tags_match_allocation_site(
        values in prop::collection::vec(any::<u64>(), 1..16)
    ) {
        let mut heap = Heap::new();
        for &value in &values {
            let young = heap.allocate_young(Leaf { value });
            prop_assert!(young.is_young());
            prop_assert_eq!(heap.get::<Leaf>(young).value, value);

            let old = heap.allocate_old(Leaf { value });
            prop_assert!(old.is_old());
            prop_assert_eq!(heap.get::<Leaf>(old).value, value);

            let fixed = heap.allocate_permanent(Leaf { value });
            prop_assert_eq!(fixed.generation(), Generation::Permanent);
            prop_assert_eq!(heap.get::<Leaf>(fixed).value, value);
        }
    }

    /// Invariant: rooted list contents and order survive any number of
    /// collections that promote nothing
    #[test]
    fn prop_list_round_trips_across_collections(
        values in prop::collection::vec(1u64..1000, 1..20),
        collections in 1usize..4
    ) {
        let mut heap = Heap::new();
        let roots = heap.register_root_set();
        let slot = build_list(&mut heap, &roots, &values);

        for _ in 0..collections {
            heap.collect_garbage();
        }

        let head = roots.get(slot).expect("rooted");
        prop_assert!(head.is_young(), "nothing promotes below max age");
        prop_assert_eq!(read_list(&heap, head), values);
    }

    /// Invariant: a survivor's age counts collections until it reaches the
    /// promotion threshold, then it moves to the old generation once
    #[test]
    fn prop_age_increments_until_promotion(rounds in 1usize..8) {
        let mut heap = Heap::new();
        let max_age = heap.config().max_age;
        let roots = heap.register_root_set();
        let handle = heap.allocate_young(Leaf { value: 9 });
        let slot = roots.push(handle);

        for _ in 0..rounds {
            heap.collect_garbage();
        }

        let current = roots.get(slot).expect("rooted");
        prop_assert_eq!(heap.get::<Leaf>(current).value, 9);
        if rounds <= max_age as usize {
            prop_assert!(current.is_young());
            prop_assert_eq!(heap.age_of(current) as usize, rounds);
        } else {
            prop_assert!(current.is_old());
            prop_assert_eq!(heap.age_of(current), max_age + 1);
            prop_assert_eq!(heap.stats().objects_promoted, 1);
        }
    }

    /// Invariant: collection keeps exactly the rooted subgraph; unrooted
    /// objects never reach a survivor space
    #[test]
    fn prop_unrooted_objects_never_survive(count in 1usize..12) {
        let mut heap = Heap::new();
        let roots = heap.register_root_set();

        let kept = heap.allocate_young(Leaf { value: 1 });
        roots.push(kept);
        let footprint = heap.stats().eden.used;

        for value in 0..count as u64 {
            let _ = heap.allocate_young(Leaf { value });
        }

        heap.collect_garbage();

        let stats = heap.stats();
        prop_assert_eq!(stats.from_space.used, footprint, "only the root survives");
        prop_assert_eq!(stats.eden.used, 0);
    }
}
