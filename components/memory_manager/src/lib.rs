//! Memory Manager - Generational garbage collector and heap management
//!
//! This component provides:
//! - A two-generation heap: copying-collected young space, mark-sweep old
//!   space, connected by a write barrier and remembered set
//! - Handle-based object access (no raw pointers cross the API)
//! - Root-set registration for mutator-held references
//! - Usage and collection statistics
//!
//! # Example
//!
//! ```
//! use memory_manager::{GcRef, Heap, Managed};
//!
//! struct Node {
//!     next: Option<GcRef>,
//!     value: u64,
//! }
//!
//! impl Managed for Node {
//!     fn fields(&self) -> Option<Vec<Option<GcRef>>> {
//!         Some(vec![self.next])
//!     }
//!
//!     fn set_field(&mut self, index: usize, target: Option<GcRef>) {
//!         assert_eq!(index, 0);
//!         self.next = target;
//!     }
//! }
//!
//! let mut heap = Heap::new();
//! let roots = heap.register_root_set();
//!
//! let tail = heap.allocate_young(Node { next: None, value: 2 });
//! let head = heap.allocate_young(Node { next: None, value: 1 });
//! heap.update_pointer(head, 0, Some(tail));
//! let slot = roots.push(head);
//!
//! heap.collect_garbage();
//!
//! // Survivors moved; the root slot holds the current handle.
//! let head = roots.get(slot).unwrap();
//! let tail = heap.get::<Node>(head).next.unwrap();
//! assert_eq!(heap.get::<Node>(tail).value, 2);
//! ```

pub mod gc;
pub mod heap;
pub mod mark_sweep;
pub mod object;
pub mod roots;
pub mod write_barrier;

// Re-export main types
pub use heap::{GcConfig, GcError, GcStats, Heap, RegionStats};
pub use object::{GcRef, Generation, Managed};
pub use roots::RootSet;
pub use write_barrier::RememberedSet;
