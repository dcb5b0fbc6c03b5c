//! Process-wide registry of live heaps.
//!
//! Heaps register themselves at construction and leave on
//! [`MemHeap::detach`]. The registry keeps registration order, which is the
//! order the system façade walks on an allocation miss. Entries hold a clone
//! of the handle, so a registered heap stays alive until it is detached.

use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::heap::MemHeap;

/// Ordered collection of live heaps.
pub struct HeapRegistry {
    heaps: RwLock<Vec<MemHeap>>,
}

impl HeapRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            heaps: RwLock::new(Vec::new()),
        }
    }

    /// Adds a heap at the end of the walk order. Duplicate names are
    /// permitted; removal goes by handle identity.
    pub fn register(&self, heap: &MemHeap) {
        self.heaps.write().push(heap.clone());
    }

    /// Removes a heap by identity. Returns whether it was present.
    pub fn unregister(&self, heap: &MemHeap) -> bool {
        let mut heaps = self.heaps.write();
        let before = heaps.len();
        heaps.retain(|candidate| !candidate.same_heap(heap));
        heaps.len() != before
    }

    /// First registered heap with the given name.
    pub fn find(&self, name: &str) -> Option<MemHeap> {
        self.heaps
            .read()
            .iter()
            .find(|heap| heap.name() == name)
            .cloned()
    }

    /// Snapshot of all registered heaps in registration order.
    pub fn heaps(&self) -> Vec<MemHeap> {
        self.heaps.read().clone()
    }

    /// Number of registered heaps.
    pub fn len(&self) -> usize {
        self.heaps.read().len()
    }

    /// Whether no heap is registered.
    pub fn is_empty(&self) -> bool {
        self.heaps.read().is_empty()
    }
}

impl Default for HeapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry instance.
pub fn global() -> &'static HeapRegistry {
    static GLOBAL: OnceLock<HeapRegistry> = OnceLock::new();
    GLOBAL.get_or_init(HeapRegistry::new)
}
