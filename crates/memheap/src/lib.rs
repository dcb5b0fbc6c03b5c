//! # memheap
//!
//! Bounded-region heap allocator for workloads that get their memory as one
//! fixed range up front: embedded targets, real-time services, carved-out
//! shared segments. All bookkeeping lives inline inside the managed range as
//! boundary-tag headers; placement is first-fit with splitting, release
//! merges free neighbors on both sides, and reallocation grows or shrinks in
//! place whenever the neighboring layout allows it.
//!
//! Every heap serializes its mutations through a single mutex, so handles
//! can be cloned and shared across threads freely. Several heaps can be
//! registered process-wide and multiplexed through the [`system`] façade,
//! which walks them in registration order on an allocation miss.
//!
//! ```
//! use memheap::MemHeap;
//!
//! let heap = MemHeap::new("scratch", 64 * 1024)?;
//! let block = heap.alloc(256)?;
//! let bigger = unsafe { heap.realloc(block.as_ptr(), 512)? };
//! unsafe { heap.free(bigger.as_ptr()) };
//! heap.detach();
//! # Ok::<(), memheap::HeapError>(())
//! ```

pub mod error;
pub mod heap;
pub mod registry;
pub mod system;
pub mod utils;

pub use error::{HeapError, HeapResult};
pub use heap::{
    ALIGN, HEADER_SIZE, HeapConfig, HeapStats, MIN_PAYLOAD, MemHeap, free_raw, usable_size,
};
pub use registry::HeapRegistry;
