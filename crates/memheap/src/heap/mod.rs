//! Bounded-region heap: boundary-tag block list, circular free list,
//! first-fit placement with in-place reallocation.
//!
//! The pool is carved at construction into a single free body followed by a
//! permanent zero-payload tail sentinel. Every item carries a header with a
//! magic/state word, a back reference to its heap, address-ordered block
//! links and (while free) circular free-list links. Allocation is first-fit
//! with splitting; release merges with free neighbors on both sides, so no
//! two adjacent free items ever coexist.

mod block;
mod config;
mod handle;
mod region;
mod stats;

pub use block::{ALIGN, HEADER_SIZE, MIN_PAYLOAD};
pub use config::HeapConfig;
pub use handle::{MemHeap, free_raw, usable_size};
pub use stats::HeapStats;

pub(crate) use block::BlockHeader;
pub(crate) use handle::HeapShared;
