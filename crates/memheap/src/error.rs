//! Error types for heap operations.
//!
//! Exhaustion and oversized requests are ordinary `Err` values that leave the
//! heap untouched; callers retry, shed load, or fall back to another heap.
//! Corruption detected on the hot paths (bad magic, double free, overwritten
//! neighbor headers) is fatal and panics instead; continuing after a
//! corrupted header would compound the damage. [`HeapError::Corrupted`] is
//! produced only by the offline consistency walk.

use thiserror::Error;

/// Result type for heap operations.
pub type HeapResult<T> = Result<T, HeapError>;

/// Errors reported by heap construction and allocation entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// No free block large enough to satisfy the request. The heap is left
    /// unchanged; freeing memory and retrying is always legal.
    #[error("heap `{heap}` exhausted: {requested} bytes requested, {available} available")]
    OutOfMemory {
        /// Name of the heap that rejected the request.
        heap: String,
        /// Requested payload size in bytes, before rounding.
        requested: usize,
        /// Free payload bytes at the time of the request.
        available: usize,
    },

    /// The requested size cannot be rounded up to the allocation granularity
    /// without overflowing `usize`.
    #[error("allocation of {requested} bytes overflows when rounded to alignment")]
    SizeOverflow {
        /// Requested payload size in bytes.
        requested: usize,
    },

    /// The memory region handed to the constructor is too small to hold the
    /// mandatory bookkeeping (two headers plus one minimum payload).
    #[error("region of {size} bytes cannot hold a heap (minimum {min} after alignment)")]
    RegionTooSmall {
        /// Raw size of the offered region in bytes.
        size: usize,
        /// Minimum usable region size in bytes.
        min: usize,
    },

    /// The consistency walk found an invariant violation.
    #[error("heap `{heap}` corrupted: {detail}")]
    Corrupted {
        /// Name of the corrupted heap.
        heap: String,
        /// Description of the first violated invariant.
        detail: String,
    },
}

impl HeapError {
    /// Stable machine-readable code, usable as a metric label.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "MEMHEAP_OUT_OF_MEMORY",
            Self::SizeOverflow { .. } => "MEMHEAP_SIZE_OVERFLOW",
            Self::RegionTooSmall { .. } => "MEMHEAP_REGION_TOO_SMALL",
            Self::Corrupted { .. } => "MEMHEAP_CORRUPTED",
        }
    }

    /// Whether the operation can be retried after the caller frees memory.
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// Whether the heap is still in a usable state after this error.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupted { .. })
    }
}
