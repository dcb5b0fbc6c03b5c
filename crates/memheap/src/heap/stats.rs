//! Heap statistics: accounting snapshot plus operation counters.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::format_bytes;

/// Point-in-time view of a heap's accounting and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Total managed pool bytes, headers included.
    pub pool_size: usize,
    /// Free payload bytes currently available.
    pub available: usize,
    /// High-water mark of `pool_size - available`.
    pub max_used: usize,
    /// Successful allocations.
    pub alloc_count: usize,
    /// Successful releases.
    pub free_count: usize,
    /// Successful reallocations (in-place or moved).
    pub realloc_count: usize,
    /// Allocation attempts rejected for lack of space.
    pub failed_allocs: usize,
}

impl HeapStats {
    /// Bytes currently consumed, headers included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.pool_size - self.available
    }

    /// Usage as a fraction of the pool, 0.0 to 100.0.
    #[must_use]
    pub fn usage_percent(&self) -> f64 {
        if self.pool_size == 0 {
            0.0
        } else {
            (self.used() as f64 / self.pool_size as f64) * 100.0
        }
    }

    /// Net live allocations (allocations minus releases).
    #[must_use]
    pub fn allocation_balance(&self) -> isize {
        self.alloc_count as isize - self.free_count as isize
    }
}

impl core::fmt::Display for HeapStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(f, "  Pool size: {}", format_bytes(self.pool_size))?;
        writeln!(
            f,
            "  In use: {} ({:.1}%)",
            format_bytes(self.used()),
            self.usage_percent()
        )?;
        writeln!(f, "  Peak in use: {}", format_bytes(self.max_used))?;
        writeln!(f, "  Allocations: {}", self.alloc_count)?;
        writeln!(f, "  Releases: {}", self.free_count)?;
        writeln!(f, "  Reallocations: {}", self.realloc_count)?;
        writeln!(f, "  Failed allocations: {}", self.failed_allocs)?;
        Ok(())
    }
}

/// Operation counters, updated outside the region lock.
#[derive(Debug, Default)]
pub(crate) struct HeapCounters {
    allocs: AtomicUsize,
    frees: AtomicUsize,
    reallocs: AtomicUsize,
    failures: AtomicUsize,
}

impl HeapCounters {
    pub(crate) const fn new() -> Self {
        Self {
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            reallocs: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_alloc(&self) {
        self.allocs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_realloc(&self) {
        self.reallocs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn allocs(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    pub(crate) fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }

    pub(crate) fn reallocs(&self) -> usize {
        self.reallocs.load(Ordering::Relaxed)
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}
