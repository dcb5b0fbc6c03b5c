//! Public heap handle: lock discipline, statistics, registration.
//!
//! `MemHeap` is a cheap clone of a shared descriptor. One mutex per heap
//! serializes every mutation of the pool; operations on the same heap
//! linearize in lock-grant order and distinct heaps never contend. At most
//! one lock is held at a time: the reallocation move path drops the guard
//! before running its allocate/copy/release sequence, each of which
//! re-acquires on its own.

use core::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{HeapError, HeapResult};
use crate::heap::block::BlockHeader;
use crate::heap::config::HeapConfig;
use crate::heap::region::{HeapRegion, PoolStorage, ReallocOutcome, RegionError};
use crate::heap::stats::{HeapCounters, HeapStats};
use crate::registry;

/// A bounded-region heap. All bookkeeping lives inside the managed range;
/// the handle itself is a reference-counted pointer to the descriptor and
/// can be cloned and shared freely across threads.
#[derive(Clone)]
pub struct MemHeap {
    shared: Arc<HeapShared>,
}

/// Shared descriptor: name, counters, and the mutex-guarded region. Every
/// block header in the pool carries a back pointer to this structure, which
/// is how a bare payload pointer finds its heap again.
pub(crate) struct HeapShared {
    name: String,
    track_stats: bool,
    counters: HeapCounters,
    region: Mutex<HeapRegion>,
}

impl MemHeap {
    /// Creates a heap over a freshly allocated pool of `capacity` bytes and
    /// registers it in the process-wide registry.
    pub fn new(name: impl Into<String>, capacity: usize) -> HeapResult<Self> {
        Self::with_config(name, capacity, HeapConfig::default())
    }

    /// Like [`MemHeap::new`] with explicit configuration.
    pub fn with_config(
        name: impl Into<String>,
        capacity: usize,
        config: HeapConfig,
    ) -> HeapResult<Self> {
        let storage = PoolStorage::Owned(vec![0u8; capacity].into_boxed_slice());
        Self::build(name.into(), storage, config)
    }

    /// Creates a heap over a caller-provided memory range and registers it.
    /// The range is used as-is: the base is aligned up and the length
    /// rounded down to the allocation granularity, and nothing is freed when
    /// the heap goes away.
    ///
    /// # Safety
    /// The range `base..base + len` must be valid for reads and writes for
    /// the whole lifetime of the heap and must not be accessed by anything
    /// else while the heap is live.
    pub unsafe fn from_raw(
        name: impl Into<String>,
        base: NonNull<u8>,
        len: usize,
        config: HeapConfig,
    ) -> HeapResult<Self> {
        Self::build(name.into(), PoolStorage::Raw { base, len }, config)
    }

    fn build(name: String, storage: PoolStorage, config: HeapConfig) -> HeapResult<Self> {
        let track_stats = config.track_stats;
        let region = HeapRegion::new(storage, config)?;
        let shared = Arc::new(HeapShared {
            name,
            track_stats,
            counters: HeapCounters::new(),
            region: Mutex::new(region),
        });

        // The descriptor has its final address now; stamp it into the pool
        // so payload pointers can identify their heap.
        let owner = Arc::as_ptr(&shared).cast::<()>();
        unsafe { shared.region.lock().adopt(owner) };

        let heap = Self { shared };
        debug!(
            heap = %heap.name(),
            pool_size = heap.pool_size(),
            available = heap.available(),
            "memory heap initialised"
        );
        registry::global().register(&heap);
        Ok(heap)
    }

    /// Allocates `size` payload bytes. The returned pointer is aligned to
    /// [`crate::heap::ALIGN`] and stays valid until freed. Exhaustion is an
    /// `Err` with no side effects.
    pub fn alloc(&self, size: usize) -> HeapResult<NonNull<u8>> {
        self.shared.alloc(size)
    }

    /// Resizes the allocation at `ptr` to `new_size` payload bytes,
    /// preserving the first `min(old, new)` bytes. Growth prefers absorbing
    /// a free right neighbor in place; otherwise the block is moved. A null
    /// `ptr` behaves like [`MemHeap::alloc`]; `new_size == 0` releases the
    /// block and reports exhaustion, mirroring the usual `realloc` contract.
    /// On error the original allocation is untouched.
    ///
    /// # Safety
    /// `ptr` must be null or a live payload pointer obtained from this heap.
    pub unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> HeapResult<NonNull<u8>> {
        if !ptr.is_null() {
            unsafe { self.assert_owned(ptr) };
        }
        unsafe { self.shared.realloc(ptr, new_size) }
    }

    /// Releases the allocation at `ptr`. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a live payload pointer obtained from this heap,
    /// and must not be used afterwards.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        unsafe {
            self.assert_owned(ptr);
            self.shared.free_block(BlockHeader::from_payload(ptr));
        }
    }

    unsafe fn assert_owned(&self, ptr: *mut u8) {
        unsafe {
            let header = BlockHeader::from_payload(ptr);
            assert!(
                (*header).magic_ok(),
                "pointer does not carry a heap block header"
            );
            assert!(
                ptr::eq((*header).owner, Arc::as_ptr(&self.shared).cast()),
                "pointer was not allocated from heap `{}`",
                self.shared.name
            );
        }
    }

    /// Unregisters the heap from the process-wide registry. The pool
    /// contents are left untouched; the backing memory of an owned pool is
    /// released when the last clone of the handle drops.
    pub fn detach(self) {
        debug!(heap = %self.name(), "memory heap detached");
        registry::global().unregister(&self);
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Total managed bytes, headers included.
    pub fn pool_size(&self) -> usize {
        self.shared.region.lock().pool_size()
    }

    /// Free payload bytes currently available.
    pub fn available(&self) -> usize {
        self.shared.region.lock().available()
    }

    /// High-water mark of consumed bytes.
    pub fn max_used(&self) -> usize {
        self.shared.region.lock().max_used()
    }

    /// Accounting snapshot plus operation counters.
    pub fn stats(&self) -> HeapStats {
        let region = self.shared.region.lock();
        HeapStats {
            pool_size: region.pool_size(),
            available: region.available(),
            max_used: region.max_used(),
            alloc_count: self.shared.counters.allocs(),
            free_count: self.shared.counters.frees(),
            realloc_count: self.shared.counters.reallocs(),
            failed_allocs: self.shared.counters.failures(),
        }
    }

    /// Walks both bookkeeping lists and verifies every structural
    /// invariant. Intended for diagnostics and tests; takes the heap lock
    /// for the whole walk.
    pub fn check(&self) -> HeapResult<()> {
        self.shared
            .region
            .lock()
            .check()
            .map_err(|detail| HeapError::Corrupted {
                heap: self.shared.name.clone(),
                detail,
            })
    }

    /// Identity comparison: two handles for the same underlying heap.
    pub fn same_heap(&self, other: &MemHeap) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl core::fmt::Debug for MemHeap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemHeap")
            .field("name", &self.shared.name)
            .field("pool_size", &self.pool_size())
            .field("available", &self.available())
            .finish()
    }
}

impl HeapShared {
    pub(crate) fn alloc(&self, size: usize) -> HeapResult<NonNull<u8>> {
        let result = self.region.lock().allocate(size);
        match result {
            Ok(payload) => {
                if self.track_stats {
                    self.counters.record_alloc();
                }
                Ok(payload)
            }
            Err(err) => {
                if self.track_stats {
                    self.counters.record_failure();
                }
                Err(self.map_err(err))
            }
        }
    }

    pub(crate) unsafe fn free_block(&self, header: *mut BlockHeader) {
        unsafe {
            self.region.lock().release(header);
        }
        if self.track_stats {
            self.counters.record_free();
        }
    }

    pub(crate) unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> HeapResult<NonNull<u8>> {
        if ptr.is_null() {
            return self.alloc(new_size);
        }
        unsafe {
            let header = BlockHeader::from_payload(ptr);
            assert!(
                (*header).magic_ok() && (*header).is_used(),
                "reallocating a pointer that is not a live allocation"
            );

            if new_size == 0 {
                self.free_block(header);
                return Err(HeapError::OutOfMemory {
                    heap: self.name.clone(),
                    requested: 0,
                    available: self.region.lock().available(),
                });
            }

            let outcome = self
                .region
                .lock()
                .reallocate(header, new_size)
                .map_err(|err| self.map_err(err))?;
            if self.track_stats {
                self.counters.record_realloc();
            }

            match outcome {
                ReallocOutcome::InPlace => Ok(NonNull::new_unchecked(ptr)),
                ReallocOutcome::Moved { old_size } => {
                    trace!(
                        heap = %self.name,
                        old_size,
                        new_size,
                        "relocating block to satisfy growth"
                    );
                    // The lock is no longer held: allocate, copy, release
                    // each take it independently. On allocation failure the
                    // original block is still intact.
                    let dst = self.alloc(new_size)?;
                    ptr::copy_nonoverlapping(ptr, dst.as_ptr(), old_size);
                    self.free_block(header);
                    Ok(dst)
                }
            }
        }
    }

    pub(crate) unsafe fn payload_size(&self, header: *mut BlockHeader) -> usize {
        let _guard = self.region.lock();
        unsafe { BlockHeader::payload_size(header) }
    }

    fn map_err(&self, err: RegionError) -> HeapError {
        match err {
            RegionError::Exhausted {
                requested,
                available,
            } => HeapError::OutOfMemory {
                heap: self.name.clone(),
                requested,
                available,
            },
            RegionError::Overflow { requested } => HeapError::SizeOverflow { requested },
        }
    }
}

/// Releases an allocation through its header alone; the header's back
/// reference identifies the owning heap. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live payload pointer obtained from a heap that is
/// still alive, and must not be used afterwards.
pub unsafe fn free_raw(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        let header = BlockHeader::from_payload(ptr);
        assert!(
            (*header).magic_ok(),
            "pointer does not carry a heap block header"
        );
        assert!(
            (*header).is_used(),
            "releasing a block that is not a live allocation (double free?)"
        );
        let shared = (*header).owner.cast::<HeapShared>();
        assert!(!shared.is_null(), "block is not attached to a heap");
        (*shared).free_block(header);
    }
}

/// Usable payload capacity of a live allocation. At least as large as the
/// size requested, never smaller.
///
/// # Safety
/// `ptr` must be a live payload pointer obtained from a heap that is still
/// alive.
pub unsafe fn usable_size(ptr: *const u8) -> usize {
    unsafe {
        let header = BlockHeader::from_payload(ptr.cast_mut());
        assert!(
            (*header).magic_ok() && (*header).is_used(),
            "pointer does not carry a live heap block header"
        );
        let shared = (*header).owner.cast::<HeapShared>();
        assert!(!shared.is_null(), "block is not attached to a heap");
        (*shared).payload_size(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::block::{ALIGN, HEADER_SIZE, MIN_PAYLOAD};
    use crate::utils::align_up;

    fn heap(name: &str, capacity: usize) -> MemHeap {
        MemHeap::with_config(name, capacity, HeapConfig::debug()).unwrap()
    }

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemHeap>();
    }

    #[test]
    fn alloc_free_round_trip_restores_available() {
        let heap = heap("handle-round-trip", 8192);
        let initial = heap.available();

        let ptr = heap.alloc(100).unwrap();
        assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
        assert!(unsafe { usable_size(ptr.as_ptr()) } >= 100);

        unsafe { heap.free(ptr.as_ptr()) };
        assert_eq!(heap.available(), initial);
        heap.check().unwrap();
        heap.detach();
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let heap = heap("handle-null-free", 4096);
        unsafe {
            heap.free(ptr::null_mut());
            free_raw(ptr::null_mut());
        }
        heap.check().unwrap();
        heap.detach();
    }

    #[test]
    fn zero_sized_alloc_gets_minimum_payload() {
        let heap = heap("handle-zero-alloc", 4096);
        let ptr = heap.alloc(0).unwrap();
        assert_eq!(unsafe { usable_size(ptr.as_ptr()) }, MIN_PAYLOAD);
        unsafe { heap.free(ptr.as_ptr()) };
        heap.detach();
    }

    #[test]
    fn free_raw_finds_the_owning_heap() {
        let heap = heap("handle-free-raw", 4096);
        let initial = heap.available();
        let ptr = heap.alloc(64).unwrap();
        unsafe { free_raw(ptr.as_ptr()) };
        assert_eq!(heap.available(), initial);
        heap.detach();
    }

    #[test]
    fn realloc_preserves_payload_across_move() {
        let heap = heap("handle-realloc-move", 8192);
        let a = heap.alloc(64).unwrap();
        let b = heap.alloc(64).unwrap();

        unsafe {
            for offset in 0..64 {
                a.as_ptr().add(offset).write(offset as u8);
            }
            // The right neighbor is in use, so growth must relocate.
            let grown = heap.realloc(a.as_ptr(), 256).unwrap();
            assert_ne!(grown.as_ptr(), a.as_ptr());
            for offset in 0..64 {
                assert_eq!(grown.as_ptr().add(offset).read(), offset as u8);
            }
            heap.free(grown.as_ptr());
            heap.free(b.as_ptr());
        }
        heap.check().unwrap();
        heap.detach();
    }

    #[test]
    fn realloc_in_place_keeps_pointer_and_bytes() {
        let heap = heap("handle-realloc-in-place", 8192);
        let ptr = heap.alloc(64).unwrap();
        let before = heap.available();

        unsafe {
            for offset in 0..64 {
                ptr.as_ptr().add(offset).write(0x5A);
            }
            let grown = heap.realloc(ptr.as_ptr(), 128).unwrap();
            assert_eq!(grown.as_ptr(), ptr.as_ptr());
            assert_eq!(usable_size(grown.as_ptr()), align_up(128, ALIGN));
            for offset in 0..64 {
                assert_eq!(grown.as_ptr().add(offset).read(), 0x5A);
            }
        }
        assert_eq!(heap.available(), before - (128 - 64));
        heap.check().unwrap();
        heap.detach();
    }

    #[test]
    fn realloc_to_current_size_is_identity() {
        let heap = heap("handle-realloc-identity", 4096);
        let ptr = heap.alloc(96).unwrap();
        let before = heap.available();
        unsafe {
            let size = usable_size(ptr.as_ptr());
            let same = heap.realloc(ptr.as_ptr(), size).unwrap();
            assert_eq!(same.as_ptr(), ptr.as_ptr());
        }
        assert_eq!(heap.available(), before);
        heap.check().unwrap();
        heap.detach();
    }

    #[test]
    fn realloc_null_allocates() {
        let heap = heap("handle-realloc-null", 4096);
        let ptr = unsafe { heap.realloc(ptr::null_mut(), 64) }.unwrap();
        unsafe { heap.free(ptr.as_ptr()) };
        heap.detach();
    }

    #[test]
    fn realloc_to_zero_frees() {
        let heap = heap("handle-realloc-zero", 4096);
        let initial = heap.available();
        let ptr = heap.alloc(64).unwrap();
        let err = unsafe { heap.realloc(ptr.as_ptr(), 0) }.unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(heap.available(), initial);
        heap.check().unwrap();
        heap.detach();
    }

    #[test]
    fn exhaustion_is_an_error_without_side_effects() {
        let heap = heap("handle-exhaustion", 1024);
        let before = heap.available();
        let err = heap.alloc(1 << 20).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(err.is_recoverable());
        assert_eq!(heap.available(), before);

        let stats = heap.stats();
        assert_eq!(stats.failed_allocs, 1);
        assert_eq!(stats.alloc_count, 0);
        heap.detach();
    }

    #[test]
    fn stats_track_operations_and_high_water() {
        let heap = heap("handle-stats", 8192);
        let a = heap.alloc(128).unwrap();
        let b = heap.alloc(64).unwrap();
        let peak_used = heap.stats().used();

        unsafe {
            heap.free(b.as_ptr());
            heap.free(a.as_ptr());
        }

        let stats = heap.stats();
        assert_eq!(stats.alloc_count, 2);
        assert_eq!(stats.free_count, 2);
        assert_eq!(stats.used(), 2 * HEADER_SIZE);
        assert_eq!(stats.max_used, peak_used);
        heap.detach();
    }

    #[test]
    fn from_raw_manages_external_memory() {
        let mut backing = vec![0u8; 4096];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let heap = unsafe {
            MemHeap::from_raw("handle-from-raw", base, backing.len(), HeapConfig::production())
        }
        .unwrap();

        let ptr = heap.alloc(64).unwrap();
        let addr = ptr.as_ptr() as usize;
        assert!(addr >= backing.as_ptr() as usize);
        assert!(addr < backing.as_ptr() as usize + backing.len());

        unsafe { heap.free(ptr.as_ptr()) };
        heap.check().unwrap();
        heap.detach();
        drop(backing);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let heap = heap("handle-double-free", 4096);
        let ptr = heap.alloc(64).unwrap();
        unsafe {
            heap.free(ptr.as_ptr());
            free_raw(ptr.as_ptr());
        }
    }

    #[test]
    fn concurrent_alloc_free_keeps_accounting_exact() {
        use std::thread;

        let heap = heap("handle-threads", 256 * 1024);
        let initial = heap.available();

        let handles: Vec<_> = (0..4usize)
            .map(|thread_id| {
                let heap = heap.clone();
                thread::spawn(move || {
                    let mut live = Vec::new();
                    for round in 0..50u8 {
                        let size = 16 + (usize::from(round) * 7 + thread_id * 13) % 200;
                        if let Ok(ptr) = heap.alloc(size) {
                            unsafe {
                                ptr::write_bytes(ptr.as_ptr(), round, size);
                            }
                            live.push((ptr, size, round));
                        }
                        if round % 3 == 0 {
                            if let Some((ptr, size, fill)) = live.pop() {
                                unsafe {
                                    for offset in 0..size {
                                        assert_eq!(ptr.as_ptr().add(offset).read(), fill);
                                    }
                                    heap.free(ptr.as_ptr());
                                }
                            }
                        }
                    }
                    for (ptr, _, _) in live {
                        unsafe { heap.free(ptr.as_ptr()) };
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(heap.available(), initial);
        heap.check().unwrap();
        heap.detach();
    }
}
