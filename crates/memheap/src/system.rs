//! System-level allocation façade over a set of registered heaps.
//!
//! Thin wrappers with a `malloc`-like shape: allocation walks the heaps of a
//! registry in registration order and takes the first success; release and
//! resize find the owning heap through the block header. A resize that its
//! own heap cannot satisfy moves the block to whichever heap has room. The
//! short-named functions operate on the process-wide registry; the `_in`
//! variants take an explicit one.

use core::ptr::{self, NonNull};

use crate::error::{HeapError, HeapResult};
use crate::heap::{BlockHeader, HeapShared, free_raw};
use crate::registry::{self, HeapRegistry};

/// Allocates `size` bytes from the first heap in `registry` that can
/// satisfy the request.
pub fn alloc_in(registry: &HeapRegistry, size: usize) -> HeapResult<NonNull<u8>> {
    let mut last_miss = None;
    for heap in registry.heaps() {
        match heap.alloc(size) {
            Ok(payload) => return Ok(payload),
            Err(err @ HeapError::SizeOverflow { .. }) => return Err(err),
            Err(err) => last_miss = Some(err),
        }
    }
    Err(last_miss.unwrap_or(HeapError::OutOfMemory {
        heap: "system".into(),
        requested: size,
        available: 0,
    }))
}

/// Allocates `size` bytes from the process-wide registry.
pub fn alloc(size: usize) -> HeapResult<NonNull<u8>> {
    alloc_in(registry::global(), size)
}

/// Allocates `size` zeroed bytes from `registry`.
pub fn alloc_zeroed_in(registry: &HeapRegistry, size: usize) -> HeapResult<NonNull<u8>> {
    let payload = alloc_in(registry, size)?;
    unsafe {
        ptr::write_bytes(payload.as_ptr(), 0, size);
    }
    Ok(payload)
}

/// Allocates `size` zeroed bytes from the process-wide registry.
pub fn alloc_zeroed(size: usize) -> HeapResult<NonNull<u8>> {
    alloc_zeroed_in(registry::global(), size)
}

/// Allocates zeroed storage for `count` objects of `size` bytes each from
/// `registry`.
pub fn calloc_in(registry: &HeapRegistry, count: usize, size: usize) -> HeapResult<NonNull<u8>> {
    let total = count.checked_mul(size).ok_or(HeapError::SizeOverflow {
        requested: usize::MAX,
    })?;
    alloc_zeroed_in(registry, total)
}

/// Allocates zeroed storage for `count` objects of `size` bytes each from
/// the process-wide registry.
pub fn calloc(count: usize, size: usize) -> HeapResult<NonNull<u8>> {
    calloc_in(registry::global(), count, size)
}

/// Resizes an allocation, preserving the first `min(old, new)` bytes. The
/// owning heap is derived from the block header; if that heap cannot grow
/// the block even by moving it, the block migrates to any heap in
/// `registry` with room. A null `ptr` allocates; `new_size == 0` releases
/// and reports exhaustion.
///
/// # Safety
/// `ptr` must be null or a live payload pointer obtained from a heap that
/// is still alive.
pub unsafe fn realloc_in(
    registry: &HeapRegistry,
    ptr: *mut u8,
    new_size: usize,
) -> HeapResult<NonNull<u8>> {
    if ptr.is_null() {
        return alloc_in(registry, new_size);
    }
    unsafe {
        let header = BlockHeader::from_payload(ptr);
        assert!(
            (*header).magic_ok() && (*header).is_used(),
            "pointer does not carry a live heap block header"
        );
        let shared = (*header).owner.cast::<HeapShared>();
        assert!(!shared.is_null(), "block is not attached to a heap");
        let shared = &*shared;

        match shared.realloc(ptr, new_size) {
            Ok(payload) => Ok(payload),
            Err(HeapError::OutOfMemory { .. }) if new_size > 0 => {
                // The owning heap is full; move the block to another one.
                let old_size = shared.payload_size(header);
                let dst = alloc_in(registry, new_size)?;
                ptr::copy_nonoverlapping(ptr, dst.as_ptr(), old_size.min(new_size));
                free_raw(ptr);
                Ok(dst)
            }
            Err(err) => Err(err),
        }
    }
}

/// [`realloc_in`] against the process-wide registry.
///
/// # Safety
/// Same requirements as [`realloc_in`].
pub unsafe fn realloc(ptr: *mut u8, new_size: usize) -> HeapResult<NonNull<u8>> {
    unsafe { realloc_in(registry::global(), ptr, new_size) }
}

/// Releases an allocation obtained from any heap. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live payload pointer from a heap that is still
/// alive, and must not be used afterwards.
pub unsafe fn free(ptr: *mut u8) {
    unsafe { free_raw(ptr) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{HeapConfig, MemHeap};

    fn pair(a: &str, a_size: usize, b: &str, b_size: usize) -> (HeapRegistry, MemHeap, MemHeap) {
        let registry = HeapRegistry::new();
        let first = MemHeap::with_config(a, a_size, HeapConfig::production()).unwrap();
        let second = MemHeap::with_config(b, b_size, HeapConfig::production()).unwrap();
        registry.register(&first);
        registry.register(&second);
        (registry, first, second)
    }

    #[test]
    fn allocation_spills_to_the_next_heap() {
        let (registry, first, second) = pair("system-spill-a", 2048, "system-spill-b", 64 * 1024);

        // Too big for the first heap, fits the second.
        let ptr = alloc_in(&registry, 8 * 1024).unwrap();
        let err = first.alloc(8 * 1024).unwrap_err();
        assert!(err.is_out_of_memory());

        unsafe { free(ptr.as_ptr()) };
        second.check().unwrap();
        first.detach();
        second.detach();
    }

    #[test]
    fn exhausted_registry_reports_out_of_memory() {
        let registry = HeapRegistry::new();
        let err = alloc_in(&registry, 64).unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn calloc_zeroes_and_checks_overflow() {
        let registry = HeapRegistry::new();
        let heap = MemHeap::with_config("system-calloc", 16 * 1024, HeapConfig::debug()).unwrap();
        registry.register(&heap);

        let ptr = calloc_in(&registry, 16, 32).unwrap();
        unsafe {
            for offset in 0..16 * 32 {
                assert_eq!(ptr.as_ptr().add(offset).read(), 0);
            }
            free(ptr.as_ptr());
        }

        let err = calloc_in(&registry, usize::MAX, 2).unwrap_err();
        assert!(matches!(err, HeapError::SizeOverflow { .. }));
        heap.detach();
    }

    #[test]
    fn realloc_migrates_between_heaps() {
        let (registry, small, large) =
            pair("system-migrate-a", 2048, "system-migrate-b", 64 * 1024);

        // Nearly fill the small heap so in-heap growth is impossible.
        let ptr = small.alloc(512).unwrap();
        let blocker = small.alloc(small.available().saturating_sub(256)).unwrap();

        unsafe {
            for offset in 0..512 {
                ptr.as_ptr().add(offset).write((offset % 251) as u8);
            }
            let grown = realloc_in(&registry, ptr.as_ptr(), 4 * 1024).unwrap();
            for offset in 0..512 {
                assert_eq!(grown.as_ptr().add(offset).read(), (offset % 251) as u8);
            }

            free(grown.as_ptr());
            free(blocker.as_ptr());
        }
        small.check().unwrap();
        large.check().unwrap();
        small.detach();
        large.detach();
    }
}
