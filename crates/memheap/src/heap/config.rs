//! Construction-time configuration for a heap.

/// Configuration for a bounded-region heap.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Enable operation counters (allocations, releases, failures). The
    /// accounting fields `available` and `max_used` are always exact
    /// regardless of this flag.
    pub track_stats: bool,

    /// Byte pattern written over a payload when it is handed out.
    pub alloc_pattern: Option<u8>,

    /// Byte pattern written over a payload when it is released.
    pub dealloc_pattern: Option<u8>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xBB) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDD) } else { None },
        }
    }
}

impl HeapConfig {
    /// Production configuration: no counters, no fill patterns.
    pub fn production() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration: counters on, payloads poisoned on both
    /// transitions so use-after-free and uninitialised reads show up as
    /// recognizable garbage.
    pub fn debug() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
        }
    }
}
