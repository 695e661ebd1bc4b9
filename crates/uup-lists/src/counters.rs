//! Process-wide counters incremented by the list machinery.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for object-hash behavior.
///
/// One instance is created by the process owner and shared (via `Arc`) by
/// every [`crate::ObjectHash`]; collectors read the totals.
#[derive(Debug, Default)]
pub struct UupCounters {
    object_hash_hit: AtomicU64,
    object_hash_miss: AtomicU64,
    object_hash_overflows: AtomicU64,
}

impl UupCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) {
        self.object_hash_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.object_hash_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overflow(&self) {
        self.object_hash_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.object_hash_hit.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.object_hash_miss.load(Ordering::Relaxed)
    }

    pub fn overflows(&self) -> u64 {
        self.object_hash_overflows.load(Ordering::Relaxed)
    }
}
