//! The generic segmented-conf framework.
//!
//! Every segmented module (application, lists, the prefs-org family) is a
//! sorted array of per-org segments, each independently reference counted
//! via `Arc`. The update protocol never mutates a published collection:
//! the loader clones the pointer array, splices changed segments in and
//! vanished ones out, and publishes the result.

use std::sync::Arc;

/// Capacity is rounded up to this to cheapen later insertions.
const SLOT_QUANTUM: usize = 10;

#[derive(Clone, Debug)]
pub struct SegmentInfo {
    /// Segment id (org id, or app id for application segments).
    pub id: u32,
    /// Last modification time of the backing file (seconds).
    pub mtime: i64,
    /// Approximate bytes of loaded data.
    pub alloc: u64,
    /// The file was present but failed to parse; a placeholder keeps the
    /// failure observable without taking the whole module down.
    pub failed_load: bool,
    /// Content digest of the backing file; reloads skip unchanged ones.
    pub digest: [u8; 16],
}

impl SegmentInfo {
    pub fn new(id: u32, mtime: i64, alloc: u64, digest: [u8; 16]) -> Self {
        Self { id, mtime, alloc, failed_load: false, digest }
    }

    pub fn failed(id: u32, mtime: i64, digest: [u8; 16]) -> Self {
        Self { id, mtime, alloc: 0, failed_load: true, digest }
    }
}

pub trait SegmentData: Send + Sync {
    fn info(&self) -> &SegmentInfo;

    /// An empty segment loaded successfully but holds nothing.
    fn is_empty(&self) -> bool {
        false
    }
}

/// A sorted, copy-on-update collection of per-org segments.
pub struct Segmented<S> {
    mtime: i64,
    slots: Vec<Arc<S>>,
}

impl<S: SegmentData> Segmented<S> {
    pub fn new() -> Self {
        Self { mtime: 0, slots: Vec::new() }
    }

    /// Clone for an update pass: the segment pointers are shared, the
    /// array is fresh with room to grow.
    pub fn clone_for_update(&self) -> Self {
        let mut slots = Vec::with_capacity(self.slots.len().next_multiple_of(SLOT_QUANTUM));
        slots.extend(self.slots.iter().map(Arc::clone));

        Self { mtime: self.mtime, slots }
    }

    /// Lower bound of `id` in the sorted slot array.
    pub fn slot_of(&self, id: u32) -> usize {
        self.slots.partition_point(|s| s.info().id < id)
    }

    pub fn find(&self, id: u32) -> Option<&Arc<S>> {
        let slot = self.slot_of(id);
        self.slots.get(slot).filter(|s| s.info().id == id)
    }

    /// Insert or replace, preserving sort order.
    pub fn use_segment(&mut self, segment: Arc<S>) {
        let info = segment.info();
        self.mtime = self.mtime.max(info.mtime);

        let slot = self.slot_of(info.id);

        match self.slots.get(slot) {
            Some(existing) if existing.info().id == info.id => self.slots[slot] = segment,
            _ => self.slots.insert(slot, segment),
        }
    }

    /// Drop the segment for `id`, shifting the array down.
    pub fn free_slot(&mut self, id: u32) -> bool {
        let slot = self.slot_of(id);

        if self.slots.get(slot).is_some_and(|s| s.info().id == id) {
            self.slots.remove(slot);
            return true;
        }

        false
    }

    /// Drop every segment whose id fails the predicate.
    pub fn retain(&mut self, keep: impl Fn(u32) -> bool) {
        self.slots.retain(|s| keep(s.info().id));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<S>> {
        self.slots.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<S>> {
        self.slots.iter()
    }

    /// Newest segment mtime seen by this collection.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    /// Total loaded bytes across live segments.
    pub fn alloc(&self) -> u64 {
        self.slots.iter().map(|s| s.info().alloc).sum()
    }
}

impl<S: SegmentData> Default for Segmented<S> {
    fn default() -> Self {
        Self::new()
    }
}
