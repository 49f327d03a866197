//! Generational handle allocation.
//!
//! A [`RawHandle`] is a 64-bit value that packs a *generation* counter in the
//! high 32 bits and an *index* in the low 32 bits. The generation is bumped
//! every time an index is recycled, so a handle that has been released never
//! compares equal to any handle issued afterwards.
//!
//! The same allocator backs entity identifiers in the [`Registry`](crate::registry::Registry)
//! and GPU resource handles in the render crate.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// RawHandle
// ---------------------------------------------------------------------------

/// A generational identifier.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawHandle(u64);

impl RawHandle {
    /// Construct a handle from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// HandleAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`RawHandle`]s with generational tracking.
///
/// Free indices are kept in a FIFO queue so that generations are spread out
/// over time rather than concentrated on a hot index. An index whose
/// generation has reached `u32::MAX` is retired instead of recycled, so no
/// handle value is ever issued twice.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    /// Current generation for each index slot.
    generations: Vec<u32>,
    /// Whether the slot is currently alive.
    alive: Vec<bool>,
    /// Free-list of recyclable indices (FIFO queue).
    free_indices: VecDeque<u32>,
    /// Number of currently alive handles.
    alive_count: usize,
}

impl HandleAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh [`RawHandle`].
    ///
    /// If a recycled index is available it will be reused with the generation
    /// that was bumped on release; otherwise a brand-new index is created.
    pub fn allocate(&mut self) -> RawHandle {
        self.alive_count += 1;
        if let Some(index) = self.free_indices.pop_front() {
            self.alive[index as usize] = true;
            RawHandle::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            self.alive.push(true);
            RawHandle::new(index, 0)
        }
    }

    /// Release a handle, incrementing the generation for its index so that
    /// any outstanding copies become stale.
    ///
    /// Returns `true` if the handle was alive and is now released, `false`
    /// if it was already dead, stale, or never allocated.
    pub fn release(&mut self, handle: RawHandle) -> bool {
        if !self.is_alive(handle) {
            return false;
        }
        let idx = handle.index() as usize;
        self.alive[idx] = false;
        self.alive_count -= 1;
        // An index with no generations left is retired, never recycled.
        if let Some(next) = self.generations[idx].checked_add(1) {
            self.generations[idx] = next;
            self.free_indices.push_back(handle.index());
        }
        true
    }

    /// Returns `true` if `handle` refers to a currently alive slot whose
    /// generation matches.
    pub fn is_alive(&self, handle: RawHandle) -> bool {
        let idx = handle.index() as usize;
        idx < self.generations.len()
            && self.alive[idx]
            && self.generations[idx] == handle.generation()
    }

    /// Total number of currently alive handles.
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Iterate every alive handle in ascending index order.
    pub fn iter_alive(&self) -> impl Iterator<Item = RawHandle> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(idx, _)| RawHandle::new(idx as u32, self.generations[idx]))
    }

    #[cfg(test)]
    fn force_generation(&mut self, index: u32, generation: u32) {
        self.generations[index as usize] = generation;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_unique_handles() {
        let mut alloc = HandleAllocator::new();
        let handles: Vec<RawHandle> = (0..100).map(|_| alloc.allocate()).collect();
        let mut indices: Vec<u32> = handles.iter().map(|h| h.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 100);
    }

    #[test]
    fn generation_increments_on_recycle() {
        let mut alloc = HandleAllocator::new();
        let h0 = alloc.allocate();
        assert_eq!(h0.generation(), 0);
        assert!(alloc.release(h0));
        let h1 = alloc.allocate();
        assert_eq!(h1.index(), h0.index());
        assert_eq!(h1.generation(), 1);
        assert_ne!(h0, h1);
    }

    #[test]
    fn stale_handle_detection() {
        let mut alloc = HandleAllocator::new();
        let h0 = alloc.allocate();
        assert!(alloc.is_alive(h0));
        assert!(alloc.release(h0));
        assert!(!alloc.is_alive(h0));
        let _h1 = alloc.allocate();
        assert!(!alloc.is_alive(h0), "stale handle still not alive after recycle");
    }

    #[test]
    fn double_release_returns_false() {
        let mut alloc = HandleAllocator::new();
        let h = alloc.allocate();
        assert!(alloc.release(h));
        assert!(!alloc.release(h));
        assert!(!alloc.release(RawHandle::new(999, 0)));
    }

    #[test]
    fn alive_count_tracks_correctly() {
        let mut alloc = HandleAllocator::new();
        let h0 = alloc.allocate();
        let _h1 = alloc.allocate();
        assert_eq!(alloc.alive_count(), 2);
        alloc.release(h0);
        assert_eq!(alloc.alive_count(), 1);
        assert_eq!(alloc.iter_alive().count(), 1);
    }

    #[test]
    fn exhausted_generation_retires_index() {
        let mut alloc = HandleAllocator::new();
        let h = alloc.allocate();
        alloc.force_generation(h.index(), u32::MAX);
        let last = RawHandle::new(h.index(), u32::MAX);
        assert!(alloc.release(last));
        let next = alloc.allocate();
        assert_ne!(next.index(), h.index(), "retired index must not be reissued");
    }

    #[test]
    fn raw_roundtrip() {
        let h = RawHandle::new(42, 7);
        assert_eq!(h.index(), 42);
        assert_eq!(h.generation(), 7);
        assert_eq!(RawHandle::from_raw(h.to_raw()), h);
    }
}
