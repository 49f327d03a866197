//! Entity identifiers.
//!
//! An [`Entity`] is a thin wrapper over a [`RawHandle`] issued by the
//! registry's [`HandleAllocator`](crate::handle::HandleAllocator). It names a
//! logical object and carries no data itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::handle::RawHandle;

/// A generational entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity(RawHandle);

impl Entity {
    /// Construct an `Entity` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self(RawHandle::new(index, generation))
    }

    #[inline]
    pub(crate) fn from_handle(handle: RawHandle) -> Self {
        Self(handle)
    }

    #[inline]
    pub(crate) fn handle(self) -> RawHandle {
        self.0
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0.index()
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        self.0.generation()
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0.to_raw()
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(RawHandle::from_raw(raw))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_roundtrip() {
        let e = Entity::new(42, 7);
        assert_eq!(e.index(), 42);
        assert_eq!(e.generation(), 7);
        assert_eq!(Entity::from_raw(e.to_raw()), e);
    }

    #[test]
    fn display_formats_index_and_generation() {
        assert_eq!(Entity::new(3, 1).to_string(), "3v1");
        assert_eq!(format!("{:?}", Entity::new(3, 1)), "Entity(3v1)");
    }

    #[test]
    fn serde_uses_raw_value() {
        let e = Entity::new(5, 2);
        let json = serde_json::to_string(&e).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
