//! Per-type component storage.
//!
//! A [`ComponentStore<T>`] is a sparse set: a sparse array indexed by entity
//! index points into dense, tightly packed `entities` / `values` columns.
//! Lookups are O(1) and iteration touches only occupied slots. Removal uses
//! swap-remove, so dense order is not insertion order.
//!
//! The registry keeps stores behind the object-safe [`ErasedStore`] trait and
//! downcasts to the concrete `ComponentStore<T>` at the typed accessor
//! boundary.

use std::any::Any;

use crate::component::Component;
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// Sparse-set table mapping [`Entity`] to a component value of type `T`.
#[derive(Debug)]
pub struct ComponentStore<T> {
    /// Entity index -> dense slot.
    sparse: Vec<Option<u32>>,
    /// Dense column of owning entities, parallel to `values`.
    entities: Vec<Entity>,
    /// Dense column of component values.
    values: Vec<T>,
    /// Bumped on every insert, overwrite, removal and clear.
    version: u64,
}

impl<T> Default for ComponentStore<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            entities: Vec::new(),
            values: Vec::new(),
            version: 0,
        }
    }
}

impl<T: Component> ComponentStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, entity: Entity) -> Option<usize> {
        let slot = (*self.sparse.get(entity.index() as usize)?)? as usize;
        (self.entities[slot] == entity).then_some(slot)
    }

    /// Insert or overwrite the value for `entity`, returning the stored value.
    pub fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        self.version += 1;
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }
        match self.sparse[idx] {
            Some(slot) => {
                let slot = slot as usize;
                // An older generation at this index is replaced wholesale.
                self.entities[slot] = entity;
                self.values[slot] = value;
                &mut self.values[slot]
            }
            None => {
                let slot = self.values.len();
                self.sparse[idx] = Some(slot as u32);
                self.entities.push(entity);
                self.values.push(value);
                &mut self.values[slot]
            }
        }
    }

    /// Get the value for `entity`, if present.
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slot(entity).map(|slot| &self.values[slot])
    }

    /// Get a mutable reference to the value for `entity`, if present.
    ///
    /// In-place mutation is not a structural change and does not bump the
    /// store version.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slot(entity)?;
        Some(&mut self.values[slot])
    }

    /// Remove and return the value for `entity`, if present.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.slot(entity)?;
        self.version += 1;
        self.sparse[entity.index() as usize] = None;
        self.entities.swap_remove(slot);
        let value = self.values.swap_remove(slot);
        if let Some(moved) = self.entities.get(slot) {
            self.sparse[moved.index() as usize] = Some(slot as u32);
        }
        Some(value)
    }

    /// Whether `entity` has a value in this store.
    pub fn contains(&self, entity: Entity) -> bool {
        self.slot(entity).is_some()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entities with a value in this store, in dense order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Iterate `(entity, value)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.values.iter())
    }

    /// Drop every value while keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.version += 1;
        self.sparse.clear();
        self.entities.clear();
        self.values.clear();
    }

    /// Structural version counter.
    pub fn version(&self) -> u64 {
        self.version
    }
}

// ---------------------------------------------------------------------------
// ErasedStore
// ---------------------------------------------------------------------------

/// Object-safe view of a [`ComponentStore<T>`] with the value type erased.
pub trait ErasedStore: Any {
    /// Remove the entry for `entity`, dropping its value. Returns whether an
    /// entry existed.
    fn remove_entity(&mut self, entity: Entity) -> bool;
    /// Whether `entity` has an entry.
    fn contains(&self, entity: Entity) -> bool;
    /// Drop every entry.
    fn clear(&mut self);
    /// Number of entries.
    fn len(&self) -> usize;
    /// Whether there are no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Entities with an entry, in dense order.
    fn entities(&self) -> &[Entity];
    /// Structural version counter.
    fn version(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStore for ComponentStore<T> {
    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn contains(&self, entity: Entity) -> bool {
        ComponentStore::contains(self, entity)
    }

    fn clear(&mut self) {
        ComponentStore::clear(self);
    }

    fn len(&self) -> usize {
        ComponentStore::len(self)
    }

    fn entities(&self) -> &[Entity] {
        ComponentStore::entities(self)
    }

    fn version(&self) -> u64 {
        ComponentStore::version(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Joint(u32);

    #[test]
    fn insert_get_overwrite() {
        let mut store = ComponentStore::new();
        let e = Entity::new(3, 0);
        store.insert(e, Joint(1));
        assert_eq!(store.get(e), Some(&Joint(1)));
        *store.insert(e, Joint(2)) = Joint(5);
        assert_eq!(store.get(e), Some(&Joint(5)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_swaps_last_into_hole() {
        let mut store = ComponentStore::new();
        let a = Entity::new(0, 0);
        let b = Entity::new(1, 0);
        let c = Entity::new(2, 0);
        store.insert(a, Joint(10));
        store.insert(b, Joint(11));
        store.insert(c, Joint(12));

        assert_eq!(store.remove(a), Some(Joint(10)));
        assert_eq!(store.get(c), Some(&Joint(12)));
        assert_eq!(store.get(b), Some(&Joint(11)));
        assert!(!store.contains(a));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn stale_generation_is_absent() {
        let mut store = ComponentStore::new();
        let old = Entity::new(4, 0);
        store.insert(old, Joint(1));
        let newer = Entity::new(4, 1);
        assert!(store.get(newer).is_none());
        assert!(store.remove(newer).is_none());
        store.insert(newer, Joint(2));
        assert!(store.get(old).is_none());
        assert_eq!(store.get(newer), Some(&Joint(2)));
    }

    #[test]
    fn version_tracks_structural_changes_only() {
        let mut store = ComponentStore::new();
        let e = Entity::new(0, 0);
        let v0 = store.version();
        store.insert(e, Joint(1));
        let v1 = store.version();
        assert!(v1 > v0);
        if let Some(j) = store.get_mut(e) {
            j.0 = 9;
        }
        assert_eq!(store.version(), v1);
        store.clear();
        assert!(store.version() > v1);
        assert!(store.is_empty());
    }

    #[test]
    fn erased_downcast_roundtrip() {
        let mut boxed: Box<dyn ErasedStore> = Box::new(ComponentStore::<Joint>::new());
        let e = Entity::new(0, 0);
        boxed
            .as_any_mut()
            .downcast_mut::<ComponentStore<Joint>>()
            .unwrap()
            .insert(e, Joint(7));
        assert!(boxed.contains(e));
        assert!(boxed.as_any().downcast_ref::<ComponentStore<u8>>().is_none());
        assert!(boxed.remove_entity(e));
        assert!(boxed.is_empty());
    }
}
