//! The [`Registry`] is the top-level container for entity/component data. It
//! owns the entity allocator, the component type registry, and one
//! [`ComponentStore`] per component type seen so far.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::Entity;
use crate::handle::HandleAllocator;
use crate::query::{ComponentSet, EntityQuery};
use crate::store::{ComponentStore, ErasedStore};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// A set of components attached together when an entity is spawned.
///
/// Implemented for `()` and tuples of up to eight components. If a tuple
/// names the same type twice, the later value wins.
pub trait Bundle {
    /// Attach every component in the bundle to `entity`.
    fn insert_into(self, registry: &mut Registry, entity: Entity);
}

impl Bundle for () {
    fn insert_into(self, _registry: &mut Registry, _entity: Entity) {}
}

macro_rules! impl_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn insert_into(self, registry: &mut Registry, entity: Entity) {
                let ($($name,)+) = self;
                $( registry.add_component(entity, $name); )+
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Entity/component container.
///
/// Every operation on an unknown or destroyed [`Entity`] is a no-op or
/// returns absence; nothing here panics on bad handles. The registry is a
/// plain single-owner value with no internal locking.
pub struct Registry {
    /// Process-unique id, used by [`EntityQuery`] to detect a foreign registry.
    id: u64,
    /// Entity handle allocator.
    allocator: HandleAllocator,
    /// Component type registry.
    components: ComponentRegistry,
    /// One store per component type, indexed by `ComponentTypeId`.
    stores: Vec<Box<dyn ErasedStore>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entity_count", &self.entity_count())
            .field("store_count", &self.stores.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            allocator: HandleAllocator::new(),
            components: ComponentRegistry::new(),
            stores: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Read-only access to the component type registry.
    pub fn component_registry(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Register a component type under a human-readable name and create its
    /// store eagerly. Registration is otherwise implicit on first insert.
    pub fn register_component<T: Component>(&mut self, name: &str) -> ComponentTypeId {
        let id = self.components.register::<T>(name);
        if id.index() == self.stores.len() {
            self.stores.push(Box::new(ComponentStore::<T>::new()));
        }
        id
    }

    // -- store access -------------------------------------------------------

    /// The typed store for `T`, if any entity has ever received a `T`.
    pub fn store<T: Component>(&self) -> Option<&ComponentStore<T>> {
        let id = self.components.lookup::<T>()?;
        self.stores[id.index()]
            .as_any()
            .downcast_ref::<ComponentStore<T>>()
    }

    fn store_mut<T: Component>(&mut self) -> Option<&mut ComponentStore<T>> {
        let id = self.components.lookup::<T>()?;
        self.stores[id.index()]
            .as_any_mut()
            .downcast_mut::<ComponentStore<T>>()
    }

    fn store_or_create<T: Component>(&mut self) -> &mut ComponentStore<T> {
        let id = self.register_component::<T>(std::any::type_name::<T>());
        let store = self.stores[id.index()]
            .as_any_mut()
            .downcast_mut::<ComponentStore<T>>();
        match store {
            Some(store) => store,
            None => unreachable!("store type always matches its registered component type"),
        }
    }

    pub(crate) fn erased_store(&self, id: ComponentTypeId) -> Option<&dyn ErasedStore> {
        self.stores.get(id.index()).map(|s| s.as_ref())
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Allocate a fresh entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        Entity::from_handle(self.allocator.allocate())
    }

    /// Allocate a fresh entity and attach every component in `bundle`.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.create_entity();
        bundle.insert_into(self, entity);
        entity
    }

    /// Destroy an entity, removing it from every store.
    ///
    /// Returns `false` (and does nothing) if the entity was already dead or
    /// never existed.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.allocator.release(entity.handle()) {
            return false;
        }
        let mut removed = 0usize;
        for store in &mut self.stores {
            if store.remove_entity(entity) {
                removed += 1;
            }
        }
        tracing::trace!(%entity, components = removed, "destroyed entity");
        true
    }

    /// Whether `entity` is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity.handle())
    }

    /// Total number of alive entities.
    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Iterate every alive entity in ascending index order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.allocator.iter_alive().map(Entity::from_handle)
    }

    /// Remove all entities and component data.
    ///
    /// Stores are emptied but kept, so component type ids stay valid.
    /// Entity handles issued before the clear are released and will never
    /// be issued again.
    pub fn clear(&mut self) {
        let live: Vec<Entity> = self.entities().collect();
        for entity in &live {
            self.allocator.release(entity.handle());
        }
        for store in &mut self.stores {
            store.clear();
        }
        tracing::trace!(entities = live.len(), stores = self.stores.len(), "cleared registry");
    }

    // -- component access ---------------------------------------------------

    /// Attach `value` to `entity`, overwriting any existing `T`, and return
    /// the stored value.
    ///
    /// Returns `None` (and stores nothing) if `entity` is not alive.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        Some(self.store_or_create::<T>().insert(entity, value))
    }

    /// Get an immutable reference to a component on an entity.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.store::<T>()?.get(entity)
    }

    /// Get a mutable reference to a component on an entity.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.store_mut::<T>()?.get_mut(entity)
    }

    /// Detach and return the `T` component of `entity`, if present.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.store_mut::<T>()?.remove(entity)
    }

    /// Check whether an entity has a given component type.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.store::<T>().is_some_and(|s| s.contains(entity))
    }

    /// Number of entities holding a `T` component.
    pub fn component_count<T: Component>(&self) -> usize {
        self.store::<T>().map_or(0, |s| s.len())
    }

    // -- queries ------------------------------------------------------------

    /// Build a query over the live entities holding every component type in
    /// `Q` (a tuple of one to four types).
    ///
    /// The query is evaluated lazily against the registry passed to each of
    /// its observation methods.
    pub fn selection<Q: ComponentSet>(&self) -> EntityQuery<Q> {
        EntityQuery::new(self.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
