//! Entity selection by component set.
//!
//! An [`EntityQuery`] names a tuple of required component types. Each
//! observation (`for_each`, `map`, `filter`, `iter`, ...) first revalidates
//! the cached entity list: the structural version of every involved store is
//! compared with the versions captured at the last evaluation, and the list
//! is recomputed if anything changed. Observers therefore always see the
//! registry as it is at the time of the call, never a stale snapshot.
//!
//! Matching entities are reported in ascending entity-index order.

use std::marker::PhantomData;

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// A tuple of component types that a query requires: `(A,)`, `(A, B)`, ...
pub trait ComponentSet: 'static {
    /// Per-entity borrowed output: `(&A, &B, ...)`.
    type Item<'r>;

    /// Component type ids in tuple order; `None` for a type the registry has
    /// never seen.
    fn type_ids(registry: &Registry) -> Vec<Option<ComponentTypeId>>;

    /// Borrow every component of `entity`, or `None` if any is missing.
    fn fetch(registry: &Registry, entity: Entity) -> Option<Self::Item<'_>>;
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            type Item<'r> = ($(&'r $name,)+);

            fn type_ids(registry: &Registry) -> Vec<Option<ComponentTypeId>> {
                let components = registry.component_registry();
                vec![$(components.lookup::<$name>()),+]
            }

            fn fetch(registry: &Registry, entity: Entity) -> Option<Self::Item<'_>> {
                Some(($(registry.get_component::<$name>(entity)?,)+))
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);

/// Entities holding every listed component type, ascending by index.
///
/// Returns an empty list if any type has no store yet.
fn collect_matching(registry: &Registry, ids: &[Option<ComponentTypeId>]) -> Vec<Entity> {
    let mut stores = Vec::with_capacity(ids.len());
    for id in ids {
        match id.and_then(|id| registry.erased_store(id)) {
            Some(store) => stores.push(store),
            None => return Vec::new(),
        }
    }
    let Some(smallest) = stores.iter().min_by_key(|s| s.len()) else {
        return Vec::new();
    };
    let mut matched: Vec<Entity> = smallest
        .entities()
        .iter()
        .copied()
        .filter(|&e| stores.iter().all(|s| s.contains(e)))
        .collect();
    matched.sort_unstable_by_key(|e| e.index());
    matched
}

// ---------------------------------------------------------------------------
// EntityQuery
// ---------------------------------------------------------------------------

/// Cached selection of the entities holding every component type in `Q`.
///
/// Created by [`Registry::selection`]. A query belongs to the registry that
/// created it; observing it through a different registry recomputes from
/// scratch every time.
pub struct EntityQuery<Q: ComponentSet> {
    registry_id: u64,
    cached: Vec<Entity>,
    /// Store versions captured at the last evaluation (`None` = no store).
    versions: Vec<Option<u64>>,
    evaluated: bool,
    evaluations: usize,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: ComponentSet> std::fmt::Debug for EntityQuery<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityQuery")
            .field("query", &std::any::type_name::<Q>())
            .field("cached", &self.cached.len())
            .field("evaluations", &self.evaluations)
            .finish()
    }
}

impl<Q: ComponentSet> EntityQuery<Q> {
    pub(crate) fn new(registry_id: u64) -> Self {
        Self {
            registry_id,
            cached: Vec::new(),
            versions: Vec::new(),
            evaluated: false,
            evaluations: 0,
            _marker: PhantomData,
        }
    }

    /// Recompute the cached list if any involved store changed since the
    /// last evaluation.
    fn refresh(&mut self, registry: &Registry) {
        let ids = Q::type_ids(registry);
        let versions: Vec<Option<u64>> = ids
            .iter()
            .map(|id| id.and_then(|id| registry.erased_store(id)).map(|s| s.version()))
            .collect();

        let same_registry = registry.id() == self.registry_id;
        if self.evaluated && same_registry && versions == self.versions {
            return;
        }

        self.cached = collect_matching(registry, &ids);
        self.versions = versions;
        self.evaluated = same_registry;
        self.evaluations += 1;
    }

    /// The matching entities as of now.
    pub fn entities(&mut self, registry: &Registry) -> &[Entity] {
        self.refresh(registry);
        &self.cached
    }

    /// Call `f` for every matching entity.
    pub fn for_each(&mut self, registry: &Registry, mut f: impl FnMut(Entity)) {
        self.refresh(registry);
        self.cached.iter().copied().for_each(&mut f);
    }

    /// Call `f` for every matching entity with mutable registry access.
    ///
    /// The entity list is captured before the first call. An entity destroyed
    /// or stripped of a required component by an earlier callback is skipped.
    pub fn for_each_mut(
        &mut self,
        registry: &mut Registry,
        mut f: impl FnMut(&mut Registry, Entity),
    ) {
        self.refresh(registry);
        let snapshot = self.cached.clone();
        for entity in snapshot {
            if Q::fetch(registry, entity).is_some() {
                f(registry, entity);
            }
        }
    }

    /// Map every matching entity through `f`.
    pub fn map<R>(&mut self, registry: &Registry, f: impl FnMut(Entity) -> R) -> Vec<R> {
        self.refresh(registry);
        self.cached.iter().copied().map(f).collect()
    }

    /// Matching entities that also satisfy `pred`.
    pub fn filter(
        &mut self,
        registry: &Registry,
        mut pred: impl FnMut(Entity) -> bool,
    ) -> Vec<Entity> {
        self.refresh(registry);
        self.cached.iter().copied().filter(|&e| pred(e)).collect()
    }

    /// Number of matching entities.
    pub fn count(&mut self, registry: &Registry) -> usize {
        self.refresh(registry);
        self.cached.len()
    }

    /// Whether `entity` currently matches.
    pub fn contains(&mut self, registry: &Registry, entity: Entity) -> bool {
        self.refresh(registry);
        self.cached
            .binary_search_by_key(&entity.index(), |e| e.index())
            .is_ok_and(|i| self.cached[i] == entity)
    }

    /// Iterate `(entity, (&A, &B, ...))` for every matching entity.
    pub fn iter<'q, 'r>(&'q mut self, registry: &'r Registry) -> QueryIter<'q, 'r, Q> {
        self.refresh(registry);
        QueryIter {
            entities: self.cached.iter(),
            registry,
            _marker: PhantomData,
        }
    }

    /// How many times the entity list has been (re)computed.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }
}

// ---------------------------------------------------------------------------
// QueryIter
// ---------------------------------------------------------------------------

/// Iterator over `(Entity, Q::Item)` produced by [`EntityQuery::iter`].
pub struct QueryIter<'q, 'r, Q: ComponentSet> {
    entities: std::slice::Iter<'q, Entity>,
    registry: &'r Registry,
    _marker: PhantomData<fn() -> Q>,
}

impl<'q, 'r, Q: ComponentSet> Iterator for QueryIter<'q, 'r, Q> {
    type Item = (Entity, Q::Item<'r>);

    fn next(&mut self) -> Option<Self::Item> {
        for &entity in self.entities.by_ref() {
            if let Some(item) = Q::fetch(self.registry, entity) {
                return Some((entity, item));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entities.len()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
