//! Poser ECS -- sparse-set entity/component registry with generational handles.
//!
//! Components of any `'static` type are attached to opaque [`Entity`]
//! handles. Each component type lives in its own sparse-set
//! [`ComponentStore`](store::ComponentStore), created the first time the type
//! is seen. Lookups on unknown or destroyed entities return absence rather
//! than errors.
//!
//! # Quick Start
//!
//! ```
//! use poser_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Joint { angle: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Tracked;
//!
//! let mut registry = Registry::new();
//! let elbow = registry.spawn((Joint { angle: 0.5 }, Tracked));
//! let _wrist = registry.spawn((Joint { angle: 0.1 },));
//!
//! let mut tracked = registry.selection::<(Joint, Tracked)>();
//! assert_eq!(tracked.entities(&registry), &[elbow]);
//!
//! registry.destroy_entity(elbow);
//! assert_eq!(tracked.count(&registry), 0);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod handle;
pub mod query;
pub mod registry;
pub mod store;

pub use entity::Entity;
pub use handle::{HandleAllocator, RawHandle};
pub use registry::Registry;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::Entity;
    pub use crate::handle::{HandleAllocator, RawHandle};
    pub use crate::query::{ComponentSet, EntityQuery, QueryIter};
    pub use crate::registry::{Bundle, Registry};
    pub use crate::store::{ComponentStore, ErasedStore};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
