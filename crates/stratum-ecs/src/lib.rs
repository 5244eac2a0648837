//! Stratum ECS -- an in-memory archetype entity store.
//!
//! Entities are dense `u32` ids carrying a changing set of typed components
//! and boolean tags. Entities with the same component/tag signature share an
//! archetype, which stores each component type as one contiguous column.
//! Adding or removing a component moves the entity's row to another archetype
//! by swap-remove, so no other entity changes archetype.
//!
//! On top of the storage the crate provides tuple queries with tag filters,
//! value indexes for components registered as indexed, typed relations and
//! synchronous change events.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use stratum_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_component::<Position>("position");
//! registry.register_component::<Velocity>("velocity");
//! let mut store = EntityStore::new(Arc::new(registry));
//!
//! let entity = store.create_entity().unwrap().id();
//! store.add_component(entity, Position { x: 0.0, y: 0.0 }).unwrap();
//! store.add_component(entity, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! let query = store.query::<(&mut Position, &Velocity)>().build().unwrap();
//! for (_, (pos, vel)) in query.iter_mut(&mut store).unwrap() {
//!     pos.x += vel.dx;
//! }
//! assert_eq!(store.get_component::<Position>(entity), Some(&Position { x: 1.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod command;
pub mod component;
pub mod config;
pub mod entity;
pub mod event;
pub mod graph;
pub mod heap;
pub mod index;
pub mod pid;
pub mod query;
pub mod registry;
pub mod relation;
pub mod script;
pub mod signature;
pub mod store;
pub mod surface;

use entity::{EntityId, StoreId};
use event::HandlerError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The id is outside the node table.
    #[error("id: {id}. expect in [0, current max id: {max_id}]")]
    OutOfRange { id: u32, max_id: u32 },

    /// The id is in range but no entity lives there.
    #[error("entity {id:?} not found")]
    NotFound { id: EntityId },

    /// The call is not valid for the entity or type it names, such as
    /// adding a relation through the component API or reusing a PID.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An entity handle or query from another store.
    #[error("entity is owned by a different store. expected: {expected}, was: {actual}")]
    CrossStoreOperation { expected: StoreId, actual: StoreId },

    /// Cloning needs a copy strategy the type was registered without.
    #[error("type '{type_name}' has no copy strategy")]
    MissingCopyCapability { type_name: String },

    /// A type or external key that was never registered.
    #[error("schema type '{name}' not registered. Registered keys: [{registered}]")]
    UnknownType { name: String, registered: String },

    /// JSON that does not match the registered type under `key`.
    #[error("failed to deserialize '{key}': {details}")]
    Deserialize { key: String, details: String },

    /// A component value serde_json refused to encode.
    #[error("failed to serialize '{key}': {details}")]
    Serialize { key: String, details: String },

    /// An event handler failed. The mutation that raised the event was
    /// committed.
    #[error("event handler failed: {0}")]
    Handler(#[source] HandlerError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::command::{CommandBuffer, CommandKind, PlaybackReport};
    pub use crate::component::{
        Component, ComponentTypeId, Disabled, IndexedComponent, Relation, Script, ScriptTypeId,
        Tag, TagTypeId,
    };
    pub use crate::config::StoreConfig;
    pub use crate::entity::{Entity, EntityId, StoreId};
    pub use crate::event::{
        ComponentChangeAction, ComponentChanged, EntityCreated, EntityDeleted, HandlerError,
        HandlerId, TagsChanged,
    };
    pub use crate::pid::PidMode;
    pub use crate::query::{ArchetypeQuery, Query, QueryBuilder, QueryItem};
    pub use crate::registry::TypeRegistry;
    pub use crate::script::ScriptTable;
    pub use crate::signature::{Signature, TagSet};
    pub use crate::store::{ComponentBundle, EntityStore};
    pub use crate::surface::ArchetypeInfo;
    pub use crate::StoreError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
