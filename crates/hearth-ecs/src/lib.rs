//! Hearth ECS -- entity-component runtime with prototypes and lifecycle events.
//!
//! Entities are bare ids that own a set of components. Component types are
//! registered by name so that data-driven prototypes and save files can refer
//! to them. Every entity walks a fixed lifecycle (allocate, initialize, start,
//! delete) and every step is observable through typed events.
//!
//! # Quick Start
//!
//! ```
//! use hearth_ecs::prelude::*;
//!
//! #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
//! #[serde(default)]
//! struct Health { current: i32, max: i32 }
//! impl Component for Health {}
//!
//! let mut manager = EntityManager::new();
//! manager.register_component::<Health>("Health", ComponentTarget::Entity).unwrap();
//! manager
//!     .load_prototypes_str(r#"[{"id": "putit", "components": [{"type": "Health", "max": 8}]}]"#)
//!     .unwrap();
//! manager.resync_prototypes().unwrap();
//!
//! let e = manager.allocate(Some("putit"), None).unwrap();
//! manager.initialize(e).unwrap();
//! manager.start(e).unwrap();
//!
//! assert_eq!(manager.get_component::<Health>(e).unwrap().max, 8);
//! assert_eq!(manager.life_stage(e), Some(EntityLifeStage::Started));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod dependency;
pub mod entity;
pub mod event;
pub mod manager;
pub mod metadata;
pub mod prototype;
pub mod serialization;
pub mod snapshot;
pub mod spatial;
mod table;

pub use manager::EntityManager;

use component::ComponentTarget;
use entity::{EntityId, EntityKind, EntityLifeStage};
use prototype::PrototypeId;
use serialization::SerializationError;
use spatial::MapId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist and was never allocated.
    #[error("entity {entity:?} does not exist")]
    UnknownEntity { entity: EntityId },

    #[error("entity id {entity:?} is reserved and cannot be allocated")]
    InvalidEntityId { entity: EntityId },

    #[error("no entity ids are left to allocate")]
    EntityIdsExhausted,

    /// An explicit id collided with a live entity.
    #[error("entity id {entity:?} is already taken")]
    DuplicateEntityId { entity: EntityId },

    #[error("entity {entity:?} is already being deleted or gone (stage {stage:?})")]
    DoubleDelete {
        entity: EntityId,
        stage: EntityLifeStage,
    },

    /// A lifecycle step was requested from the wrong stage.
    #[error("cannot {operation} entity {entity:?} in stage {stage:?}")]
    LifecycleViolation {
        entity: EntityId,
        operation: &'static str,
        stage: EntityLifeStage,
    },

    #[error("map initialization already ran for entity {entity:?}")]
    MapInitAlreadyRun { entity: EntityId },

    #[error("component name '{name}' is already registered")]
    DuplicateComponentName { name: String },

    #[error("component type {type_name} is already registered as '{existing}'")]
    DuplicateComponentType {
        type_name: &'static str,
        existing: String,
    },

    #[error("component type {type_name} is not registered")]
    UnregisteredComponentType { type_name: &'static str },

    /// A component type was referenced by name that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    #[error("entity {entity:?} has no {component} component")]
    MissingComponent { entity: EntityId, component: String },

    #[error("entity {entity:?} already has a {component} component")]
    DuplicateComponent { entity: EntityId, component: String },

    #[error("{component} cannot be removed from entity {entity:?}")]
    MandatoryComponent { entity: EntityId, component: String },

    #[error("component '{component}' targets {target:?} and cannot be attached to {kind:?} entity {entity:?}")]
    InvalidComponentTarget {
        entity: EntityId,
        component: String,
        target: ComponentTarget,
        kind: EntityKind,
    },

    #[error("component '{component}': {source}")]
    Serialization {
        component: String,
        #[source]
        source: SerializationError,
    },

    #[error("prototype '{prototype}' is not defined")]
    UnknownPrototype { prototype: PrototypeId },

    #[error("prototype '{prototype}' inherits from undefined prototype '{parent}'")]
    MissingParent {
        prototype: PrototypeId,
        parent: PrototypeId,
    },

    #[error("prototype '{prototype}' is part of an inheritance cycle")]
    CyclicPrototype { prototype: PrototypeId },

    #[error("prototype '{prototype}' is defined twice")]
    DuplicatePrototype { prototype: PrototypeId },

    #[error("prototype '{prototype}': {source}")]
    PrototypeComponent {
        prototype: PrototypeId,
        #[source]
        source: Box<EcsError>,
    },

    /// Definitions were loaded after the last resync.
    #[error("prototypes changed since the last resync")]
    PrototypesNotResolved,

    #[error("failed to parse prototype definitions: {0}")]
    PrototypeParse(#[from] serde_json::Error),

    #[error("{map} is not registered")]
    UnknownMap { map: MapId },

    #[error("{map} is already registered")]
    DuplicateMap { map: MapId },

    #[error("map entity {entity:?} cannot be cloned")]
    MapEntityClone { entity: EntityId },

    /// Building an entity failed; the partial entity has been deleted.
    #[error("failed to create entity {entity:?} (prototype {prototype:?}): {source}")]
    EntityCreation {
        entity: EntityId,
        prototype: Option<PrototypeId>,
        #[source]
        source: Box<EcsError>,
    },

    /// An event handler returned an error.
    #[error("handler for {event} on entity {entity:?} failed: {source}")]
    HandlerFailed {
        event: &'static str,
        entity: EntityId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        Component, ComponentFactory, ComponentInfo, ComponentLifeStage, ComponentManifest,
        ComponentRegistry, ComponentTarget, ComponentTypeId, DataComponent,
    };
    pub use crate::config::{DoubleDeletePolicy, EcsConfig, HandlerErrorPolicy};
    pub use crate::dependency::{Dependency, DependencySlot};
    pub use crate::entity::{EntityId, EntityKind, EntityLifeStage};
    pub use crate::event::{
        ComponentAdded, ComponentInit, ComponentRemove, ComponentShutdown, ComponentStartup,
        EntityCloned, EntityDeleted, EntityEvent, EntityTerminating, MapInit, SubscriptionId,
    };
    pub use crate::manager::{EntityManager, METADATA_COMPONENT, SPATIAL_COMPONENT};
    pub use crate::metadata::{EntityGameLiveness, MetaDataComponent};
    pub use crate::prototype::{ComponentBlock, ComponentData, EntityPrototype, PrototypeId};
    pub use crate::serialization::DataNode;
    pub use crate::snapshot::{EntitySnapshot, MapSnapshot, WorldSnapshot};
    pub use crate::spatial::{MapCoordinates, MapId, Position, SpatialComponent};
    pub use crate::EcsError;
}
