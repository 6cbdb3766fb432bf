//! The entity manager: lifecycle orchestration on top of the entity table.
//!
//! The manager owns the component registry, prototypes, the event bus, and
//! the map index, and is the only type that moves entities through their
//! lifecycle:
//!
//! ```text
//! allocate ─► initialize ─► start ─► (run_map_init) ─► delete
//! Allocated   Initialized   Started                   Terminating ─► gone
//! ```
//!
//! Each step runs the matching component hooks in attachment order and raises
//! the matching directed event. Components added after a step has run are
//! caught up immediately.
//!
//! ```
//! use hearth_ecs::prelude::*;
//!
//! #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
//! struct Health { current: i32, max: i32 }
//! impl Component for Health {}
//!
//! let mut manager = EntityManager::new();
//! manager.register_component::<Health>("Health", ComponentTarget::Entity).unwrap();
//! let map = MapId(1);
//! manager.create_map(map).unwrap();
//! manager.initialize_map(map).unwrap();
//!
//! let e = manager.spawn_entity(None, MapCoordinates::new(map, 3, 4)).unwrap();
//! manager.add_component::<Health>(e).unwrap().max = 10;
//! assert_eq!(manager.life_stage(e), Some(EntityLifeStage::Started));
//!
//! manager.queue_delete(e);
//! assert_eq!(manager.process_queued_deletions(), 1);
//! assert!(!manager.entity_exists(e));
//! ```

use crate::component::{
    Component, ComponentFactory, ComponentLifeStage, ComponentManifest, ComponentRegistry,
    ComponentTarget, ComponentTypeId, DataComponent,
};
use crate::config::{DoubleDeletePolicy, EcsConfig, HandlerErrorPolicy};
use crate::dependency;
use crate::entity::{EntityId, EntityKind, EntityLifeStage};
use crate::event::{
    self, ComponentAdded, ComponentInit, ComponentRemove, ComponentShutdown, ComponentStartup,
    EntityCloned, EntityDeleted, EntityEvent, EntityTerminating, EventBus, MapInit,
    SubscriptionId,
};
use crate::metadata::MetaDataComponent;
use crate::prototype::{ComponentData, EntityPrototype, PrototypeId, PrototypeStore};
use crate::spatial::{MapCoordinates, MapId, SpatialComponent, SpatialIndex};
use crate::table::EntityTable;
use crate::EcsError;
use std::any::{type_name, TypeId};
use std::collections::HashSet;

/// Registered name of [`MetaDataComponent`].
pub const METADATA_COMPONENT: &str = "MetaData";
/// Registered name of [`SpatialComponent`].
pub const SPATIAL_COMPONENT: &str = "Spatial";

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Owns every entity and component, and drives their lifecycle.
pub struct EntityManager {
    config: EcsConfig,
    registry: ComponentRegistry,
    prototypes: PrototypeStore,
    pub(crate) table: EntityTable,
    bus: EventBus<EntityManager>,
    pub(crate) spatial: SpatialIndex,
    /// Pending deletions in request order, plus a set for dedup.
    queued_deletions: Vec<EntityId>,
    queued_set: HashSet<EntityId>,
    metadata_type: ComponentTypeId,
    spatial_type: ComponentTypeId,
}

impl EntityManager {
    /// Create a manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EcsConfig::default())
    }

    /// Create a manager with an explicit configuration. The mandatory
    /// metadata and spatial components are registered up front.
    pub fn with_config(config: EcsConfig) -> Self {
        let manifest = ComponentManifest::new()
            .with_target::<MetaDataComponent>(METADATA_COMPONENT, ComponentTarget::Any)
            .with_target::<SpatialComponent>(SPATIAL_COMPONENT, ComponentTarget::Any);
        let mut registry = ComponentRegistry::new();
        let builtin = registry
            .register_manifest(&manifest)
            .expect("an empty registry accepts the built-in components");

        Self {
            config,
            registry,
            prototypes: PrototypeStore::new(),
            table: EntityTable::new(),
            bus: EventBus::new(),
            spatial: SpatialIndex::new(),
            queued_deletions: Vec::new(),
            queued_set: HashSet::new(),
            metadata_type: builtin[0],
            spatial_type: builtin[1],
        }
    }

    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EcsConfig) {
        self.config = config;
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register component type `T` under `name`.
    pub fn register_component<T: DataComponent>(
        &mut self,
        name: &str,
        target: ComponentTarget,
    ) -> Result<ComponentTypeId, EcsError> {
        self.registry.register::<T>(name, target)
    }

    /// Register a batch of component types.
    pub fn register_manifest(
        &mut self,
        manifest: &ComponentManifest,
    ) -> Result<Vec<ComponentTypeId>, EcsError> {
        self.registry.register_manifest(manifest)
    }

    /// Registered id of `T`.
    pub fn component_type<T: Component>(&self) -> Result<ComponentTypeId, EcsError> {
        self.registry
            .lookup::<T>()
            .ok_or(EcsError::UnregisteredComponentType {
                type_name: type_name::<T>(),
            })
    }

    fn factory(&self, ctype: ComponentTypeId) -> Result<ComponentFactory, EcsError> {
        self.registry
            .factory(ctype)
            .ok_or(EcsError::UnregisteredComponentType {
                type_name: "<unknown component id>",
            })
    }

    // -----------------------------------------------------------------------
    // Prototypes
    // -----------------------------------------------------------------------

    pub fn prototypes(&self) -> &PrototypeStore {
        &self.prototypes
    }

    /// Load one definition. Its parent may be loaded later.
    pub fn load_prototype(&mut self, prototype: EntityPrototype) -> Result<(), EcsError> {
        self.prototypes.load(prototype)
    }

    /// Load prototype definitions from JSON. Call
    /// [`resync_prototypes`](Self::resync_prototypes) before instantiating.
    pub fn load_prototypes_str(&mut self, json: &str) -> Result<usize, EcsError> {
        self.prototypes.load_str(json)
    }

    /// Flatten and validate all loaded prototypes against the registry.
    pub fn resync_prototypes(&mut self) -> Result<(), EcsError> {
        self.prototypes.resync(&self.registry)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Subscribe to `E` raised on entities carrying component `T`.
    ///
    /// Handlers with a lower `order` run first; `None` means `0`.
    pub fn subscribe<T: Component, E: EntityEvent>(
        &mut self,
        order: Option<i32>,
        handler: impl Fn(&mut EntityManager, EntityId, &mut E) -> anyhow::Result<()> + 'static,
    ) -> Result<SubscriptionId, EcsError> {
        let ctype = self.component_type::<T>()?;
        Ok(self.bus.subscribe::<E>(ctype, order, handler))
    }

    /// Subscribe to every `E`, regardless of components.
    pub fn subscribe_global<E: EntityEvent>(
        &mut self,
        order: Option<i32>,
        handler: impl Fn(&mut EntityManager, EntityId, &mut E) -> anyhow::Result<()> + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe_global::<E>(order, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Raise `event` on `id`, letting handlers mutate it in place.
    ///
    /// Raising on an entity that does not exist is a no-op.
    pub fn raise_by_ref<E: EntityEvent>(
        &mut self,
        id: EntityId,
        event: &mut E,
    ) -> Result<(), EcsError> {
        let handlers = match self.table.component_types(id) {
            Some(components) => self.bus.local_handlers::<E>(components),
            None => {
                tracing::debug!(entity = %id, event = type_name::<E>(), "event raised on missing entity");
                return Ok(());
            }
        };
        let result = event::dispatch(self, id, event, &handlers);
        self.settle::<E>(id, result)
    }

    /// Raise an owned `event` on `id` and hand it back after dispatch.
    pub fn raise_by_value<E: EntityEvent>(
        &mut self,
        id: EntityId,
        mut event: E,
    ) -> Result<E, EcsError> {
        self.raise_by_ref(id, &mut event)?;
        Ok(event)
    }

    fn raise_directed<E: EntityEvent>(
        &mut self,
        id: EntityId,
        ctype: ComponentTypeId,
        event: &mut E,
    ) -> Result<(), EcsError> {
        let handlers = self.bus.directed_handlers::<E>(ctype);
        if handlers.is_empty() {
            return Ok(());
        }
        let result = event::dispatch(self, id, event, &handlers);
        self.settle::<E>(id, result)
    }

    fn raise_global<E: EntityEvent>(&mut self, id: EntityId, event: &mut E) -> Result<(), EcsError> {
        let handlers = self.bus.global_handlers::<E>();
        if handlers.is_empty() {
            return Ok(());
        }
        let result = event::dispatch(self, id, event, &handlers);
        self.settle::<E>(id, result)
    }

    /// Apply the handler error policy to a dispatch result.
    fn settle<E: EntityEvent>(&self, id: EntityId, result: anyhow::Result<()>) -> Result<(), EcsError> {
        let Err(source) = result else {
            return Ok(());
        };
        match self.config.handler_errors {
            HandlerErrorPolicy::Propagate => Err(EcsError::HandlerFailed {
                event: type_name::<E>(),
                entity: id,
                source: source.into(),
            }),
            HandlerErrorPolicy::LogAndContinue => {
                tracing::error!(entity = %id, event = type_name::<E>(), error = %source, "event handler failed");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Create an entity, optionally from a prototype and/or with an explicit
    /// id. The entity is left in [`EntityLifeStage::Allocated`].
    ///
    /// The prototype is checked before any id is consumed. If populating the
    /// entity fails afterwards, the half-built entity is deleted and
    /// [`EcsError::EntityCreation`] is returned.
    pub fn allocate(
        &mut self,
        prototype: Option<&str>,
        explicit: Option<EntityId>,
    ) -> Result<EntityId, EcsError> {
        let components = match prototype {
            Some(prototype) => self.prototypes.instantiate(prototype)?.to_vec(),
            None => Vec::new(),
        };
        let prototype = prototype.map(PrototypeId::from);
        let id = self.allocate_row(explicit, EntityKind::Entity)?;

        if let Err(source) = self.build(id, &components, prototype.clone()) {
            self.discard(id);
            return Err(EcsError::EntityCreation {
                entity: id,
                prototype,
                source: Box::new(source),
            });
        }
        tracing::debug!(entity = %id, prototype = ?prototype, "allocated entity");
        Ok(id)
    }

    /// Claim an id and insert an empty row.
    pub(crate) fn allocate_row(
        &mut self,
        explicit: Option<EntityId>,
        kind: EntityKind,
    ) -> Result<EntityId, EcsError> {
        let id = match explicit {
            Some(id) => {
                self.table.claim_id(id)?;
                id
            }
            None => self.table.next_id()?,
        };
        self.table.insert_row(id, kind);
        Ok(id)
    }

    /// Attach the mandatory components, then `components` in order, then
    /// stamp the metadata.
    fn build(
        &mut self,
        id: EntityId,
        components: &[ComponentData],
        prototype: Option<PrototypeId>,
    ) -> Result<(), EcsError> {
        self.attach_mandatory(id)?;
        self.populate(id, components)?;
        let kind = self.table.kind(id).unwrap_or_default();
        if let Some(meta) = self.metadata_mut(id) {
            meta.stamp(kind, prototype);
        }
        Ok(())
    }

    pub(crate) fn attach_mandatory(&mut self, id: EntityId) -> Result<(), EcsError> {
        let kind = self.table.kind(id).unwrap_or_default();
        self.attach(id, self.metadata_type, Box::new(MetaDataComponent::new(kind)))?;
        self.attach(id, self.spatial_type, Box::new(SpatialComponent::default()))
    }

    /// Apply named component data to `id`. Components already attached are
    /// overlaid; others are built from their factory and attached.
    pub(crate) fn populate(
        &mut self,
        id: EntityId,
        components: &[ComponentData],
    ) -> Result<(), EcsError> {
        for component in components {
            let ctype = self.registry.require_by_name(&component.type_name)?;
            let factory = self.factory(ctype)?;
            let to_error = |source| EcsError::Serialization {
                component: component.type_name.clone(),
                source,
            };
            match self.table.get_mut(id, ctype) {
                Some(cell) => factory
                    .apply_node(&mut *cell.data, &component.data)
                    .map_err(to_error)?,
                None => {
                    let data = factory.from_node(&component.data).map_err(to_error)?;
                    self.attach(id, ctype, data)?;
                }
            }
        }
        Ok(())
    }

    /// Delete a half-built entity if it is still around.
    fn discard(&mut self, id: EntityId) {
        if self
            .table
            .stage(id)
            .is_some_and(|stage| stage < EntityLifeStage::Terminating)
        {
            self.delete_unchecked(id);
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn expect_stage(
        &self,
        id: EntityId,
        expected: EntityLifeStage,
        operation: &'static str,
    ) -> Result<(), EcsError> {
        let stage = self
            .table
            .stage(id)
            .ok_or(EcsError::UnknownEntity { entity: id })?;
        if stage != expected {
            return Err(EcsError::LifecycleViolation {
                entity: id,
                operation,
                stage,
            });
        }
        Ok(())
    }

    /// Run every component's initialize hook, in attachment order.
    pub fn initialize(&mut self, id: EntityId) -> Result<(), EcsError> {
        self.expect_stage(id, EntityLifeStage::Allocated, "initialize")?;
        self.table.set_stage(id, EntityLifeStage::Initializing);
        let order = self.attached(id);
        for ctype in order {
            self.initialize_component(id, ctype)?;
        }
        self.table.set_stage(id, EntityLifeStage::Initialized);
        tracing::trace!(entity = %id, "entity initialized");
        Ok(())
    }

    /// Run every component's startup hook, in attachment order.
    pub fn start(&mut self, id: EntityId) -> Result<(), EcsError> {
        self.expect_stage(id, EntityLifeStage::Initialized, "start")?;
        self.table.set_stage(id, EntityLifeStage::Starting);
        let order = self.attached(id);
        for ctype in order {
            self.start_component(id, ctype)?;
        }
        self.table.set_stage(id, EntityLifeStage::Started);
        tracing::trace!(entity = %id, "entity started");
        Ok(())
    }

    /// Raise [`MapInit`] on a started entity. Runs at most once per entity.
    pub fn run_map_init(&mut self, id: EntityId) -> Result<(), EcsError> {
        self.expect_stage(id, EntityLifeStage::Started, "run_map_init")?;
        let meta = self
            .metadata_mut(id)
            .ok_or(EcsError::UnknownEntity { entity: id })?;
        if meta.is_map_initialized() {
            return Err(EcsError::MapInitAlreadyRun { entity: id });
        }
        meta.set_map_initialized(true);
        self.raise_by_ref(id, &mut MapInit)
    }

    fn initialize_component(&mut self, id: EntityId, ctype: ComponentTypeId) -> Result<(), EcsError> {
        match self.table.get_mut(id, ctype) {
            Some(cell) if cell.stage == ComponentLifeStage::Added => {
                cell.data.on_initialize(id);
                cell.stage = ComponentLifeStage::Initialized;
            }
            _ => return Ok(()),
        }
        self.raise_directed(id, ctype, &mut ComponentInit { component: ctype })
    }

    fn start_component(&mut self, id: EntityId, ctype: ComponentTypeId) -> Result<(), EcsError> {
        match self.table.get_mut(id, ctype) {
            Some(cell) if cell.stage == ComponentLifeStage::Initialized => {
                cell.data.on_startup(id);
                cell.stage = ComponentLifeStage::Started;
            }
            _ => return Ok(()),
        }
        self.raise_directed(id, ctype, &mut ComponentStartup { component: ctype })
    }

    /// Allocate, place, initialize, and start an entity in one go, running
    /// map initialization too if the target map is already initialized.
    pub fn spawn_entity(
        &mut self,
        prototype: Option<&str>,
        coords: MapCoordinates,
    ) -> Result<EntityId, EcsError> {
        if !self.spatial.contains_map(coords.map) {
            return Err(EcsError::UnknownMap { map: coords.map });
        }
        let id = self.allocate(prototype, None)?;
        if let Err(source) = self.bring_up(id, coords) {
            self.discard(id);
            return Err(EcsError::EntityCreation {
                entity: id,
                prototype: prototype.map(PrototypeId::from),
                source: Box::new(source),
            });
        }
        Ok(id)
    }

    fn bring_up(&mut self, id: EntityId, coords: MapCoordinates) -> Result<(), EcsError> {
        self.set_coordinates(id, coords)?;
        self.initialize(id)?;
        self.start(id)?;
        if self.spatial.is_initialized(coords.map) {
            self.run_map_init(id)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Maps
    // -----------------------------------------------------------------------

    /// Create the entity standing for `map` and register the map. The map
    /// entity is started immediately; the map itself is not yet initialized.
    pub fn create_map(&mut self, map: MapId) -> Result<EntityId, EcsError> {
        if self.spatial.contains_map(map) {
            return Err(EcsError::DuplicateMap { map });
        }
        let id = self.allocate_row(None, EntityKind::Map)?;
        self.spatial.register_map(map, Some(id), false);

        let result = self
            .build(id, &[], None)
            .and_then(|()| self.initialize(id))
            .and_then(|()| self.start(id));
        if let Err(source) = result {
            self.discard(id);
            self.spatial.unregister_map(map);
            return Err(EcsError::EntityCreation {
                entity: id,
                prototype: None,
                source: Box::new(source),
            });
        }
        tracing::debug!(%map, entity = %id, "created map");
        Ok(id)
    }

    /// Mark `map` initialized and run map initialization for every started
    /// entity in it that has not had it yet. Returns how many ran.
    pub fn initialize_map(&mut self, map: MapId) -> Result<usize, EcsError> {
        if !self.spatial.contains_map(map) {
            return Err(EcsError::UnknownMap { map });
        }
        if !self.spatial.mark_initialized(map) {
            tracing::debug!(%map, "map already initialized");
            return Ok(0);
        }
        let mut count = 0;
        for id in self.spatial.members(map) {
            let pending = self.table.stage(id) == Some(EntityLifeStage::Started)
                && self.metadata(id).is_some_and(|meta| !meta.is_map_initialized());
            if pending {
                self.run_map_init(id)?;
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_map_initialized(&self, map: MapId) -> bool {
        self.spatial.is_initialized(map)
    }

    /// The entity standing for `map`.
    pub fn map_entity(&self, map: MapId) -> Option<EntityId> {
        self.spatial.map_entity(map)
    }

    /// Move `id` to `coords`, keeping the map index in step.
    pub fn set_coordinates(&mut self, id: EntityId, coords: MapCoordinates) -> Result<(), EcsError> {
        if !self.spatial.contains_map(coords.map) {
            return Err(EcsError::UnknownMap { map: coords.map });
        }
        self.place(id, Some(coords))
    }

    /// Take `id` out of whatever map it is in.
    pub fn remove_from_map(&mut self, id: EntityId) -> Result<(), EcsError> {
        self.place(id, None)
    }

    fn place(&mut self, id: EntityId, coords: Option<MapCoordinates>) -> Result<(), EcsError> {
        let spatial = self
            .table
            .get_mut(id, self.spatial_type)
            .and_then(|cell| cell.data.downcast_mut::<SpatialComponent>())
            .ok_or(EcsError::UnknownEntity { entity: id })?;
        let previous = spatial.map();
        spatial.place(coords);
        if let Some(old) = previous {
            self.spatial.remove(old, id);
        }
        if let Some(coords) = coords {
            self.spatial.insert(coords.map, id);
        }
        Ok(())
    }

    /// Entities placed in `map`, ascending.
    pub fn entities_in_map(&self, map: MapId) -> Vec<EntityId> {
        self.spatial.members(map)
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// Attach a default-constructed `T` and return it.
    pub fn add_component<T: Component + Default>(&mut self, id: EntityId) -> Result<&mut T, EcsError> {
        self.insert_component(id, T::default())
    }

    /// Attach `value` and return it. The entity may be at any stage before
    /// termination; hooks it has already passed are run for the new component.
    pub fn insert_component<T: Component>(
        &mut self,
        id: EntityId,
        value: T,
    ) -> Result<&mut T, EcsError> {
        let ctype = self.component_type::<T>()?;
        self.attach(id, ctype, Box::new(value))?;
        self.try_get_component_mut::<T>(id)
            .ok_or_else(|| EcsError::MissingComponent {
                entity: id,
                component: type_name::<T>().to_owned(),
            })
    }

    /// Return the attached `T`, attaching a default one first if needed.
    pub fn ensure_component<T: Component + Default>(
        &mut self,
        id: EntityId,
    ) -> Result<&mut T, EcsError> {
        if !self.has_component::<T>(id) {
            self.insert_component(id, T::default())?;
        }
        self.get_component_mut::<T>(id)
    }

    fn attach(
        &mut self,
        id: EntityId,
        ctype: ComponentTypeId,
        data: Box<dyn Component>,
    ) -> Result<(), EcsError> {
        let row = self
            .table
            .row(id)
            .ok_or(EcsError::UnknownEntity { entity: id })?;
        let (kind, stage) = (row.kind, row.stage);
        if stage >= EntityLifeStage::Terminating {
            return Err(EcsError::LifecycleViolation {
                entity: id,
                operation: "add_component",
                stage,
            });
        }
        let info = self
            .registry
            .get_info(ctype)
            .ok_or(EcsError::UnregisteredComponentType {
                type_name: "<unknown component id>",
            })?;
        if !info.target.allows(kind) {
            return Err(EcsError::InvalidComponentTarget {
                entity: id,
                component: info.name.clone(),
                target: info.target,
                kind,
            });
        }
        if self.table.get(id, ctype).is_some() {
            return Err(EcsError::DuplicateComponent {
                entity: id,
                component: info.name.clone(),
            });
        }

        self.table.attach(id, ctype, data)?;
        tracing::trace!(entity = %id, component = self.registry.name_of(ctype), "component attached");
        self.rebind(id);
        self.raise_directed(id, ctype, &mut ComponentAdded { component: ctype })?;

        if stage >= EntityLifeStage::Initializing {
            self.initialize_component(id, ctype)?;
        }
        if stage >= EntityLifeStage::Starting {
            self.start_component(id, ctype)?;
        }
        Ok(())
    }

    /// Detach `T` from `id`, running shutdown and removal. Returns `false` if
    /// it was not attached.
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> Result<bool, EcsError> {
        let ctype = self.component_type::<T>()?;
        self.remove_component_type(id, ctype)
    }

    /// Untyped form of [`remove_component`](Self::remove_component).
    pub fn remove_component_type(
        &mut self,
        id: EntityId,
        ctype: ComponentTypeId,
    ) -> Result<bool, EcsError> {
        if !self.table.contains(id) {
            return Err(EcsError::UnknownEntity { entity: id });
        }
        if ctype == self.metadata_type || ctype == self.spatial_type {
            return Err(EcsError::MandatoryComponent {
                entity: id,
                component: self.registry.name_of(ctype).to_owned(),
            });
        }
        if self.table.get(id, ctype).is_none() {
            return Ok(false);
        }
        let result = self.dispose_component(id, ctype);
        self.rebind(id);
        result.map(|()| true)
    }

    /// Shutdown (if started), remove, and detach one component.
    ///
    /// The component is always detached; the first handler error, if any,
    /// is returned afterwards.
    fn dispose_component(&mut self, id: EntityId, ctype: ComponentTypeId) -> Result<(), EcsError> {
        let mut first_error = None;

        let started = match self.table.get_mut(id, ctype) {
            Some(cell) if cell.stage == ComponentLifeStage::Removed => return Ok(()),
            Some(cell) => {
                let started = cell.stage == ComponentLifeStage::Started;
                if started {
                    cell.data.on_shutdown(id);
                }
                started
            }
            None => return Ok(()),
        };
        if started {
            if let Err(err) =
                self.raise_directed(id, ctype, &mut ComponentShutdown { component: ctype })
            {
                first_error.get_or_insert(err);
            }
        }

        match self.table.get_mut(id, ctype) {
            Some(cell) if cell.stage != ComponentLifeStage::Removed => {
                cell.data.on_remove(id);
                cell.stage = ComponentLifeStage::Removed;
            }
            // Already disposed by a handler.
            _ => return first_error.map_or(Ok(()), Err),
        }
        if let Err(err) = self.raise_directed(id, ctype, &mut ComponentRemove { component: ctype }) {
            first_error.get_or_insert(err);
        }

        self.table.detach(id, ctype);
        tracing::trace!(entity = %id, component = self.registry.name_of(ctype), "component detached");
        first_error.map_or(Ok(()), Err)
    }

    /// Checked access: errors if the entity or the component is missing.
    pub fn get_component<T: Component>(&self, id: EntityId) -> Result<&T, EcsError> {
        match self.try_get_component::<T>(id) {
            Some(component) => Ok(component),
            None => Err(self.missing::<T>(id)),
        }
    }

    pub fn get_component_mut<T: Component>(&mut self, id: EntityId) -> Result<&mut T, EcsError> {
        if !self.has_component::<T>(id) {
            return Err(self.missing::<T>(id));
        }
        self.try_get_component_mut::<T>(id)
            .ok_or_else(|| EcsError::MissingComponent {
                entity: id,
                component: type_name::<T>().to_owned(),
            })
    }

    fn missing<T: Component>(&self, id: EntityId) -> EcsError {
        if !self.table.contains(id) {
            return EcsError::UnknownEntity { entity: id };
        }
        EcsError::MissingComponent {
            entity: id,
            component: type_name::<T>().to_owned(),
        }
    }

    pub fn try_get_component<T: Component>(&self, id: EntityId) -> Option<&T> {
        let ctype = self.registry.lookup::<T>()?;
        self.table.get(id, ctype)?.data.downcast_ref::<T>()
    }

    pub fn try_get_component_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let ctype = self.registry.lookup::<T>()?;
        self.table.get_mut(id, ctype)?.data.downcast_mut::<T>()
    }

    /// Optional access that warns when the component is missing, if both the
    /// caller and the configuration ask for it.
    pub fn resolve<T: Component>(&self, id: EntityId, log_missing: bool) -> Option<&T> {
        let found = self.try_get_component::<T>(id);
        if found.is_none() && log_missing && self.config.log_missing_components {
            tracing::warn!(entity = %id, component = type_name::<T>(), "resolve found no component");
        }
        found
    }

    pub fn resolve_mut<T: Component>(&mut self, id: EntityId, log_missing: bool) -> Option<&mut T> {
        if log_missing && self.config.log_missing_components && !self.has_component::<T>(id) {
            tracing::warn!(entity = %id, component = type_name::<T>(), "resolve found no component");
        }
        self.try_get_component_mut::<T>(id)
    }

    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        self.registry
            .lookup::<T>()
            .is_some_and(|ctype| self.table.get(id, ctype).is_some())
    }

    /// Whether `id` carries the component registered as `name`.
    pub fn has_component_named(&self, id: EntityId, name: &str) -> bool {
        self.registry
            .lookup_by_name(name)
            .is_some_and(|ctype| self.table.get(id, ctype).is_some())
    }

    pub fn component_life_stage<T: Component>(&self, id: EntityId) -> Option<ComponentLifeStage> {
        let ctype = self.registry.lookup::<T>()?;
        self.table.get(id, ctype).map(|cell| cell.stage)
    }

    /// Every entity carrying `T`, ascending by id.
    pub fn entity_query<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.registry
            .lookup::<T>()
            .into_iter()
            .flat_map(move |ctype| self.table.storage(ctype))
            .filter_map(|(id, cell)| cell.data.downcast_ref::<T>().map(|c| (id, c)))
    }

    pub fn metadata(&self, id: EntityId) -> Option<&MetaDataComponent> {
        self.table
            .get(id, self.metadata_type)?
            .data
            .downcast_ref::<MetaDataComponent>()
    }

    pub fn metadata_mut(&mut self, id: EntityId) -> Option<&mut MetaDataComponent> {
        self.table
            .get_mut(id, self.metadata_type)?
            .data
            .downcast_mut::<MetaDataComponent>()
    }

    pub fn spatial(&self, id: EntityId) -> Option<&SpatialComponent> {
        self.table
            .get(id, self.spatial_type)?
            .data
            .downcast_ref::<SpatialComponent>()
    }

    fn attached(&self, id: EntityId) -> Vec<ComponentTypeId> {
        self.table
            .component_types(id)
            .map(<[ComponentTypeId]>::to_vec)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Dependencies
    // -----------------------------------------------------------------------

    /// Rebind every dependency slot on `id` against its current components.
    pub fn resolve_dependencies(&mut self, id: EntityId) -> Result<(), EcsError> {
        if !self.table.contains(id) {
            return Err(EcsError::UnknownEntity { entity: id });
        }
        self.rebind(id);
        Ok(())
    }

    fn rebind(&mut self, id: EntityId) {
        let Some(row) = self.table.row(id) else {
            return;
        };
        if row.dependents.is_empty() {
            return;
        }
        let present: HashSet<TypeId> = row
            .components
            .iter()
            .filter_map(|ctype| self.registry.get_info(*ctype).map(|info| info.type_id))
            .collect();
        let dependents = row.dependents.clone();
        for ctype in dependents {
            if let Some(cell) = self.table.get_mut(id, ctype) {
                let unresolved = dependency::bind_slots(id, &mut *cell.data, &present);
                if unresolved > 0 {
                    tracing::trace!(entity = %id, component = self.registry.name_of(ctype), unresolved, "dependencies left unresolved");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete `id` immediately.
    ///
    /// Deleting an entity that is already terminating or gone is a
    /// [`EcsError::DoubleDelete`] unless the configuration tolerates it.
    pub fn delete(&mut self, id: EntityId) -> Result<(), EcsError> {
        match self.table.stage(id) {
            Some(stage) if stage >= EntityLifeStage::Terminating => self.double_delete(id, stage),
            Some(_) => {
                self.delete_unchecked(id);
                Ok(())
            }
            None if self.table.has_issued(id) => self.double_delete(id, EntityLifeStage::Deleted),
            None => Err(EcsError::UnknownEntity { entity: id }),
        }
    }

    fn double_delete(&self, id: EntityId, stage: EntityLifeStage) -> Result<(), EcsError> {
        match self.config.double_delete {
            DoubleDeletePolicy::Strict => Err(EcsError::DoubleDelete { entity: id, stage }),
            DoubleDeletePolicy::Tolerant => {
                tracing::debug!(entity = %id, ?stage, "ignoring repeated delete");
                Ok(())
            }
        }
    }

    /// Tear down a live entity. Handler errors are logged, never propagated:
    /// the entity is gone afterwards no matter what.
    fn delete_unchecked(&mut self, id: EntityId) {
        self.table.set_stage(id, EntityLifeStage::Terminating);
        let prototype = self.metadata(id).and_then(|meta| meta.prototype().cloned());

        let result = self.raise_by_ref(id, &mut EntityTerminating);
        self.log_failure(id, "terminating", result);

        if let Some(map) = self.spatial.map_of_entity(id) {
            for member in self.spatial.unregister_map(map) {
                if self
                    .table
                    .stage(member)
                    .is_some_and(|stage| stage < EntityLifeStage::Terminating)
                {
                    self.delete_unchecked(member);
                }
            }
        }
        if let Some(map) = self.spatial(id).and_then(SpatialComponent::map) {
            self.spatial.remove(map, id);
        }

        for ctype in self.attached(id).into_iter().rev() {
            let result = self.dispose_component(id, ctype);
            self.log_failure(id, "disposing component", result);
        }

        self.table.set_stage(id, EntityLifeStage::Deleted);
        self.table.remove_row(id);
        tracing::debug!(entity = %id, "entity deleted");

        let result = self.raise_global(id, &mut EntityDeleted { prototype });
        self.log_failure(id, "deleted notification", result);
    }

    fn log_failure(&self, id: EntityId, step: &'static str, result: Result<(), EcsError>) {
        if let Err(error) = result {
            tracing::error!(entity = %id, step, %error, "handler failed during deletion");
        }
    }

    /// Ask for `id` to be deleted at the next drain. Returns `false` if it
    /// was already queued.
    pub fn queue_delete(&mut self, id: EntityId) -> bool {
        if !self.queued_set.insert(id) {
            return false;
        }
        self.queued_deletions.push(id);
        true
    }

    pub fn is_queued_for_deletion(&self, id: EntityId) -> bool {
        self.queued_set.contains(&id)
    }

    pub fn queued_deletion_count(&self) -> usize {
        self.queued_deletions.len()
    }

    /// Delete every queued entity in request order, skipping ones that are
    /// already gone. Entities queued by handlers during the drain wait for
    /// the next drain. Returns how many were deleted.
    pub fn process_queued_deletions(&mut self) -> usize {
        let queue = std::mem::take(&mut self.queued_deletions);
        self.queued_set.clear();
        let mut deleted = 0;
        for id in queue {
            match self.table.stage(id) {
                Some(stage) if stage < EntityLifeStage::Terminating => {
                    self.delete_unchecked(id);
                    deleted += 1;
                }
                _ => tracing::trace!(entity = %id, "queued entity already gone"),
            }
        }
        deleted
    }

    /// Delete every entity and drop pending deletions. Returns how many
    /// entities were deleted.
    pub fn flush_entities(&mut self) -> usize {
        self.queued_deletions.clear();
        self.queued_set.clear();
        let ids: Vec<EntityId> = self.table.ids().collect();
        let mut deleted = 0;
        for id in ids {
            if self
                .table
                .stage(id)
                .is_some_and(|stage| stage < EntityLifeStage::Terminating)
            {
                self.delete_unchecked(id);
                deleted += 1;
            }
        }
        self.spatial.clear();
        tracing::debug!(deleted, "flushed entities");
        deleted
    }

    // -----------------------------------------------------------------------
    // Cloning
    // -----------------------------------------------------------------------

    /// Create a deep copy of `source` under a fresh id, brought to the same
    /// lifecycle stage and placed at the same coordinates. Map initialization
    /// is left for the caller.
    pub fn clone_entity(&mut self, source: EntityId) -> Result<EntityId, EcsError> {
        let row = self
            .table
            .row(source)
            .ok_or(EcsError::UnknownEntity { entity: source })?;
        if row.kind == EntityKind::Map {
            return Err(EcsError::MapEntityClone { entity: source });
        }
        let stage = row.stage;
        if stage >= EntityLifeStage::Terminating {
            return Err(EcsError::LifecycleViolation {
                entity: source,
                operation: "clone_entity",
                stage,
            });
        }

        let mut copies = Vec::new();
        for ctype in self.attached(source) {
            let factory = self.factory(ctype)?;
            if let Some(cell) = self.table.get(source, ctype) {
                let copy = factory
                    .clone_box(&*cell.data)
                    .map_err(|err| EcsError::Serialization {
                        component: self.registry.name_of(ctype).to_owned(),
                        source: err,
                    })?;
                copies.push((ctype, copy));
            }
        }
        let coords = self.spatial(source).and_then(SpatialComponent::coordinates);
        let prototype = self.metadata(source).and_then(|meta| meta.prototype().cloned());

        let id = self.allocate_row(None, EntityKind::Entity)?;
        if let Err(err) = self.finish_clone(id, source, copies, stage, coords) {
            self.discard(id);
            return Err(EcsError::EntityCreation {
                entity: id,
                prototype,
                source: Box::new(err),
            });
        }
        tracing::debug!(entity = %id, %source, "cloned entity");
        Ok(id)
    }

    fn finish_clone(
        &mut self,
        id: EntityId,
        source: EntityId,
        copies: Vec<(ComponentTypeId, Box<dyn Component>)>,
        stage: EntityLifeStage,
        coords: Option<MapCoordinates>,
    ) -> Result<(), EcsError> {
        for (ctype, data) in copies {
            self.attach(id, ctype, data)?;
        }
        if let Some(meta) = self.metadata_mut(id) {
            meta.set_map_initialized(false);
        }
        // The copied spatial component still names the source's map.
        self.place(id, None)?;
        if let Some(coords) = coords {
            self.place(id, Some(coords))?;
        }
        if stage >= EntityLifeStage::Initialized {
            self.initialize(id)?;
        }
        if stage >= EntityLifeStage::Started {
            self.start(id)?;
        }
        self.raise_by_ref(id, &mut EntityCloned { source })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn entity_exists(&self, id: EntityId) -> bool {
        self.table.contains(id)
    }

    pub fn entity_count(&self) -> usize {
        self.table.len()
    }

    /// Live entity ids, ascending.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.table.ids()
    }

    pub fn life_stage(&self, id: EntityId) -> Option<EntityLifeStage> {
        self.table.stage(id)
    }

    pub fn entity_kind(&self, id: EntityId) -> Option<EntityKind> {
        self.table.kind(id)
    }

    /// Live, not terminating, and marked alive in its metadata.
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.table
            .stage(id)
            .is_some_and(|stage| stage < EntityLifeStage::Terminating)
            && self.metadata(id).is_some_and(MetaDataComponent::is_alive)
    }

    pub fn is_dead_and_buried(&self, id: EntityId) -> bool {
        self.metadata(id)
            .map_or(true, MetaDataComponent::is_dead_and_buried)
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("entities", &self.table.len())
            .field("component_types", &self.registry.len())
            .field("prototypes", &self.prototypes.len())
            .field("queued_deletions", &self.queued_deletions.len())
            .field("bus", &self.bus)
            .finish()
    }
}
