//! Component behaviour, type registration, and factories.
//!
//! A component is any `'static` type implementing [`Component`]. Before it can
//! be attached to an entity it must be registered in a [`ComponentRegistry`]
//! under a unique textual name; the name is what prototypes and save data use
//! to refer to the type. Registration yields a [`ComponentTypeId`] plus a
//! [`ComponentFactory`] that can build, serialize, overlay, and clone
//! instances without knowing the concrete type.

use crate::dependency::DependencySlot;
use crate::entity::{EntityId, EntityKind};
use crate::serialization::{self, DataNode, SerializationError};
use crate::EcsError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Upcast helper so trait objects can be downcast back to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behaviour shared by every component type.
///
/// All hooks default to no-ops and receive the owning entity's id, which is
/// fixed for as long as the component stays attached. They run while the
/// owning entity advances through its lifecycle; components added late are
/// caught up so that their hooks still run exactly once and in order.
pub trait Component: AsAny + fmt::Debug {
    /// Runs once while the owning entity is initializing.
    fn on_initialize(&mut self, _owner: EntityId) {}

    /// Runs once while the owning entity is starting.
    fn on_startup(&mut self, _owner: EntityId) {}

    /// Runs when a started component is being torn down.
    fn on_shutdown(&mut self, _owner: EntityId) {}

    /// Runs right before the component leaves its entity.
    fn on_remove(&mut self, _owner: EntityId) {}

    /// Dependency slots the manager should bind to sibling components.
    fn dependencies(&mut self) -> Vec<&mut dyn DependencySlot> {
        Vec::new()
    }
}

impl dyn Component {
    /// Whether the concrete type behind this trait object is `T`.
    pub fn is<T: Component>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Components that can be built from data: default-constructible and
/// round-trippable through serde. Implemented automatically.
pub trait DataComponent: Component + Default + Serialize + DeserializeOwned {}

impl<T> DataComponent for T where T: Component + Default + Serialize + DeserializeOwned {}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentTarget / ComponentLifeStage
// ---------------------------------------------------------------------------

/// Which entity kinds a component type may be attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentTarget {
    #[default]
    Entity,
    Map,
    Any,
}

impl ComponentTarget {
    /// Whether an entity of `kind` accepts components with this target.
    pub fn allows(self, kind: EntityKind) -> bool {
        matches!(
            (self, kind),
            (ComponentTarget::Any, _)
                | (ComponentTarget::Entity, EntityKind::Entity)
                | (ComponentTarget::Map, EntityKind::Map)
        )
    }
}

/// Per-instance lifecycle of an attached component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentLifeStage {
    Added,
    Initialized,
    Started,
    Removed,
}

// ---------------------------------------------------------------------------
// ComponentFactory
// ---------------------------------------------------------------------------

/// Type-erased constructors and serializers for one component type.
///
/// Built with [`ComponentFactory::of`]; every entry is a plain function
/// pointer monomorphized for the concrete type.
#[derive(Clone, Copy)]
pub struct ComponentFactory {
    type_id: TypeId,
    type_name: &'static str,
    create: fn() -> Box<dyn Component>,
    from_node: fn(&DataNode) -> Result<Box<dyn Component>, SerializationError>,
    to_node: fn(&dyn Component) -> Result<DataNode, SerializationError>,
    apply_node: fn(&mut dyn Component, &DataNode) -> Result<(), SerializationError>,
    clone_box: fn(&dyn Component) -> Result<Box<dyn Component>, SerializationError>,
}

impl ComponentFactory {
    /// Factory for a data-driven component type.
    pub fn of<T: DataComponent>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            create: create_default::<T>,
            from_node: from_node::<T>,
            to_node: to_node::<T>,
            apply_node: apply_node::<T>,
            clone_box: clone_box::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// A fresh default instance.
    pub fn create(&self) -> Box<dyn Component> {
        (self.create)()
    }

    /// Build an instance from a data node, layered over the type's defaults.
    pub fn from_node(&self, node: &DataNode) -> Result<Box<dyn Component>, SerializationError> {
        (self.from_node)(node)
    }

    /// Serialize an instance to a data node.
    pub fn to_node(&self, component: &dyn Component) -> Result<DataNode, SerializationError> {
        (self.to_node)(component)
    }

    /// Overlay the fields present in `node` onto an existing instance.
    pub fn apply_node(
        &self,
        component: &mut dyn Component,
        node: &DataNode,
    ) -> Result<(), SerializationError> {
        (self.apply_node)(component, node)
    }

    /// Deep copy through the serialized form.
    pub fn clone_box(
        &self,
        component: &dyn Component,
    ) -> Result<Box<dyn Component>, SerializationError> {
        (self.clone_box)(component)
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn create_default<T: DataComponent>() -> Box<dyn Component> {
    Box::new(T::default())
}

fn downcast<T: DataComponent>(component: &dyn Component) -> Result<&T, SerializationError> {
    component
        .downcast_ref::<T>()
        .ok_or(SerializationError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })
}

fn from_node<T: DataComponent>(node: &DataNode) -> Result<Box<dyn Component>, SerializationError> {
    let mut base = serialization::write_value(&T::default())?;
    serialization::merge_nodes(&mut base, node);
    Ok(Box::new(serialization::read_value::<T>(&base)?))
}

fn to_node<T: DataComponent>(component: &dyn Component) -> Result<DataNode, SerializationError> {
    serialization::write_value(downcast::<T>(component)?)
}

fn apply_node<T: DataComponent>(
    component: &mut dyn Component,
    node: &DataNode,
) -> Result<(), SerializationError> {
    let mut base = serialization::write_value(downcast::<T>(component)?)?;
    serialization::merge_nodes(&mut base, node);
    let updated = serialization::read_value::<T>(&base)?;
    match component.downcast_mut::<T>() {
        Some(slot) => {
            *slot = updated;
            Ok(())
        }
        None => Err(SerializationError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }),
    }
}

fn clone_box<T: DataComponent>(
    component: &dyn Component,
) -> Result<Box<dyn Component>, SerializationError> {
    let mut copy = T::default();
    serialization::copy(downcast::<T>(component)?, &mut copy)?;
    Ok(Box::new(copy))
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique ID assigned at registration time.
    pub id: ComponentTypeId,
    /// Name used by prototypes and save data.
    pub name: String,
    /// Entity kinds this component may be attached to.
    pub target: ComponentTarget,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
    /// `std::any::type_name` of the concrete type, for diagnostics.
    pub type_name: &'static str,
}

// ---------------------------------------------------------------------------
// ComponentManifest
// ---------------------------------------------------------------------------

/// A batch of component registrations, applied at once with
/// [`ComponentRegistry::register_manifest`].
///
/// ```
/// use hearth_ecs::prelude::*;
///
/// #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
/// struct Hunger { value: u32 }
/// impl Component for Hunger {}
///
/// let manifest = ComponentManifest::new().with::<Hunger>("Hunger");
/// let mut registry = ComponentRegistry::new();
/// registry.register_manifest(&manifest).unwrap();
/// assert!(registry.lookup_by_name("Hunger").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ComponentManifest {
    entries: Vec<(String, ComponentTarget, ComponentFactory)>,
}

impl ComponentManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity-targeted component type.
    pub fn with<T: DataComponent>(self, name: &str) -> Self {
        self.with_target::<T>(name, ComponentTarget::Entity)
    }

    /// Add a component type with an explicit target.
    pub fn with_target<T: DataComponent>(mut self, name: &str, target: ComponentTarget) -> Self {
        self.entries
            .push((name.to_owned(), target, ComponentFactory::of::<T>()));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping component names and Rust types to [`ComponentTypeId`]s,
/// their metadata, and their factories.
///
/// Names and Rust types are both unique: registering either a second time is
/// an error rather than a silent alias.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    /// TypeId -> ComponentTypeId.
    by_type: HashMap<TypeId, ComponentTypeId>,
    /// Name -> ComponentTypeId for prototype and save lookups.
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by ComponentTypeId.0.
    infos: Vec<ComponentInfo>,
    /// Indexed by ComponentTypeId.0.
    factories: Vec<ComponentFactory>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`, attachable to entities of `target` kind.
    pub fn register<T: DataComponent>(
        &mut self,
        name: &str,
        target: ComponentTarget,
    ) -> Result<ComponentTypeId, EcsError> {
        self.register_factory(name, target, ComponentFactory::of::<T>())
    }

    /// Register a component type from an already-built factory.
    pub fn register_factory(
        &mut self,
        name: &str,
        target: ComponentTarget,
        factory: ComponentFactory,
    ) -> Result<ComponentTypeId, EcsError> {
        if self.by_name.contains_key(name) {
            return Err(EcsError::DuplicateComponentName {
                name: name.to_owned(),
            });
        }
        if let Some(existing) = self.by_type.get(&factory.type_id()) {
            return Err(EcsError::DuplicateComponentType {
                type_name: factory.type_name(),
                existing: self.infos[existing.0 as usize].name.clone(),
            });
        }

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: name.to_owned(),
            target,
            type_id: factory.type_id(),
            type_name: factory.type_name(),
        });
        self.factories.push(factory);
        self.by_type.insert(factory.type_id(), id);
        self.by_name.insert(name.to_owned(), id);
        tracing::debug!(component = name, ?id, ?target, "registered component type");
        Ok(id)
    }

    /// Register every entry of `manifest`, stopping at the first failure.
    pub fn register_manifest(
        &mut self,
        manifest: &ComponentManifest,
    ) -> Result<Vec<ComponentTypeId>, EcsError> {
        manifest
            .entries
            .iter()
            .map(|(name, target, factory)| self.register_factory(name, *target, *factory))
            .collect()
    }

    /// Look up a component type by its Rust type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up a component type by its Rust `TypeId`.
    pub fn lookup_type_id(&self, type_id: TypeId) -> Option<ComponentTypeId> {
        self.by_type.get(&type_id).copied()
    }

    /// Look up a component type by its registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Like [`lookup_by_name`](Self::lookup_by_name) but with a descriptive
    /// error listing the registered names.
    pub fn require_by_name(&self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.lookup_by_name(name)
            .ok_or_else(|| EcsError::UnknownComponent {
                name: name.to_owned(),
                registered: self.registered_names().join(", "),
            })
    }

    /// Get the [`ComponentInfo`] for a registered component type ID.
    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.0 as usize)
    }

    /// Get the factory for a registered component type ID.
    pub fn factory(&self, id: ComponentTypeId) -> Option<ComponentFactory> {
        self.factories.get(id.0 as usize).copied()
    }

    /// Registered name of `id`, or `"<unregistered>"`.
    pub fn name_of(&self, id: ComponentTypeId) -> &str {
        self.get_info(id)
            .map(|info| info.name.as_str())
            .unwrap_or("<unregistered>")
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Returns the names of all registered component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Stats {
        strength: i32,
        speed: i32,
    }
    impl Component for Stats {}

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Weather {
        raining: bool,
    }
    impl Component for Weather {}

    #[test]
    fn register_and_lookup() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Stats>("Stats", ComponentTarget::Entity).unwrap();
        assert_eq!(reg.lookup::<Stats>(), Some(id));
        assert_eq!(reg.lookup_by_name("Stats"), Some(id));
        assert_eq!(reg.name_of(id), "Stats");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Stats>("Shared", ComponentTarget::Entity)
            .unwrap();
        let err = reg
            .register::<Weather>("Shared", ComponentTarget::Map)
            .unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentName { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Stats>("Stats", ComponentTarget::Entity)
            .unwrap();
        let err = reg
            .register::<Stats>("StatsAgain", ComponentTarget::Entity)
            .unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentType { .. }));
    }

    #[test]
    fn unknown_name_lists_registered() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Stats>("Stats", ComponentTarget::Entity)
            .unwrap();
        let err = reg.require_by_name("Nope").unwrap_err();
        assert!(err.to_string().contains("Stats"));
    }

    #[test]
    fn targets() {
        assert!(ComponentTarget::Entity.allows(EntityKind::Entity));
        assert!(!ComponentTarget::Entity.allows(EntityKind::Map));
        assert!(ComponentTarget::Map.allows(EntityKind::Map));
        assert!(ComponentTarget::Any.allows(EntityKind::Map));
    }

    #[test]
    fn manifest_registers_all_entries() {
        let manifest = ComponentManifest::new()
            .with::<Stats>("Stats")
            .with_target::<Weather>("Weather", ComponentTarget::Map);
        let mut reg = ComponentRegistry::new();
        let ids = reg.register_manifest(&manifest).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(reg.get_info(ids[1]).unwrap().target, ComponentTarget::Map);
    }

    // -- factory --

    #[test]
    fn from_node_merges_over_defaults() {
        let factory = ComponentFactory::of::<Stats>();
        let built = factory.from_node(&json!({ "speed": 4 })).unwrap();
        let stats = built.downcast_ref::<Stats>().unwrap();
        assert_eq!(stats, &Stats { strength: 0, speed: 4 });
    }

    #[test]
    fn apply_node_overlays_only_given_fields() {
        let factory = ComponentFactory::of::<Stats>();
        let mut boxed: Box<dyn Component> = Box::new(Stats {
            strength: 9,
            speed: 1,
        });
        factory
            .apply_node(boxed.as_mut(), &json!({ "speed": 3 }))
            .unwrap();
        assert_eq!(
            boxed.downcast_ref::<Stats>(),
            Some(&Stats {
                strength: 9,
                speed: 3
            })
        );
    }

    #[test]
    fn to_node_rejects_wrong_type() {
        let factory = ComponentFactory::of::<Stats>();
        let weather: Box<dyn Component> = Box::new(Weather { raining: true });
        let err = factory.to_node(weather.as_ref()).unwrap_err();
        assert!(matches!(err, SerializationError::TypeMismatch { .. }));
    }

    #[test]
    fn clone_box_is_deep() {
        let factory = ComponentFactory::of::<Stats>();
        let original: Box<dyn Component> = Box::new(Stats {
            strength: 2,
            speed: 5,
        });
        let mut copy = factory.clone_box(original.as_ref()).unwrap();
        copy.downcast_mut::<Stats>().unwrap().speed = 99;
        assert_eq!(original.downcast_ref::<Stats>().unwrap().speed, 5);
        assert!(factory.create().is::<Stats>());
    }
}
