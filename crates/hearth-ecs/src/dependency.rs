//! Declared dependencies between components on the same entity.
//!
//! A component that needs a sibling declares a [`Dependency<T>`] field and
//! exposes it from [`Component::dependencies`]. The manager binds every slot
//! whenever the entity's component set changes: a slot is bound exactly when
//! a `T` is attached to the same entity, and cleared otherwise.
//!
//! Slots hold a handle, never a reference, so mutual dependencies are fine:
//! both sides simply record the owning entity.
//!
//! ```
//! use hearth_ecs::prelude::*;
//!
//! #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
//! struct Inventory { slots: u32 }
//! impl Component for Inventory {}
//!
//! #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
//! struct Equipment {
//!     #[serde(skip)]
//!     inventory: Dependency<Inventory>,
//! }
//! impl Component for Equipment {
//!     fn dependencies(&mut self) -> Vec<&mut dyn DependencySlot> {
//!         vec![&mut self.inventory]
//!     }
//! }
//!
//! let mut manager = EntityManager::new();
//! manager.register_component::<Inventory>("Inventory", ComponentTarget::Entity).unwrap();
//! manager.register_component::<Equipment>("Equipment", ComponentTarget::Entity).unwrap();
//! let e = manager.allocate(None, None).unwrap();
//! manager.add_component::<Equipment>(e).unwrap();
//! assert!(!manager.get_component::<Equipment>(e).unwrap().inventory.is_resolved());
//! manager.add_component::<Inventory>(e).unwrap();
//! let dep = manager.get_component::<Equipment>(e).unwrap().inventory;
//! assert_eq!(dep.get(&manager).unwrap().slots, 0);
//! ```

use crate::component::Component;
use crate::entity::EntityId;
use crate::manager::EntityManager;
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

// ---------------------------------------------------------------------------
// DependencySlot
// ---------------------------------------------------------------------------

/// Type-erased view of a [`Dependency`] field.
pub trait DependencySlot {
    /// Rust type of the sibling component this slot wants.
    fn target_type(&self) -> TypeId;

    /// Point the slot at `owner`, or clear it.
    fn bind(&mut self, owner: Option<EntityId>);

    fn is_resolved(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Dependency<T>
// ---------------------------------------------------------------------------

/// Handle to a sibling component of type `T`.
pub struct Dependency<T: Component> {
    owner: Option<EntityId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> Dependency<T> {
    pub fn new() -> Self {
        Self {
            owner: None,
            _marker: PhantomData,
        }
    }

    /// Whether the sibling was present at the last resolution.
    pub fn is_resolved(&self) -> bool {
        self.owner.is_some()
    }

    /// Entity that owns both components, once resolved.
    pub fn entity(&self) -> Option<EntityId> {
        self.owner
    }

    pub fn get<'m>(&self, manager: &'m EntityManager) -> Option<&'m T> {
        self.owner
            .and_then(|owner| manager.try_get_component::<T>(owner))
    }

    pub fn get_mut<'m>(&self, manager: &'m mut EntityManager) -> Option<&'m mut T> {
        self.owner
            .and_then(move |owner| manager.try_get_component_mut::<T>(owner))
    }
}

impl<T: Component> DependencySlot for Dependency<T> {
    fn target_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn bind(&mut self, owner: Option<EntityId>) {
        self.owner = owner;
    }

    fn is_resolved(&self) -> bool {
        self.owner.is_some()
    }
}

impl<T: Component> Default for Dependency<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> Clone for Dependency<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Component> Copy for Dependency<T> {}

impl<T: Component> fmt::Debug for Dependency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("target", &std::any::type_name::<T>())
            .field("owner", &self.owner)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Bind every slot of `component` against the set of Rust types currently
/// attached to `owner`. Returns the number of slots left unresolved.
pub(crate) fn bind_slots(
    owner: EntityId,
    component: &mut dyn Component,
    present: &HashSet<TypeId>,
) -> usize {
    let mut unresolved = 0;
    for slot in component.dependencies() {
        if present.contains(&slot.target_type()) {
            slot.bind(Some(owner));
        } else {
            slot.bind(None);
            unresolved += 1;
        }
    }
    unresolved
}
