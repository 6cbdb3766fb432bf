//! The mandatory metadata component.

use crate::component::Component;
use crate::entity::EntityKind;
use crate::prototype::PrototypeId;
use serde::{Deserialize, Serialize};

/// Whether an entity takes part in the game world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityGameLiveness {
    #[default]
    Alive,
    /// Present but invisible to most game logic.
    Hidden,
    /// Kept around only until it can be cleaned up.
    DeadAndBuried,
}

/// Identity and bookkeeping attached to every entity.
///
/// The prototype and kind are stamped by the manager; data overlays cannot
/// change them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaDataComponent {
    pub name: Option<String>,
    pub liveness: EntityGameLiveness,
    prototype: Option<PrototypeId>,
    kind: EntityKind,
    map_initialized: bool,
}

impl MetaDataComponent {
    pub(crate) fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn prototype(&self) -> Option<&PrototypeId> {
        self.prototype.as_ref()
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Whether map initialization has already run for this entity.
    pub fn is_map_initialized(&self) -> bool {
        self.map_initialized
    }

    pub fn is_alive(&self) -> bool {
        self.liveness == EntityGameLiveness::Alive
    }

    pub fn is_dead_and_buried(&self) -> bool {
        self.liveness == EntityGameLiveness::DeadAndBuried
    }

    pub(crate) fn stamp(&mut self, kind: EntityKind, prototype: Option<PrototypeId>) {
        self.kind = kind;
        self.prototype = prototype;
    }

    pub(crate) fn set_map_initialized(&mut self, value: bool) {
        self.map_initialized = value;
    }
}

impl Component for MetaDataComponent {}
