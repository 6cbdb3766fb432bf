//! Raw entity and component storage.
//!
//! The table knows nothing about events or hooks: it stores rows, component
//! cells, and the id watermark. [`EntityManager`](crate::EntityManager) layers
//! the lifecycle on top.

use crate::component::{Component, ComponentLifeStage, ComponentTypeId};
use crate::entity::{EntityId, EntityKind, EntityLifeStage, EntityUidGenerator};
use crate::EcsError;
use std::collections::{BTreeMap, HashMap};

/// Per-entity bookkeeping.
#[derive(Debug)]
pub(crate) struct EntityRow {
    pub kind: EntityKind,
    pub stage: EntityLifeStage,
    /// Attached component types, in attachment order.
    pub components: Vec<ComponentTypeId>,
    /// The subset of `components` that declare dependency slots.
    pub dependents: Vec<ComponentTypeId>,
}

/// One attached component instance.
#[derive(Debug)]
pub(crate) struct ComponentCell {
    pub stage: ComponentLifeStage,
    pub data: Box<dyn Component>,
}

#[derive(Debug, Default)]
pub(crate) struct EntityTable {
    uids: EntityUidGenerator,
    rows: BTreeMap<EntityId, EntityRow>,
    storages: HashMap<ComponentTypeId, BTreeMap<EntityId, ComponentCell>>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    // -- ids --

    pub fn next_id(&mut self) -> Result<EntityId, EcsError> {
        self.uids.next_id()
    }

    pub fn claim_id(&mut self, id: EntityId) -> Result<(), EcsError> {
        if self.rows.contains_key(&id) {
            return Err(EcsError::DuplicateEntityId { entity: id });
        }
        self.uids.claim(id)
    }

    pub fn has_issued(&self, id: EntityId) -> bool {
        self.uids.has_issued(id)
    }

    pub fn watermark(&self) -> u64 {
        self.uids.watermark()
    }

    pub fn restore_watermark(&mut self, next: u64) {
        self.uids.restore(next);
    }

    // -- rows --

    pub fn insert_row(&mut self, id: EntityId, kind: EntityKind) {
        self.rows.insert(
            id,
            EntityRow {
                kind,
                stage: EntityLifeStage::Allocated,
                components: Vec::new(),
                dependents: Vec::new(),
            },
        );
    }

    /// Remove a row together with any cells still attached to it.
    pub fn remove_row(&mut self, id: EntityId) -> Option<EntityRow> {
        let row = self.rows.remove(&id)?;
        for ctype in &row.components {
            if let Some(storage) = self.storages.get_mut(ctype) {
                storage.remove(&id);
            }
        }
        Some(row)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn row(&self, id: EntityId) -> Option<&EntityRow> {
        self.rows.get(&id)
    }

    pub fn stage(&self, id: EntityId) -> Option<EntityLifeStage> {
        self.rows.get(&id).map(|row| row.stage)
    }

    pub fn set_stage(&mut self, id: EntityId, stage: EntityLifeStage) {
        if let Some(row) = self.rows.get_mut(&id) {
            row.stage = stage;
        }
    }

    pub fn kind(&self, id: EntityId) -> Option<EntityKind> {
        self.rows.get(&id).map(|row| row.kind)
    }

    pub fn component_types(&self, id: EntityId) -> Option<&[ComponentTypeId]> {
        self.rows.get(&id).map(|row| row.components.as_slice())
    }

    /// Live entity ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.rows.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    // -- cells --

    /// Attach `data` as `ctype`. The caller has checked the target kind.
    pub fn attach(
        &mut self,
        id: EntityId,
        ctype: ComponentTypeId,
        mut data: Box<dyn Component>,
    ) -> Result<(), EcsError> {
        let Some(row) = self.rows.get_mut(&id) else {
            return Err(EcsError::UnknownEntity { entity: id });
        };
        if row.components.contains(&ctype) {
            return Err(EcsError::DuplicateComponent {
                entity: id,
                component: format!("{ctype:?}"),
            });
        }
        row.components.push(ctype);
        if !data.dependencies().is_empty() {
            row.dependents.push(ctype);
        }
        self.storages.entry(ctype).or_default().insert(
            id,
            ComponentCell {
                stage: ComponentLifeStage::Added,
                data,
            },
        );
        Ok(())
    }

    pub fn detach(&mut self, id: EntityId, ctype: ComponentTypeId) -> Option<ComponentCell> {
        let row = self.rows.get_mut(&id)?;
        row.components.retain(|c| *c != ctype);
        row.dependents.retain(|c| *c != ctype);
        self.storages.get_mut(&ctype)?.remove(&id)
    }

    pub fn get(&self, id: EntityId, ctype: ComponentTypeId) -> Option<&ComponentCell> {
        self.storages.get(&ctype)?.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId, ctype: ComponentTypeId) -> Option<&mut ComponentCell> {
        self.storages.get_mut(&ctype)?.get_mut(&id)
    }

    /// Every `(entity, cell)` of one component type, ascending by entity.
    pub fn storage(
        &self,
        ctype: ComponentTypeId,
    ) -> impl Iterator<Item = (EntityId, &ComponentCell)> + '_ {
        self.storages
            .get(&ctype)
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(id, cell)| (*id, cell)))
    }
}
