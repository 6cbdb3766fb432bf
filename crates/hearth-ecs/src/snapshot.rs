//! World snapshot and restore support.
//!
//! A [`WorldSnapshot`] holds the id watermark, the registered maps, and every
//! entity with its components serialized by registered name, in attachment
//! order. Restoring flushes the current world and re-creates each entity under
//! its saved id, then initializes and starts them all. Map initialization is
//! never re-run: whether it already happened is part of each entity's saved
//! metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entity::{EntityId, EntityKind, EntityLifeStage};
use crate::manager::EntityManager;
use crate::metadata::MetaDataComponent;
use crate::prototype::ComponentData;
use crate::spatial::{MapId, SpatialComponent};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One saved entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    #[serde(default)]
    pub kind: EntityKind,
    /// Components in attachment order.
    pub components: Vec<ComponentData>,
}

/// One registered map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub id: MapId,
    pub entity: Option<EntityId>,
    pub initialized: bool,
}

/// A complete, serializable picture of the entity manager's world state.
///
/// Component registrations, prototypes, and event subscriptions are code,
/// not state, and are not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Raw value the next fresh allocation would have received.
    pub next_uid: u64,
    pub maps: Vec<MapSnapshot>,
    /// Entities ascending by id.
    pub entities: Vec<EntitySnapshot>,
}

// ---------------------------------------------------------------------------
// EntityManager snapshot/restore impl
// ---------------------------------------------------------------------------

impl EntityManager {
    /// Capture every live entity.
    ///
    /// Entities that are mid-deletion are skipped. A component that fails to
    /// serialize is skipped with a warning.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let mut entities = Vec::new();
        for id in self.table.ids() {
            let Some(row) = self.table.row(id) else {
                continue;
            };
            if row.stage >= EntityLifeStage::Terminating {
                continue;
            }

            let mut components = Vec::with_capacity(row.components.len());
            for ctype in &row.components {
                let (Some(factory), Some(cell)) =
                    (self.registry().factory(*ctype), self.table.get(id, *ctype))
                else {
                    continue;
                };
                let name = self.registry().name_of(*ctype);
                match factory.to_node(&*cell.data) {
                    Ok(data) => components.push(ComponentData {
                        type_name: name.to_owned(),
                        data,
                    }),
                    Err(error) => tracing::warn!(
                        entity = %id,
                        component = name,
                        %error,
                        "component failed to serialize -- skipping in snapshot"
                    ),
                }
            }

            entities.push(EntitySnapshot {
                id,
                kind: row.kind,
                components,
            });
        }

        let maps = self
            .spatial
            .maps()
            .map(|(id, entity, initialized)| MapSnapshot {
                id,
                entity,
                initialized,
            })
            .collect();

        WorldSnapshot {
            next_uid: self.table.watermark(),
            maps,
            entities,
        }
    }

    /// Replace the current world with `snapshot`.
    ///
    /// Component names and entity ids are validated before anything is
    /// touched. Failures after that point leave the world partially restored.
    pub fn restore_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<(), EcsError> {
        // 1. Pre-validate names and ids before clearing any state.
        let mut seen = HashSet::new();
        for entity in &snapshot.entities {
            if !entity.id.is_valid() || entity.id.to_raw() == u64::MAX {
                return Err(EcsError::InvalidEntityId { entity: entity.id });
            }
            if !seen.insert(entity.id) {
                return Err(EcsError::DuplicateEntityId { entity: entity.id });
            }
            for component in &entity.components {
                self.registry().require_by_name(&component.type_name)?;
            }
        }

        // 2. Drop the current world.
        let flushed = self.flush_entities();

        // 3. Move the watermark past every saved id. It never moves back:
        //    ids issued earlier in this process stay retired.
        let highest = snapshot
            .entities
            .iter()
            .map(|e| e.id.to_raw().saturating_add(1))
            .max()
            .unwrap_or(0);
        let next = snapshot
            .next_uid
            .max(highest)
            .max(self.table.watermark());
        self.table.restore_watermark(next);

        // 4. Maps.
        for map in &snapshot.maps {
            self.spatial.register_map(map.id, map.entity, map.initialized);
        }

        // 5. Entities with their saved ids and data.
        for entity in &snapshot.entities {
            let id = self.allocate_row(Some(entity.id), entity.kind)?;
            self.attach_mandatory(id)?;
            self.populate(id, &entity.components)?;
            self.restore_placement(id, entity.kind);
        }

        // 6. Bring everything back to life.
        for entity in &snapshot.entities {
            self.initialize(entity.id)?;
        }
        for entity in &snapshot.entities {
            self.start(entity.id)?;
        }

        tracing::info!(
            flushed,
            restored = snapshot.entities.len(),
            maps = snapshot.maps.len(),
            "restored world snapshot"
        );
        Ok(())
    }

    /// Re-stamp the kind and re-index the map placement after overlaying
    /// saved metadata and spatial data.
    fn restore_placement(&mut self, id: EntityId, kind: EntityKind) {
        if let Some(meta) = self.metadata_mut(id) {
            let prototype = meta.prototype().cloned();
            meta.stamp(kind, prototype);
        }
        let Some(map) = self.spatial(id).and_then(SpatialComponent::map) else {
            return;
        };
        if !self.spatial.insert(map, id) {
            tracing::warn!(entity = %id, %map, "saved entity refers to an unknown map -- detaching");
            if let Err(error) = self.remove_from_map(id) {
                tracing::warn!(entity = %id, %error, "failed to detach entity");
            }
        }
    }

    /// Whether map initialization already ran for `id`, according to its
    /// metadata.
    pub fn is_entity_map_initialized(&self, id: EntityId) -> bool {
        self.metadata(id)
            .is_some_and(MetaDataComponent::is_map_initialized)
    }
}
