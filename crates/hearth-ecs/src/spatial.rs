//! Map placement: the mandatory spatial component and the map index.

use crate::component::Component;
use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a map.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u32);

impl fmt::Debug for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapId({})", self.0)
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map#{}", self.0)
    }
}

/// Tile position within a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A map plus a position in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapCoordinates {
    pub map: MapId,
    pub pos: Position,
}

impl MapCoordinates {
    pub const fn new(map: MapId, x: i32, y: i32) -> Self {
        Self {
            map,
            pos: Position::new(x, y),
        }
    }
}

// ---------------------------------------------------------------------------
// SpatialComponent
// ---------------------------------------------------------------------------

/// Where an entity sits. Attached to every entity.
///
/// The map is changed only through `EntityManager::set_coordinates`, which
/// keeps the map index in step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialComponent {
    map: Option<MapId>,
    pub pos: Position,
}

impl SpatialComponent {
    pub fn map(&self) -> Option<MapId> {
        self.map
    }

    pub fn coordinates(&self) -> Option<MapCoordinates> {
        self.map.map(|map| MapCoordinates { map, pos: self.pos })
    }

    pub(crate) fn place(&mut self, coords: Option<MapCoordinates>) {
        match coords {
            Some(coords) => {
                self.map = Some(coords.map);
                self.pos = coords.pos;
            }
            None => self.map = None,
        }
    }
}

impl Component for SpatialComponent {}

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct MapEntry {
    entity: Option<EntityId>,
    initialized: bool,
    members: BTreeSet<EntityId>,
}

/// Which entities live in which map, and which maps are initialized.
#[derive(Debug, Default)]
pub(crate) struct SpatialIndex {
    maps: BTreeMap<MapId, MapEntry>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the map was already registered.
    pub fn register_map(&mut self, map: MapId, entity: Option<EntityId>, initialized: bool) -> bool {
        if self.maps.contains_key(&map) {
            return false;
        }
        self.maps.insert(
            map,
            MapEntry {
                entity,
                initialized,
                members: BTreeSet::new(),
            },
        );
        true
    }

    pub fn unregister_map(&mut self, map: MapId) -> Vec<EntityId> {
        self.maps
            .remove(&map)
            .map(|entry| entry.members.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn contains_map(&self, map: MapId) -> bool {
        self.maps.contains_key(&map)
    }

    /// The map represented by `entity`, if it is a map entity.
    pub fn map_of_entity(&self, entity: EntityId) -> Option<MapId> {
        self.maps
            .iter()
            .find(|(_, entry)| entry.entity == Some(entity))
            .map(|(map, _)| *map)
    }

    pub fn map_entity(&self, map: MapId) -> Option<EntityId> {
        self.maps.get(&map).and_then(|entry| entry.entity)
    }

    pub fn is_initialized(&self, map: MapId) -> bool {
        self.maps.get(&map).is_some_and(|entry| entry.initialized)
    }

    /// Returns `false` if the map is unknown or was already initialized.
    pub fn mark_initialized(&mut self, map: MapId) -> bool {
        match self.maps.get_mut(&map) {
            Some(entry) if !entry.initialized => {
                entry.initialized = true;
                true
            }
            _ => false,
        }
    }

    pub fn insert(&mut self, map: MapId, entity: EntityId) -> bool {
        self.maps
            .get_mut(&map)
            .is_some_and(|entry| entry.members.insert(entity))
    }

    pub fn remove(&mut self, map: MapId, entity: EntityId) -> bool {
        self.maps
            .get_mut(&map)
            .is_some_and(|entry| entry.members.remove(&entity))
    }

    /// Members of `map`, ascending.
    pub fn members(&self, map: MapId) -> Vec<EntityId> {
        self.maps
            .get(&map)
            .map(|entry| entry.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `(map, map entity, initialized)` for every registered map.
    pub fn maps(&self) -> impl Iterator<Item = (MapId, Option<EntityId>, bool)> + '_ {
        self.maps
            .iter()
            .map(|(map, entry)| (*map, entry.entity, entry.initialized))
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_follows_insert_and_remove() {
        let mut index = SpatialIndex::new();
        let map = MapId(1);
        let e = EntityId::new(5);
        assert!(!index.insert(map, e), "unknown map accepts nobody");
        assert!(index.register_map(map, Some(EntityId::new(1)), false));
        assert!(!index.register_map(map, None, false));
        assert!(index.insert(map, e));
        assert_eq!(index.members(map), vec![e]);
        assert!(index.remove(map, e));
        assert!(index.members(map).is_empty());
        assert_eq!(index.map_of_entity(EntityId::new(1)), Some(map));
    }

    #[test]
    fn initialization_happens_once() {
        let mut index = SpatialIndex::new();
        index.register_map(MapId(2), None, false);
        assert!(index.mark_initialized(MapId(2)));
        assert!(!index.mark_initialized(MapId(2)));
        assert!(index.is_initialized(MapId(2)));
        assert!(!index.is_initialized(MapId(3)));
    }

    #[test]
    fn spatial_component_placement() {
        let mut spatial = SpatialComponent::default();
        spatial.place(Some(MapCoordinates::new(MapId(4), 2, 3)));
        assert_eq!(spatial.map(), Some(MapId(4)));
        assert_eq!(spatial.pos, Position::new(2, 3));
        spatial.place(None);
        assert_eq!(spatial.coordinates(), None);
    }
}
