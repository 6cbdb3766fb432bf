//! Entity identifiers, lifecycle stages, and id allocation.
//!
//! An [`EntityId`] is an opaque 64-bit number handed out in strictly
//! increasing order. Ids are never recycled: once an entity is deleted its id
//! stays retired unless a save restoration explicitly re-allocates it.
//! `EntityId(0)` is reserved as the "invalid / none" sentinel.

use crate::EcsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// An opaque, monotonically increasing entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The reserved "no entity" sentinel. Never assigned to a live entity.
    pub const INVALID: EntityId = EntityId(0);

    /// The first id the allocator hands out.
    pub const FIRST: EntityId = EntityId(1);

    /// Construct an id from its raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Whether this id may refer to an entity (i.e. it is not the sentinel).
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityLifeStage
// ---------------------------------------------------------------------------

/// Lifecycle stage of an entity.
///
/// Stages are totally ordered and only ever move forward:
/// `Allocated < Initializing < Initialized < Starting < Started < Terminating < Deleted`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityLifeStage {
    /// The row exists and components may be attached; no hooks have run.
    #[default]
    Allocated,
    /// Component initialize hooks are running.
    Initializing,
    /// Every component has been initialized.
    Initialized,
    /// Component start hooks are running.
    Starting,
    /// The entity is live in the simulation.
    Started,
    /// Deletion is in progress; components are being disposed.
    Terminating,
    /// The entity is gone. Only ever observed by handlers of the final events.
    Deleted,
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// What sort of object an entity represents. Component registrations declare
/// which kinds they may be attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// An ordinary game object (character, item, feature...).
    #[default]
    Entity,
    /// The entity that stands for a whole map.
    Map,
}

// ---------------------------------------------------------------------------
// EntityUidGenerator
// ---------------------------------------------------------------------------

/// Hands out fresh [`EntityId`]s and tracks the allocation watermark.
///
/// Explicit ids (save restoration) push the watermark past themselves so a
/// later fresh allocation can never collide with a restored entity. The ids
/// jumped over that way are remembered as gaps: they were never issued until
/// something claims them.
#[derive(Debug, Clone)]
pub struct EntityUidGenerator {
    next: u64,
    /// Unissued ranges below `next`, as `start -> end` (exclusive).
    gaps: BTreeMap<u64, u64>,
}

impl EntityUidGenerator {
    /// Create a generator whose first id is [`EntityId::FIRST`].
    pub fn new() -> Self {
        Self {
            next: EntityId::FIRST.0,
            gaps: BTreeMap::new(),
        }
    }

    /// Allocate the next unused id.
    pub fn next_id(&mut self) -> Result<EntityId, EcsError> {
        let after = self
            .next
            .checked_add(1)
            .ok_or(EcsError::EntityIdsExhausted)?;
        let id = EntityId(self.next);
        self.next = after;
        Ok(id)
    }

    /// Record that `id` has been claimed explicitly.
    ///
    /// `u64::MAX` is rejected: the watermark must stay above every claimed id.
    pub fn claim(&mut self, id: EntityId) -> Result<(), EcsError> {
        let after = match id.0.checked_add(1) {
            Some(after) if id.is_valid() => after,
            _ => return Err(EcsError::InvalidEntityId { entity: id }),
        };
        if id.0 >= self.next {
            self.push_gap(self.next, id.0);
            self.next = after;
        } else {
            self.fill_gap(id.0);
        }
        Ok(())
    }

    /// Whether `id` was handed out (or claimed) at some point during this
    /// process.
    pub fn has_issued(&self, id: EntityId) -> bool {
        id.is_valid() && id.0 < self.next && self.gap_containing(id.0).is_none()
    }

    /// The raw value the next fresh allocation will receive.
    pub fn watermark(&self) -> u64 {
        self.next
    }

    /// Raise the watermark to `next`, e.g. when restoring a saved world. The
    /// skipped ids count as never issued. A lower value is ignored.
    pub fn restore(&mut self, next: u64) {
        if next > self.next {
            self.push_gap(self.next, next);
            self.next = next;
        }
    }

    fn push_gap(&mut self, start: u64, end: u64) {
        if start < end {
            self.gaps.insert(start, end);
        }
    }

    fn gap_containing(&self, raw: u64) -> Option<(u64, u64)> {
        self.gaps
            .range(..=raw)
            .next_back()
            .filter(|(_, end)| raw < **end)
            .map(|(&start, &end)| (start, end))
    }

    fn fill_gap(&mut self, raw: u64) {
        let Some((start, end)) = self.gap_containing(raw) else {
            return;
        };
        self.gaps.remove(&start);
        self.push_gap(start, raw);
        self.push_gap(raw + 1, end);
    }
}

impl Default for EntityUidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
