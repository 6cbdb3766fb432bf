//! Save games: a world snapshot plus tick state, sealed with a BLAKE3 hash.
//!
//! ```
//! use hearth_sim::prelude::*;
//!
//! let mut tick_loop = TickLoop::new(EntityManager::new(), TickConfig::default()).unwrap();
//! tick_loop.world_mut().allocate(None, None).unwrap();
//! tick_loop.run_ticks(10).unwrap();
//!
//! let save = tick_loop.capture_save();
//! assert_eq!(save.tick_counter, 10);
//! assert_eq!(save.hash.len(), 64); // BLAKE3 hex digest
//!
//! let json = save.to_json().unwrap();
//! let loaded = SaveGame::from_json(&json).unwrap();
//!
//! tick_loop.run_ticks(5).unwrap();
//! tick_loop.restore_save(&loaded).unwrap();
//! assert_eq!(tick_loop.tick_count(), 10);
//! assert_eq!(tick_loop.state_hash(), save.hash);
//! ```
//!
//! Component registrations, prototypes, event subscriptions, and systems are
//! code rather than state: they are not saved, and restoring on the same
//! [`TickLoop`] keeps them. Restored entities are initialized and started but
//! never map-initialized a second time.

use hearth_ecs::snapshot::WorldSnapshot;
use serde::{Deserialize, Serialize};

use crate::tick::{check_fixed_dt, TickLoop};

// ---------------------------------------------------------------------------
// SaveGame
// ---------------------------------------------------------------------------

/// A serializable save of the whole simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    /// Every entity with its components, plus maps and the id watermark.
    pub world: WorldSnapshot,
    /// Number of ticks executed at the time of capture.
    pub tick_counter: u64,
    /// Fixed time step in seconds per tick.
    pub fixed_dt: f64,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the fields above.
    pub hash: String,
}

impl SaveGame {
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("failed to serialize save game: {e}"))
    }

    /// Parse a save game. The hash is checked on restore, not here.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("failed to parse save game: {e}"))
    }

    /// Recompute the digest from the saved fields.
    pub fn compute_hash(&self) -> anyhow::Result<String> {
        compute_hash(&self.world, self.tick_counter, self.fixed_dt)
    }
}

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest of the canonical JSON encoding of the saved state.
fn compute_hash(world: &WorldSnapshot, tick_counter: u64, fixed_dt: f64) -> anyhow::Result<String> {
    #[derive(Serialize)]
    struct HashableState<'a> {
        world: &'a WorldSnapshot,
        tick_counter: u64,
        fixed_dt: f64,
    }

    let hashable = HashableState {
        world,
        tick_counter,
        fixed_dt,
    };
    let json_bytes = serde_json::to_vec(&hashable)
        .map_err(|e| anyhow::anyhow!("failed to encode state for hashing: {e}"))?;
    Ok(blake3::hash(&json_bytes).to_hex().to_string())
}

// ---------------------------------------------------------------------------
// TickLoop save/restore methods
// ---------------------------------------------------------------------------

impl TickLoop {
    /// Capture the world, tick counter, and time step.
    pub fn capture_save(&self) -> SaveGame {
        let world = self.world().capture_snapshot();
        let tick_counter = self.tick_count();
        let fixed_dt = self.fixed_dt();
        let hash = compute_hash(&world, tick_counter, fixed_dt).unwrap_or_else(|error| {
            tracing::error!(%error, "save game could not be hashed");
            String::new()
        });

        SaveGame {
            world,
            tick_counter,
            fixed_dt,
            hash,
        }
    }

    /// Replace the simulation state with `save`.
    ///
    /// The time step and hash are verified first; on a mismatch nothing is
    /// touched. World-level validation (unknown component names, duplicate
    /// ids) also happens before the current world is flushed.
    pub fn restore_save(&mut self, save: &SaveGame) -> anyhow::Result<()> {
        check_fixed_dt(save.fixed_dt)
            .map_err(|e| anyhow::anyhow!("save game has invalid time step: {e}"))?;

        let expected_hash = save.compute_hash()?;
        if expected_hash != save.hash {
            return Err(anyhow::anyhow!(
                "save game hash mismatch: recorded {} but recomputed {}. \
                 The save may be corrupted or tampered with.",
                save.hash,
                expected_hash
            ));
        }

        self.world_mut()
            .restore_snapshot(&save.world)
            .map_err(|e| anyhow::anyhow!("failed to restore world from save: {e}"))?;
        self.set_tick_counter(save.tick_counter);
        self.set_fixed_dt(save.fixed_dt);

        tracing::info!(
            tick = save.tick_counter,
            entities = save.world.entities.len(),
            "restored save game"
        );
        Ok(())
    }

    /// BLAKE3 hex digest of the current state, as a save would record it.
    pub fn state_hash(&self) -> String {
        self.capture_save().hash
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
