//! Fixed-timestep tick loop around an [`EntityManager`].
//!
//! Each tick:
//!
//! 1. Every registered system runs once, in registration order, with mutable
//!    access to the entity manager.
//! 2. Deletions queued during the tick are drained. This is the one point in
//!    a tick where `queue_delete` requests take effect.
//! 3. The tick counter advances.
//!
//! A failing system stops the remaining systems for that tick, but the drain
//! and the counter advance still happen.
//!
//! # Example
//!
//! ```
//! use hearth_sim::prelude::*;
//!
//! fn cull(manager: &mut EntityManager) -> anyhow::Result<()> {
//!     let doomed: Vec<EntityId> = manager.entities().collect();
//!     for id in doomed {
//!         manager.queue_delete(id);
//!     }
//!     Ok(())
//! }
//!
//! let mut tick_loop = TickLoop::new(EntityManager::new(), TickConfig::default()).unwrap();
//! tick_loop.add_system("cull", cull).unwrap();
//! tick_loop.world_mut().allocate(None, None).unwrap();
//!
//! tick_loop.tick().unwrap();
//! assert_eq!(tick_loop.tick_count(), 1);
//! assert_eq!(tick_loop.last_diagnostics().drained_deletions, 1);
//! assert_eq!(tick_loop.world().entity_count(), 0);
//! ```

use std::time::{Duration, Instant};

use anyhow::Context;
use hearth_ecs::EntityManager;

use crate::config::SimConfig;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
}

impl Default for TickConfig {
    /// Defaults to 60 Hz (1/60 second per tick).
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
        }
    }
}

impl From<&SimConfig> for TickConfig {
    fn from(config: &SimConfig) -> Self {
        Self {
            fixed_dt: config.fixed_dt,
        }
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per system that ran, in execution order.
    pub system_times: Vec<(String, Duration)>,
    /// Entities deleted at the end-of-tick drain.
    pub drained_deletions: usize,
    /// Time spent draining queued deletions.
    pub drain_time: Duration,
    /// Total time for the tick (systems + drain).
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// SystemFn
// ---------------------------------------------------------------------------

/// A system run once per tick.
pub type SystemFn = fn(&mut EntityManager) -> anyhow::Result<()>;

#[derive(Debug)]
struct RegisteredSystem {
    name: String,
    func: SystemFn,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The deterministic fixed-timestep tick loop.
///
/// Given the same starting world, the same systems in the same order, and
/// the same subscriptions, every run produces the same world state.
pub struct TickLoop {
    world: EntityManager,
    systems: Vec<RegisteredSystem>,
    tick_counter: u64,
    fixed_dt: f64,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    /// Create a tick loop around `world`. The tick counter starts at 0.
    pub fn new(world: EntityManager, config: TickConfig) -> anyhow::Result<Self> {
        check_fixed_dt(config.fixed_dt)?;
        Ok(Self {
            world,
            systems: Vec::new(),
            tick_counter: 0,
            fixed_dt: config.fixed_dt,
            last_diagnostics: TickDiagnostics::default(),
        })
    }

    /// Create a tick loop and a fresh entity manager from a [`SimConfig`].
    pub fn from_config(config: &SimConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Self::new(EntityManager::with_config(config.ecs.clone()), config.into())
    }

    /// Register a system to run each tick, after every system registered
    /// before it.
    pub fn add_system(&mut self, name: &str, func: SystemFn) -> anyhow::Result<()> {
        self.add_system_after(name, &[], func)
    }

    /// Register a system that must run after each system named in `after`.
    ///
    /// Every name in `after` must already be registered, and the system name
    /// must be unique. Nothing is registered on error. Systems run in
    /// registration order, so every dependency runs first and no cycle can
    /// form.
    pub fn add_system_after(
        &mut self,
        name: &str,
        after: &[&str],
        func: SystemFn,
    ) -> anyhow::Result<()> {
        for dep in after {
            if !self.systems.iter().any(|s| s.name == *dep) {
                return Err(anyhow::anyhow!(
                    "system '{name}' declares dependency on '{dep}', but '{dep}' is not registered"
                ));
            }
        }
        if self.systems.iter().any(|s| s.name == name) {
            return Err(anyhow::anyhow!("duplicate system name: {name:?}"));
        }

        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
        });
        tracing::debug!(system = name, ?after, "registered system");
        Ok(())
    }

    /// Execute one simulation tick.
    ///
    /// Returns the first system error, with the system's name as context.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        let tick_start = Instant::now();
        let mut system_times = Vec::with_capacity(self.systems.len());

        // Phase 1: systems, in registration order.
        let mut outcome = Ok(());
        for system in &self.systems {
            let sys_start = Instant::now();
            let result = (system.func)(&mut self.world);
            system_times.push((system.name.clone(), sys_start.elapsed()));
            if let Err(err) = result {
                tracing::error!(system = %system.name, tick = self.tick_counter, error = %err, "system failed");
                outcome = Err(err).with_context(|| {
                    format!("system '{}' failed on tick {}", system.name, self.tick_counter)
                });
                break;
            }
        }

        // Phase 2: deferred deletions.
        let drain_start = Instant::now();
        let drained_deletions = self.world.process_queued_deletions();
        let drain_time = drain_start.elapsed();

        // Phase 3: advance.
        self.tick_counter += 1;
        self.last_diagnostics = TickDiagnostics {
            system_times,
            drained_deletions,
            drain_time,
            total_time: tick_start.elapsed(),
        };
        tracing::trace!(tick = self.tick_counter, drained_deletions, "tick complete");

        outcome
    }

    /// Run `count` ticks, stopping at the first failing tick.
    pub fn run_ticks(&mut self, count: u64) -> anyhow::Result<()> {
        for _ in 0..count {
            self.tick()?;
        }
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    /// The number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// The current simulation time in seconds, computed as
    /// `tick_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    pub fn world(&self) -> &EntityManager {
        &self.world
    }

    /// Mutable access to the entity manager, for setup and event wiring.
    pub fn world_mut(&mut self) -> &mut EntityManager {
        &mut self.world
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The names of all registered systems, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    pub(crate) fn set_tick_counter(&mut self, tick: u64) {
        self.tick_counter = tick;
    }

    pub(crate) fn set_fixed_dt(&mut self, fixed_dt: f64) {
        self.fixed_dt = fixed_dt;
    }
}

pub(crate) fn check_fixed_dt(fixed_dt: f64) -> anyhow::Result<()> {
    if fixed_dt > 0.0 && fixed_dt.is_finite() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "fixed_dt must be positive and finite, got {fixed_dt}"
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
