//! Hearth Sim -- the simulation driver around the [`hearth_ecs`] runtime.
//!
//! Provides a fixed-timestep tick loop whose end-of-tick step drains queued
//! deletions, hashed save games, configuration loading, and the `tracing`
//! bootstrap.
//!
//! # Quick Start
//!
//! ```
//! use hearth_sim::prelude::*;
//!
//! fn age(manager: &mut EntityManager) -> anyhow::Result<()> {
//!     let ids: Vec<EntityId> = manager.entities().collect();
//!     for id in ids {
//!         if let Some(meta) = manager.metadata_mut(id) {
//!             meta.name.get_or_insert_with(|| "elder".to_owned());
//!         }
//!     }
//!     Ok(())
//! }
//!
//! let config = SimConfig::from_json_str(r#"{ "fixed_dt": 0.05 }"#).unwrap();
//! hearth_sim::logging::init(&config.log_filter);
//!
//! let mut tick_loop = TickLoop::from_config(&config).unwrap();
//! tick_loop.add_system("age", age).unwrap();
//! let e = tick_loop.world_mut().allocate(None, None).unwrap();
//!
//! tick_loop.run_ticks(20).unwrap();
//! assert_eq!(tick_loop.tick_count(), 20);
//! assert_eq!(tick_loop.world().metadata(e).unwrap().name.as_deref(), Some("elder"));
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod logging;
pub mod save;
pub mod tick;

/// Re-export the ECS crate for convenience.
pub use hearth_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common simulation usage.
pub mod prelude {
    pub use hearth_ecs::prelude::*;

    pub use crate::config::SimConfig;
    pub use crate::save::SaveGame;
    pub use crate::tick::{SystemFn, TickConfig, TickDiagnostics, TickLoop};
}
