//! Simulation configuration.

use hearth_ecs::config::EcsConfig;
use serde::{Deserialize, Serialize};

/// Filter used when neither the configuration nor `HEARTH_LOG` sets one.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Top-level configuration for a [`TickLoop`](crate::tick::TickLoop).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use hearth_sim::config::SimConfig;
///
/// let config = SimConfig::from_json_str(r#"{ "fixed_dt": 0.1 }"#).unwrap();
/// assert_eq!(config.fixed_dt, 0.1);
/// assert_eq!(config.log_filter, "warn");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// `tracing` filter directive, e.g. `"hearth_ecs=debug,warn"`.
    pub log_filter: String,
    /// Entity manager policies.
    pub ecs: EcsConfig,
}

impl Default for SimConfig {
    /// Defaults to 60 Hz (1/60 second per tick).
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            ecs: EcsConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: SimConfig = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("invalid simulation config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot check.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(anyhow::anyhow!(
                "fixed_dt must be positive and finite, got {}",
                self.fixed_dt
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
