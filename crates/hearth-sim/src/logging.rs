//! `tracing` subscriber bootstrap.

use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV_VAR: &str = "HEARTH_LOG";

/// Build the filter: `HEARTH_LOG` if set and valid, else `fallback`, else
/// [`DEFAULT_LOG_FILTER`](crate::config::DEFAULT_LOG_FILTER).
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER))
}

/// Install a formatted subscriber for the whole process.
///
/// Returns `false` if a global subscriber was already installed, so tests and
/// embedders may call this more than once.
pub fn init(filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(filter))
        .with_target(true)
        .try_init()
        .is_ok()
}
