//! Runtime policy knobs for the entity manager.

use serde::{Deserialize, Serialize};

/// What deleting an already-deleted (or terminating) entity does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleDeletePolicy {
    /// Return [`EcsError::DoubleDelete`](crate::EcsError::DoubleDelete).
    #[default]
    Strict,
    /// Log at debug level and do nothing.
    Tolerant,
}

/// What a failing event handler does to the operation that raised the event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Fail the operation with [`EcsError::HandlerFailed`](crate::EcsError::HandlerFailed).
    #[default]
    Propagate,
    /// Log the error and carry on as if the handler had succeeded.
    LogAndContinue,
}

/// Configuration for an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsConfig {
    pub double_delete: DoubleDeletePolicy,
    pub handler_errors: HandlerErrorPolicy,
    /// Warn when `resolve` finds no component.
    pub log_missing_components: bool,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            double_delete: DoubleDeletePolicy::Strict,
            handler_errors: HandlerErrorPolicy::Propagate,
            log_missing_components: true,
        }
    }
}
