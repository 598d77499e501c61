//! Error types for the claw-alert-engine crate.

use thiserror::Error;

use crate::types::AlertStatus;

/// Errors that can occur while scheduling, dispatching or reconciling alerts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid alert rule configuration.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// A severity threshold expression could not be parsed.
    #[error("invalid threshold expression '{expr}': {reason}")]
    InvalidExpression {
        /// The offending expression.
        expr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The rule declares a datasource type that has no handler, or the
    /// resolved client does not speak the rule's protocol.
    #[error("unsupported datasource type: {kind}")]
    UnsupportedDatasource {
        /// The declared datasource type.
        kind: String,
    },

    /// Datasource with the given ID is not registered.
    #[error("datasource not found: {id}")]
    DatasourceNotFound {
        /// The datasource ID.
        id: String,
    },

    /// Datasource is registered but disabled.
    #[error("datasource disabled: {id}")]
    DatasourceDisabled {
        /// The datasource ID.
        id: String,
    },

    /// Datasource failed its health check.
    #[error("datasource unhealthy: {id}")]
    DatasourceUnhealthy {
        /// The datasource ID.
        id: String,
    },

    /// A backend query failed.
    #[error("query failed on datasource {id}: {reason}")]
    QueryFailed {
        /// The datasource ID.
        id: String,
        /// The backend's error description.
        reason: String,
    },

    /// A backend query did not complete within the configured timeout.
    #[error("query on datasource {id} timed out after {timeout_secs}s")]
    QueryTimeout {
        /// The datasource ID.
        id: String,
        /// The timeout that elapsed.
        timeout_secs: u64,
    },

    /// The event, pending-recovery or fault-center cache failed.
    #[error("cache error: {reason}")]
    Cache {
        /// The reason the cache operation failed.
        reason: String,
    },

    /// A status change that the event state machine does not allow.
    #[error("illegal status transition for {fingerprint}: {from} -> {to}")]
    IllegalTransition {
        /// The event's fingerprint.
        fingerprint: String,
        /// The current status.
        from: AlertStatus,
        /// The requested status.
        to: AlertStatus,
    },

    /// Rule with the given ID was not found in the rule store.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule ID.
        id: String,
    },

    /// The persistent rule store failed.
    #[error("rule store error: {reason}")]
    RuleStore {
        /// The reason the store operation failed.
        reason: String,
    },

    /// Invalid engine configuration.
    #[error("invalid configuration: {reason}")]
    Config {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// I/O error while loading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl EngineError {
    /// Shorthand for a [`EngineError::Cache`] error.
    pub fn cache(reason: impl Into<String>) -> Self {
        Self::Cache {
            reason: reason.into(),
        }
    }

    /// Returns true for errors that are expected to clear on a later tick
    /// (timeouts, backend failures, cache outages).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QueryFailed { .. }
                | Self::QueryTimeout { .. }
                | Self::DatasourceUnhealthy { .. }
                | Self::Cache { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
