use thiserror::Error;

use crate::executor::Rejected;

/// Configuration and registration errors. Probe failures never surface as errors:
/// they become unhealthy results.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid schedule for health check '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },

    #[error("health check '{0}' is configured more than once")]
    DuplicateCheck(String),

    #[error("unknown health check '{0}'")]
    UnknownCheck(String),

    #[error("health checks configured but never registered: {0:?}")]
    UnregisteredChecks(Vec<String>),

    #[error("unknown probe type '{0}'")]
    UnknownProbeType(String),

    #[error("invalid probe for health check '{name}': {reason}")]
    InvalidProbe { name: String, reason: String },

    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("invalid health check document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}
