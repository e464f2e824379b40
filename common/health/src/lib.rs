//! Scheduled health checks for a long-running service.
//!
//! Every configured check runs on its own timer against a shared bounded executor
//! and drives an UP/DOWN state machine with separate failure and success thresholds.
//! [`HealthCheckManager`] reduces the per-check states to one answer:
//!   - the process is alive while every `alive` check is UP,
//!   - the process is ready while it is alive, no critical `ready` check is DOWN,
//!     and shutdown has not started.
//!
//! The manager is a managed resource (start schedules, stop cancels) and a shutdown
//! notifier, so the delayed shutdown sequence flips readiness to DOWN before the
//! grace period starts.

mod check;
mod config;
mod error;
mod executor;
mod manager;
mod metrics;
mod probes;
mod response;
mod scheduler;
mod state;
mod validator;

pub use check::{check_fn, CheckResult, FnCheck, HealthCheck};
pub use config::{
    ExecutorConfig, HealthCheckConfiguration, HealthCheckType, HealthConfig, ProbeSpec, Schedule,
};
pub use error::HealthError;
pub use executor::{CheckExecutor, ProbeOutcome, Rejected};
pub use manager::HealthCheckManager;
pub use probes::{HttpProbe, ProbeParams, ProbeRegistry, TcpProbe};
pub use response::{HealthCheckDetail, HealthReport};
pub use scheduler::{HealthCheckScheduler, ScheduledHealthCheck, StateChangeListener};
pub use state::{CheckState, HealthState, HealthStatus, RecordOutcome};
pub use validator::HealthCheckConfigValidator;
