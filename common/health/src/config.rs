//! Health configuration types. Durations are written as milliseconds (`*_ms` keys).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HealthError;

const DEFAULT_BASE_NAME: &str = "health-check";

/// What a failing check means for the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    /// The process can serve traffic. Critical ready checks gate readiness.
    #[default]
    Ready,
    /// The process is functioning at all. Alive checks are always critical.
    Alive,
}

impl FromStr for HealthCheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "ready" | "readiness" => Ok(HealthCheckType::Ready),
            "alive" | "liveness" => Ok(HealthCheckType::Alive),
            _ => Err(format!("Unknown health check type: {s}, must be READY or ALIVE")),
        }
    }
}

impl fmt::Display for HealthCheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckType::Ready => write!(f, "ready"),
            HealthCheckType::Alive => write!(f, "alive"),
        }
    }
}

/// Timing and thresholds for one health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// Delay between probes while the check is UP.
    #[serde(rename = "check_interval_ms", with = "duration_ms")]
    pub check_interval: Duration,
    /// Delay between probes while the check is DOWN.
    #[serde(rename = "downtime_interval_ms", with = "duration_ms")]
    pub downtime_interval: Duration,
    /// Delay before the first probe. Defaults to the interval of the initial state.
    #[serde(rename = "initial_delay_ms", with = "option_duration_ms")]
    pub initial_delay: Option<Duration>,
    /// Consecutive failures needed to go UP -> DOWN.
    pub failure_attempts: u32,
    /// Consecutive successes needed to go DOWN -> UP.
    pub success_attempts: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            downtime_interval: Duration::from_secs(2),
            initial_delay: None,
            failure_attempts: 3,
            success_attempts: 2,
        }
    }
}

impl Schedule {
    pub fn validate(&self, name: &str) -> Result<(), HealthError> {
        let invalid = |reason: &str| {
            Err(HealthError::InvalidSchedule {
                name: name.to_owned(),
                reason: reason.to_owned(),
            })
        };
        if self.check_interval.is_zero() {
            return invalid("check_interval must be positive");
        }
        if self.downtime_interval.is_zero() {
            return invalid("downtime_interval must be positive");
        }
        if self.failure_attempts < 1 {
            return invalid("failure_attempts must be at least 1");
        }
        if self.success_attempts < 1 {
            return invalid("success_attempts must be at least 1");
        }
        Ok(())
    }

    /// Delay until the next probe for a check currently in the given state.
    pub fn interval_for(&self, healthy: bool) -> Duration {
        if healthy {
            self.check_interval
        } else {
            self.downtime_interval
        }
    }

    pub fn initial_delay_for(&self, healthy: bool) -> Duration {
        self.initial_delay
            .unwrap_or_else(|| self.interval_for(healthy))
    }
}

/// Probe declaration resolved through a [`ProbeRegistry`](crate::ProbeRegistry):
/// `{"type": "tcp", "host": "db", "port": 5432}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Configuration for one named health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfiguration {
    pub name: String,
    #[serde(rename = "type", default)]
    pub check_type: HealthCheckType,
    #[serde(default)]
    pub critical: bool,
    /// State assumed before the first probe.
    #[serde(default = "default_true")]
    pub initial_state: bool,
    #[serde(default)]
    pub schedule: Schedule,
    /// Per-check probe timeout; falls back to [`HealthConfig::check_timeout`].
    #[serde(
        rename = "timeout_ms",
        default,
        with = "option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Built-in probe to create for this check, if it is not registered in code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeSpec>,
}

impl HealthCheckConfiguration {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            check_type: HealthCheckType::Ready,
            critical: false,
            initial_state: true,
            schedule: Schedule::default(),
            timeout: None,
            probe: None,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_type(mut self, check_type: HealthCheckType) -> Self {
        self.check_type = check_type;
        self
    }

    pub fn with_initial_state(mut self, healthy: bool) -> Self {
        self.initial_state = healthy;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_probe(mut self, probe: ProbeSpec) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Alive checks are critical whatever the flag says.
    pub fn is_critical(&self) -> bool {
        self.critical || self.check_type == HealthCheckType::Alive
    }
}

/// Sizing of the shared probe executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Probes allowed to run at the same time, across all checks.
    pub max_concurrent_checks: usize,
    /// Probes allowed to wait for a slot; ticks beyond this are rejected.
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 4,
            queue_capacity: 32,
        }
    }
}

/// Everything the health subsystem needs at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    /// Suffix for the executor and log names: `health-check-<name>`.
    pub name: Option<String>,
    pub health_checks: Vec<HealthCheckConfiguration>,
    /// Overall readiness before any critical check has changed state.
    pub initial_overall_state: bool,
    pub delayed_shutdown_handler_enabled: bool,
    #[serde(rename = "shutdown_wait_period_ms", with = "duration_ms")]
    pub shutdown_wait_period: Duration,
    /// Default probe timeout.
    #[serde(rename = "check_timeout_ms", with = "duration_ms")]
    pub check_timeout: Duration,
    pub executor: ExecutorConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            health_checks: Vec::new(),
            initial_overall_state: true,
            delayed_shutdown_handler_enabled: false,
            shutdown_wait_period: Duration::from_secs(15),
            check_timeout: Duration::from_secs(5),
            executor: ExecutorConfig::default(),
        }
    }
}

impl HealthConfig {
    pub fn full_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{DEFAULT_BASE_NAME}-{name}"),
            None => DEFAULT_BASE_NAME.to_owned(),
        }
    }

    /// Grace period for the shutdown coordinator; zero unless delayed shutdown is enabled.
    pub fn effective_shutdown_wait(&self) -> Duration {
        if self.enabled && self.delayed_shutdown_handler_enabled {
            self.shutdown_wait_period
        } else {
            Duration::ZERO
        }
    }

    pub fn validate(&self) -> Result<(), HealthError> {
        let mut seen = HashSet::new();
        for check in &self.health_checks {
            if !seen.insert(check.name.as_str()) {
                return Err(HealthError::DuplicateCheck(check.name.clone()));
            }
            check.schedule.validate(&check.name)?;
            if check.timeout.is_some_and(|t| t.is_zero()) {
                return Err(HealthError::InvalidSchedule {
                    name: check.name.clone(),
                    reason: "timeout must be positive".to_owned(),
                });
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

mod duration_ms {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
