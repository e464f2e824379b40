//! Aggregate health: owns every configured check, schedules them while the manager is
//! started, and reduces their states to one readiness/liveness answer.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;
use lifecycle::{ShutdownNotifier, Startable, Stoppable};
use tracing::{debug, error, info, warn};

use crate::check::HealthCheck;
use crate::config::{HealthCheckConfiguration, HealthCheckType, HealthConfig};
use crate::error::HealthError;
use crate::executor::CheckExecutor;
use crate::metrics;
use crate::probes::ProbeRegistry;
use crate::response::{HealthCheckDetail, HealthReport};
use crate::scheduler::{HealthCheckScheduler, ScheduledHealthCheck, StateChangeListener};
use crate::state::HealthStatus;

type CheckMap = BTreeMap<String, Arc<ScheduledHealthCheck>>;

/// Shared between the manager and the scheduler, which reports transitions into it.
struct Aggregate {
    name: String,
    checks: ArcSwap<CheckMap>,
    shutting_down: AtomicBool,
    /// Set while `initial_overall_state` is false and no critical readiness check
    /// has changed state yet.
    awaiting_first_transition: AtomicBool,
}

impl Aggregate {
    fn is_alive(&self) -> bool {
        self.checks
            .load()
            .values()
            .filter(|c| c.check_type() == HealthCheckType::Alive)
            .all(|c| c.is_healthy())
    }

    fn is_ready(&self) -> bool {
        if self.shutting_down.load(Ordering::SeqCst)
            || self.awaiting_first_transition.load(Ordering::SeqCst)
        {
            return false;
        }
        self.checks
            .load()
            .values()
            .filter(|c| c.is_critical() && c.check_type() == HealthCheckType::Ready)
            .all(|c| c.is_healthy())
    }

    fn publish_counts(&self) {
        let checks = self.checks.load();
        let healthy = checks.values().filter(|c| c.is_healthy()).count();
        metrics::set_aggregate(healthy, checks.len() - healthy);
    }
}

impl StateChangeListener for Aggregate {
    fn on_state_changed(&self, check: &ScheduledHealthCheck, status: HealthStatus) {
        let name = check.name();
        let check_type = check.check_type();
        debug!(health = %self.name, check = name, state = status.as_str(), "Health: check changed state");
        self.publish_counts();

        if !check.is_critical() {
            match status {
                HealthStatus::Up => info!(check = name, %check_type, "A non-critical dependency is now healthy"),
                HealthStatus::Down => warn!(check = name, %check_type, "A non-critical dependency is now unhealthy"),
            }
            return;
        }

        match status {
            HealthStatus::Up => info!(check = name, %check_type, "A critical dependency is now healthy"),
            HealthStatus::Down => error!(check = name, %check_type, "A critical dependency is now unhealthy"),
        }
        if check_type == HealthCheckType::Ready {
            if status.is_up() && self.shutting_down.load(Ordering::SeqCst) {
                info!(check = name, %check_type, "Status change is ignored during shutdown");
                return;
            }
            self.awaiting_first_transition.store(false, Ordering::SeqCst);
        }
    }
}

/// Registry of health checks and the process-wide health answer.
///
/// Only checks that have a [`HealthCheckConfiguration`] are tracked. Starting the
/// manager schedules every registered check; stopping it cancels them all.
pub struct HealthCheckManager {
    config: HealthConfig,
    configs: HashMap<String, HealthCheckConfiguration>,
    aggregate: Arc<Aggregate>,
    scheduler: HealthCheckScheduler,
    started: AtomicBool,
}

impl HealthCheckManager {
    pub fn new(config: HealthConfig) -> Result<Self, HealthError> {
        config.validate()?;

        let name = config.full_name();
        let aggregate = Arc::new(Aggregate {
            name: name.clone(),
            checks: ArcSwap::from_pointee(CheckMap::new()),
            shutting_down: AtomicBool::new(false),
            awaiting_first_transition: AtomicBool::new(!config.initial_overall_state),
        });
        let executor = Arc::new(CheckExecutor::new(&name, &config.executor));
        let scheduler = HealthCheckScheduler::new(executor, aggregate.clone());
        let configs = config
            .health_checks
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();

        Ok(Self {
            config,
            configs,
            aggregate,
            scheduler,
            started: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.aggregate.name
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Track `check` under `name`. Returns false, and ignores the check, if nothing
    /// is configured under that name or the subsystem is disabled. Registering a name
    /// again replaces the previous check. If the manager is already started the
    /// check is scheduled immediately.
    pub fn register(&self, name: &str, check: Arc<dyn HealthCheck>) -> bool {
        if !self.config.enabled {
            debug!(check = name, "ignoring health check, health checks are disabled");
            return false;
        }
        let Some(config) = self.configs.get(name) else {
            debug!(check = name, "ignoring registered health check that isn't configured");
            return false;
        };

        let scheduled = Arc::new(ScheduledHealthCheck::new(
            config,
            self.config.check_timeout,
            check,
        ));
        self.aggregate.checks.rcu(|checks| {
            let mut checks = CheckMap::clone(checks);
            checks.insert(name.to_owned(), scheduled.clone());
            checks
        });
        self.aggregate.publish_counts();

        if self.started.load(Ordering::SeqCst) {
            self.scheduler.schedule(scheduled);
        }
        true
    }

    /// Stop tracking `name`. Returns false if it was not registered.
    pub fn remove_check(&self, name: &str) -> bool {
        let previous = self.aggregate.checks.rcu(|checks| {
            let mut checks = CheckMap::clone(checks);
            checks.remove(name);
            checks
        });
        if !previous.contains_key(name) {
            return false;
        }
        self.scheduler.unschedule(name);
        self.aggregate.publish_counts();
        true
    }

    /// Build and register a probe for every configured check that declares one and
    /// has not been registered in code. Returns how many were registered.
    pub fn register_probes(&self, probes: &ProbeRegistry) -> Result<usize, HealthError> {
        let registered = self.aggregate.checks.load_full();
        let mut count = 0;
        for config in &self.config.health_checks {
            let Some(spec) = &config.probe else {
                continue;
            };
            if registered.contains_key(&config.name) {
                debug!(check = %config.name, "health check registered in code, skipping probe");
                continue;
            }
            let probe = probes.build(&config.name, spec)?;
            if self.register(&config.name, probe) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Configured checks that have no registered implementation.
    pub fn unregistered_checks(&self) -> Vec<String> {
        let registered = self.aggregate.checks.load();
        self.config
            .health_checks
            .iter()
            .filter(|c| !registered.contains_key(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.aggregate.checks.load().keys().cloned().collect()
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.scheduler.is_scheduled(name)
    }

    /// Ready and alive: no critical check is DOWN and shutdown has not started.
    pub fn is_healthy(&self) -> bool {
        self.aggregate.is_alive() && self.aggregate.is_ready()
    }

    /// `Some(Alive)` only considers liveness checks, which shutdown does not affect.
    /// Anything else is the same as [`is_healthy`](Self::is_healthy).
    pub fn is_healthy_for(&self, check_type: Option<HealthCheckType>) -> bool {
        match check_type {
            Some(HealthCheckType::Alive) => self.aggregate.is_alive(),
            _ => self.is_healthy(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.aggregate.shutting_down.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> HealthReport {
        self.report_for(None)
    }

    /// Report for `check_type`; the detail only lists checks of that type.
    pub fn report_for(&self, check_type: Option<HealthCheckType>) -> HealthReport {
        let checks = self
            .aggregate
            .checks
            .load()
            .iter()
            .filter(|(_, c)| check_type.map_or(true, |t| c.check_type() == t))
            .map(|(name, c)| (name.clone(), HealthCheckDetail::of(c)))
            .collect();

        HealthReport {
            name: self.aggregate.name.clone(),
            healthy: self.is_healthy_for(check_type),
            shutting_down: self.is_shutting_down(),
            checks,
        }
    }

    /// Probe `name` right away and fold the result into its state, outside its
    /// schedule.
    pub async fn run_now(&self, name: &str) -> Result<HealthCheckDetail, HealthError> {
        let check = self
            .aggregate
            .checks
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| HealthError::UnknownCheck(name.to_owned()))?;

        let generation = check.generation();
        let probe = self
            .scheduler
            .executor()
            .execute(check.probe(), check.timeout())
            .await?;
        check.apply(generation, &probe, self.aggregate.as_ref());
        Ok(HealthCheckDetail::of(&check))
    }

    /// Probe every registered check once, concurrently, then report. A check the
    /// executor rejects keeps its current state.
    pub async fn run_all_now(&self) -> HealthReport {
        let names = self.check_names();
        let results = join_all(names.iter().map(|name| self.run_now(name))).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(check = %name, "on-demand health check did not run: {e}");
            }
        }
        self.report()
    }
}

#[async_trait]
impl Startable for HealthCheckManager {
    async fn start(&self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!(health = %self.aggregate.name, "health check functionality is disabled");
            return Ok(());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let checks = self.aggregate.checks.load_full();
        for check in checks.values() {
            self.scheduler.schedule(check.clone());
        }
        self.aggregate.publish_counts();
        info!(
            health = %self.aggregate.name,
            checks = checks.len(),
            healthy = self.is_healthy(),
            "Health: scheduled health checks"
        );
        Ok(())
    }
}

#[async_trait]
impl Stoppable for HealthCheckManager {
    async fn stop(&self) -> anyhow::Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.scheduler.cancel_all();
        info!(health = %self.aggregate.name, "Health: stopped health checks");
        Ok(())
    }
}

#[async_trait]
impl ShutdownNotifier for HealthCheckManager {
    async fn notify_shutdown_started(&self) -> anyhow::Result<()> {
        self.aggregate.shutting_down.store(true, Ordering::SeqCst);
        info!(
            health = %self.aggregate.name,
            wait_secs = self.config.effective_shutdown_wait().as_secs_f64(),
            "delayed shutdown: started, reporting unhealthy"
        );
        Ok(())
    }
}
