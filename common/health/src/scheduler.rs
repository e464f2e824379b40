//! One timer task per health check, all sharing a [`CheckExecutor`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::check::HealthCheck;
use crate::config::{HealthCheckConfiguration, HealthCheckType, Schedule};
use crate::executor::{CheckExecutor, ProbeOutcome};
use crate::metrics;
use crate::state::{CheckState, HealthState, HealthStatus, RecordOutcome};

/// Told whenever a scheduled check flips between UP and DOWN.
pub trait StateChangeListener: Send + Sync {
    fn on_state_changed(&self, check: &ScheduledHealthCheck, status: HealthStatus);
}

/// A health check bound to its configuration and its state machine.
pub struct ScheduledHealthCheck {
    name: String,
    check_type: HealthCheckType,
    critical: bool,
    schedule: Schedule,
    timeout: Duration,
    check: Arc<dyn HealthCheck>,
    state: CheckState,
    rearm: Notify,
}

impl ScheduledHealthCheck {
    pub fn new(
        config: &HealthCheckConfiguration,
        default_timeout: Duration,
        check: Arc<dyn HealthCheck>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            check_type: config.check_type,
            critical: config.is_critical(),
            schedule: config.schedule.clone(),
            timeout: config.timeout.unwrap_or(default_timeout),
            check,
            state: CheckState::new(
                config.initial_state,
                config.schedule.failure_attempts,
                config.schedule.success_attempts,
            ),
            rearm: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check_type(&self) -> HealthCheckType {
        self.check_type
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }

    pub fn snapshot(&self) -> Arc<HealthState> {
        self.state.snapshot()
    }

    pub(crate) fn probe(&self) -> Arc<dyn HealthCheck> {
        self.check.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.generation()
    }

    pub(crate) fn invalidate(&self) {
        self.state.invalidate();
    }

    /// Fold a finished probe into the state machine and tell `listener` about a flip.
    /// A flip also restarts the timer on the interval of the new state.
    pub(crate) fn apply(
        &self,
        generation: u64,
        probe: &ProbeOutcome,
        listener: &dyn StateChangeListener,
    ) -> RecordOutcome {
        let healthy = probe.result.is_healthy();
        let outcome = self.state.record(generation, &probe.result);
        match outcome {
            RecordOutcome::Stale => {
                debug!(check = %self.name, "Health: discarding result from a superseded schedule");
            }
            RecordOutcome::Unchanged => {
                metrics::emit_check_result(&self.name, healthy, probe.elapsed.as_secs_f64());
                debug!(
                    check = %self.name,
                    healthy,
                    elapsed_ms = probe.elapsed.as_millis() as u64,
                    message = probe.result.message(),
                    "Health: check completed"
                );
            }
            RecordOutcome::Transitioned(status) => {
                metrics::emit_check_result(&self.name, healthy, probe.elapsed.as_secs_f64());
                metrics::emit_transition(&self.name, status);
                self.rearm.notify_one();
                listener.on_state_changed(self, status);
            }
        }
        outcome
    }
}

struct ScheduledTask {
    check: Arc<ScheduledHealthCheck>,
    cancel: CancellationToken,
}

/// Owns the timer task of every scheduled check.
pub struct HealthCheckScheduler {
    executor: Arc<CheckExecutor>,
    listener: Arc<dyn StateChangeListener>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl HealthCheckScheduler {
    pub fn new(executor: Arc<CheckExecutor>, listener: Arc<dyn StateChangeListener>) -> Self {
        Self {
            executor,
            listener,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &Arc<CheckExecutor> {
        &self.executor
    }

    /// Start probing `check`. A check already scheduled under the same name is
    /// cancelled and replaced. Must be called inside a tokio runtime.
    pub fn schedule(&self, check: Arc<ScheduledHealthCheck>) {
        let cancel = CancellationToken::new();
        let previous = self.tasks.lock().insert(
            check.name().to_owned(),
            ScheduledTask {
                check: check.clone(),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(check = %check.name(), "Health: replacing existing schedule");
            previous.cancel.cancel();
            previous.check.invalidate();
        }

        debug!(
            check = %check.name(),
            check_interval_ms = check.schedule().check_interval.as_millis() as u64,
            downtime_interval_ms = check.schedule().downtime_interval.as_millis() as u64,
            "Health: scheduling check"
        );
        tokio::spawn(run_schedule(
            check,
            self.executor.clone(),
            self.listener.clone(),
            cancel,
        ));
    }

    /// Stop probing `name`. Unknown names are ignored.
    pub fn unschedule(&self, name: &str) -> bool {
        match self.tasks.lock().remove(name) {
            Some(task) => {
                task.cancel.cancel();
                task.check.invalidate();
                debug!(check = name, "Health: unscheduled check");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }

    pub fn cancel_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        for (_, task) in &tasks {
            task.cancel.cancel();
            task.check.invalidate();
        }
        debug!(cancelled = tasks.len(), "Health: cancelled all scheduled checks");
    }
}

async fn run_schedule(
    check: Arc<ScheduledHealthCheck>,
    executor: Arc<CheckExecutor>,
    listener: Arc<dyn StateChangeListener>,
    cancel: CancellationToken,
) {
    let mut delay = check.schedule().initial_delay_for(check.is_healthy());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = check.rearm.notified() => {
                delay = check.schedule().interval_for(check.is_healthy());
                debug!(
                    check = %check.name(),
                    delay_ms = delay.as_millis() as u64,
                    "Health: state changed, re-arming timer"
                );
                continue;
            }
        }

        let generation = check.generation();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = executor.execute(check.probe(), check.timeout()) => outcome,
        };
        match outcome {
            Ok(probe) => {
                check.apply(generation, &probe, listener.as_ref());
            }
            Err(e) => {
                metrics::emit_rejected(check.name());
                warn!(check = %check.name(), "Health: skipping tick: {e}");
            }
        }

        delay = check.schedule().interval_for(check.is_healthy());
    }
    debug!(check = %check.name(), "Health: schedule stopped");
}
