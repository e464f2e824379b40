//! Delayed, run-once shutdown.
//!
//! The sequence is: tell every [`ShutdownNotifier`] that shutdown started (the health
//! manager publishes DOWN here), sleep the grace period so external health polls see
//! the process as unhealthy while it still serves, then stop all managed resources in
//! reverse order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::environment::{LifecycleEnvironment, StopReport};
use crate::error::LifecycleError;
use crate::metrics;
use crate::signals;

/// Observer told that shutdown has begun, before the grace period starts.
#[async_trait]
pub trait ShutdownNotifier: Send + Sync {
    async fn notify_shutdown_started(&self) -> anyhow::Result<()>;
}

/// Result of [`ShutdownCoordinator::trigger_shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// This call ran the shutdown sequence.
    Completed(StopReport),
    /// Another call already started the sequence; nothing was done.
    AlreadyInProgress,
}

/// Builder for [`ShutdownCoordinator`].
pub struct ShutdownCoordinatorBuilder {
    name: String,
    environment: Arc<LifecycleEnvironment>,
    grace_period: Duration,
    notifier_timeout: Duration,
    trap_signals: bool,
    prestop_file: Option<PathBuf>,
    notifiers: Vec<Arc<dyn ShutdownNotifier>>,
}

impl ShutdownCoordinatorBuilder {
    /// Delay between notifying observers and stopping resources (default: 15s).
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Install SIGINT/SIGTERM handlers on [`register`](ShutdownCoordinator::register) (default: true).
    pub fn with_trap_signals(mut self, trap_signals: bool) -> Self {
        self.trap_signals = trap_signals;
        self
    }

    /// Also trigger shutdown when this file appears, for K8s pre-stop hooks.
    /// Only watched when signals are trapped.
    pub fn with_prestop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prestop_file = Some(path.into());
        self
    }

    /// Upper bound on each observer's notification (default: 5s).
    pub fn with_notifier_timeout(mut self, timeout: Duration) -> Self {
        self.notifier_timeout = timeout;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ShutdownNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn build(self) -> Arc<ShutdownCoordinator> {
        Arc::new(ShutdownCoordinator {
            name: self.name,
            environment: self.environment,
            grace_period: self.grace_period,
            notifier_timeout: self.notifier_timeout,
            trap_signals: self.trap_signals,
            prestop_file: self.prestop_file,
            notifiers: Mutex::new(self.notifiers),
            registered: AtomicBool::new(false),
            started: AtomicBool::new(false),
            expedite: CancellationToken::new(),
            shutdown_token: CancellationToken::new(),
            completed: CancellationToken::new(),
        })
    }
}

/// Runs the delayed shutdown sequence exactly once per process.
pub struct ShutdownCoordinator {
    name: String,
    environment: Arc<LifecycleEnvironment>,
    grace_period: Duration,
    notifier_timeout: Duration,
    trap_signals: bool,
    prestop_file: Option<PathBuf>,
    notifiers: Mutex<Vec<Arc<dyn ShutdownNotifier>>>,
    registered: AtomicBool,
    started: AtomicBool,
    expedite: CancellationToken,
    shutdown_token: CancellationToken,
    completed: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn builder(name: &str, environment: Arc<LifecycleEnvironment>) -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder {
            name: name.to_owned(),
            environment,
            grace_period: Duration::from_secs(15),
            notifier_timeout: Duration::from_secs(5),
            trap_signals: true,
            prestop_file: None,
            notifiers: Vec::new(),
        }
    }

    /// Add an observer after construction. Observers added once shutdown has started
    /// are never notified.
    pub fn add_notifier(&self, notifier: Arc<dyn ShutdownNotifier>) {
        self.notifiers.lock().push(notifier);
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Arm the coordinator. With signal trapping enabled this spawns the task that turns
    /// SIGINT/SIGTERM (or the pre-stop file) into [`trigger_shutdown`](Self::trigger_shutdown),
    /// so it must run inside a tokio runtime.
    ///
    /// Returns false if the coordinator was already registered; the second call does nothing.
    pub fn register(self: &Arc<Self>) -> bool {
        if self.registered.swap(true, Ordering::SeqCst) {
            debug!(service = %self.name, "Lifecycle: shutdown hook already registered");
            return false;
        }

        if self.trap_signals {
            let coordinator = self.clone();
            let prestop_file = self.prestop_file.clone();
            tokio::spawn(async move {
                tokio::select! {
                    trigger = signals::wait_for_shutdown_signal(prestop_file) => {
                        if let Err(e) = coordinator.trigger_shutdown(trigger).await {
                            error!("Lifecycle: signal-triggered shutdown failed: {e}");
                        }
                    }
                    _ = coordinator.completed.cancelled() => {}
                }
            });
        }

        debug!(
            service = %self.name,
            grace_period_secs = self.grace_period.as_secs_f64(),
            trap_signals = self.trap_signals,
            "Lifecycle: shutdown hook registered"
        );
        true
    }

    /// Run the shutdown sequence: notify observers, wait the grace period, stop all
    /// managed resources. Only the first call does anything; concurrent and later calls
    /// return [`ShutdownOutcome::AlreadyInProgress`] immediately.
    ///
    /// The sequence runs on its own task, so dropping the returned future does not
    /// stop it; [`wait`](Self::wait) still resolves once resources are stopped.
    /// Observer errors and timeouts are logged and never prevent the stop.
    pub async fn trigger_shutdown(
        self: &Arc<Self>,
        trigger: &str,
    ) -> Result<ShutdownOutcome, LifecycleError> {
        if !self.registered.load(Ordering::SeqCst) {
            error!(
                service = %self.name,
                trigger_reason = trigger,
                "Lifecycle: shutdown triggered before the shutdown hook was registered"
            );
            return Err(LifecycleError::ShutdownNotRegistered);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            info!(
                service = %self.name,
                trigger_reason = trigger,
                "Lifecycle: shutdown already in progress, ignoring trigger"
            );
            return Ok(ShutdownOutcome::AlreadyInProgress);
        }

        let coordinator = self.clone();
        let trigger = trigger.to_owned();
        let sequence = tokio::spawn(async move {
            let _completed = coordinator.completed.clone().drop_guard();
            coordinator.run_sequence(&trigger).await
        });

        match sequence.await {
            Ok(report) => Ok(ShutdownOutcome::Completed(report)),
            Err(e) => {
                error!(service = %self.name, "Lifecycle: shutdown sequence aborted: {e}");
                Err(LifecycleError::ShutdownAborted(e.to_string()))
            }
        }
    }

    async fn run_sequence(&self, trigger: &str) -> StopReport {
        let shutdown_clock = Instant::now();
        self.shutdown_token.cancel();
        metrics::emit_shutdown_initiated(&self.name, trigger);
        info!(
            service = %self.name,
            trigger_reason = trigger,
            grace_period_secs = self.grace_period.as_secs_f64(),
            "Lifecycle: shutdown initiated"
        );

        let notifiers = self.notifiers.lock().clone();
        for notifier in notifiers {
            tokio::select! {
                notified = tokio::time::timeout(self.notifier_timeout, notifier.notify_shutdown_started()) => {
                    match notified {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(service = %self.name, "Lifecycle: shutdown notifier failed, continuing: {e:#}");
                        }
                        Err(_) => {
                            warn!(
                                service = %self.name,
                                timeout_secs = self.notifier_timeout.as_secs_f64(),
                                "Lifecycle: shutdown notifier timed out, continuing"
                            );
                        }
                    }
                }
                _ = self.expedite.cancelled() => {
                    info!(service = %self.name, "Lifecycle: skipping remaining shutdown notifiers");
                    break;
                }
            }
        }

        if !self.grace_period.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.grace_period) => {
                    debug!(service = %self.name, "Lifecycle: grace period elapsed");
                }
                _ = self.expedite.cancelled() => {
                    info!(service = %self.name, "Lifecycle: grace period cut short");
                }
            }
        }

        let report = self.environment.stop_all().await;
        let elapsed = shutdown_clock.elapsed();
        metrics::emit_shutdown_completed(&self.name, report.is_clean(), elapsed.as_secs_f64());
        if report.is_clean() {
            info!(
                service = %self.name,
                clean = true,
                total_duration_secs = elapsed.as_secs_f64(),
                "Lifecycle: shutdown complete"
            );
        } else {
            warn!(
                service = %self.name,
                clean = false,
                total_duration_secs = elapsed.as_secs_f64(),
                failed = ?report.failed,
                "Lifecycle: shutdown complete with failures"
            );
        }
        report
    }

    /// Skip the rest of the grace period, if one is running.
    pub fn expedite(&self) {
        self.expedite.cancel();
    }

    /// True once a trigger has been accepted.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Resolves when shutdown begins. Clone it into tasks that should wind down early.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Resolves once the stop sequence has finished.
    pub async fn wait(&self) {
        self.completed.cancelled().await
    }
}
