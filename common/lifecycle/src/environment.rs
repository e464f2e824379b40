//! Ordered ledger of managed resources: start in registration order, stop in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::managed::{Hooks, Managed, ManagedResource, Startable, Stoppable};
use crate::metrics;

struct Entry {
    resource: ManagedResource,
    started: AtomicBool,
}

/// Outcome of [`LifecycleEnvironment::stop_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Resources whose stop hook ran, in the order it ran (reverse registration order).
    pub stopped: Vec<String>,
    /// Resources whose stop hook returned an error, with the error chain.
    pub failed: Vec<(String, String)>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registration-ordered list of managed resources for one service.
///
/// Resources that depend on other resources must be registered after them: start runs
/// front to back, stop runs back to front. Start and stop never overlap and never run
/// resources in parallel.
pub struct LifecycleEnvironment {
    name: String,
    resources: Mutex<Vec<Arc<Entry>>>,
    sequence: tokio::sync::Mutex<()>,
}

impl LifecycleEnvironment {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            resources: Mutex::new(Vec::new()),
            sequence: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a resource with both start and stop hooks.
    pub fn manage<M>(&self, name: &str, managed: Arc<M>)
    where
        M: Managed + 'static,
    {
        self.register(ManagedResource::new(name, Hooks::Managed(managed)));
    }

    /// Register a resource that only needs to be started.
    pub fn manage_startable<S>(&self, name: &str, startable: Arc<S>)
    where
        S: Startable + 'static,
    {
        self.register(ManagedResource::new(name, Hooks::StartOnly(startable)));
    }

    /// Register a resource that only needs to be stopped.
    pub fn manage_stoppable<S>(&self, name: &str, stoppable: Arc<S>)
    where
        S: Stoppable + 'static,
    {
        self.register(ManagedResource::new(name, Hooks::StopOnly(stoppable)));
    }

    /// Append a resource to the ledger. Duplicates are kept: registering the same
    /// resource twice starts and stops it twice.
    pub fn register(&self, resource: ManagedResource) {
        debug!(resource = %resource.name(), "Lifecycle: resource registered");
        self.resources.lock().push(Arc::new(Entry {
            resource,
            started: AtomicBool::new(false),
        }));
    }

    /// Names of the registered resources, in registration order.
    pub fn resource_names(&self) -> Vec<String> {
        self.resources
            .lock()
            .iter()
            .map(|e| e.resource.name().to_owned())
            .collect()
    }

    /// Start every resource that is not already running, in registration order.
    ///
    /// The first failure aborts: later resources are never started and earlier ones are
    /// left running. Callers should treat the error as fatal.
    pub async fn start_all(&self) -> Result<(), LifecycleError> {
        let _sequence = self.sequence.lock().await;
        let entries = self.snapshot();
        info!(
            service = %self.name,
            resources = entries.len(),
            "Lifecycle: starting managed resources"
        );

        for entry in entries {
            if entry.started.load(Ordering::SeqCst) {
                continue;
            }
            let name = entry.resource.name();
            debug!(resource = %name, "Lifecycle: starting resource");
            match entry.resource.hooks().start().await {
                Ok(()) => {
                    entry.started.store(true, Ordering::SeqCst);
                    metrics::emit_resource_start_result(&self.name, name, "started");
                }
                Err(e) => {
                    metrics::emit_resource_start_result(&self.name, name, "failed");
                    error!(resource = %name, "Lifecycle: resource failed to start: {e:#}");
                    return Err(LifecycleError::StartFailed {
                        name: name.to_owned(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        info!(service = %self.name, "Lifecycle: all managed resources started");
        Ok(())
    }

    /// Stop every started resource in reverse registration order.
    ///
    /// Failures are logged and reported but never interrupt the loop. Each started
    /// resource is stopped exactly once, so a second call only stops resources started
    /// since the first.
    pub async fn stop_all(&self) -> StopReport {
        let _sequence = self.sequence.lock().await;
        let entries = self.snapshot();
        let mut report = StopReport::default();
        info!(service = %self.name, "Lifecycle: stopping managed resources");

        for entry in entries.iter().rev() {
            let name = entry.resource.name();
            if !entry.started.swap(false, Ordering::SeqCst) {
                debug!(resource = %name, "Lifecycle: resource not running, skipping stop");
                continue;
            }

            let clock = Instant::now();
            let result = entry.resource.hooks().stop().await;
            let elapsed = clock.elapsed().as_secs_f64();
            report.stopped.push(name.to_owned());
            match result {
                Ok(()) => {
                    metrics::emit_resource_stop_result(&self.name, name, "stopped", elapsed);
                    debug!(resource = %name, duration_secs = elapsed, "Lifecycle: resource stopped");
                }
                Err(e) => {
                    metrics::emit_resource_stop_result(&self.name, name, "failed", elapsed);
                    warn!(
                        resource = %name,
                        duration_secs = elapsed,
                        "Lifecycle: resource failed to stop: {e:#}"
                    );
                    report.failed.push((name.to_owned(), format!("{e:#}")));
                }
            }
        }

        if report.is_clean() {
            info!(service = %self.name, stopped = report.stopped.len(), "Lifecycle: all managed resources stopped");
        } else {
            warn!(
                service = %self.name,
                stopped = report.stopped.len(),
                failed = report.failed.len(),
                "Lifecycle: managed resources stopped with failures"
            );
        }
        report
    }

    fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.resources.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Startable for Noop {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Stoppable for Noop {
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let env = LifecycleEnvironment::new("test");
        let noop = Arc::new(Noop);
        env.manage("a", noop.clone());
        env.manage("b", noop.clone());
        env.manage("a", noop);

        assert_eq!(env.resource_names(), vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn stop_without_start_is_empty() {
        let env = LifecycleEnvironment::new("test");
        env.manage("a", Arc::new(Noop));

        let report = env.stop_all().await;
        assert!(report.stopped.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn start_only_and_stop_only_hooks() {
        let env = LifecycleEnvironment::new("test");
        env.manage_startable("starter", Arc::new(Noop));
        env.manage_stoppable("stopper", Arc::new(Noop));

        env.start_all().await.unwrap();
        let report = env.stop_all().await;

        assert_eq!(report.stopped, vec!["stopper", "starter"]);
    }
}
