//! Bounded pool that runs probes.
//!
//! At most `max_concurrent_checks` probes run at once and at most `queue_capacity`
//! wait for a slot. A tick that finds both full is rejected; the caller logs it and
//! tries again on its next tick.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::warn;

use crate::check::{CheckResult, HealthCheck};
use crate::config::ExecutorConfig;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("health check executor '{0}' is saturated")]
pub struct Rejected(pub String);

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: CheckResult,
    pub elapsed: Duration,
}

pub struct CheckExecutor {
    name: String,
    running: Arc<Semaphore>,
    queued: Arc<Semaphore>,
}

impl CheckExecutor {
    pub fn new(name: &str, config: &ExecutorConfig) -> Self {
        let mut max_concurrent = config.max_concurrent_checks;
        if max_concurrent == 0 {
            warn!(
                executor = name,
                "max_concurrent_checks is 0, health checks would never run; using 1"
            );
            max_concurrent = 1;
        }
        if config.queue_capacity < max_concurrent {
            warn!(
                executor = name,
                max_concurrent_checks = max_concurrent,
                queue_capacity = config.queue_capacity,
                "queue_capacity is smaller than max_concurrent_checks, checks may be rejected under load"
            );
        }

        Self {
            name: name.to_owned(),
            running: Arc::new(Semaphore::new(max_concurrent)),
            queued: Arc::new(Semaphore::new(config.queue_capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one probe under `timeout`. An `Err` from the probe, a panic, or a timeout
    /// all produce [`CheckResult::Unhealthy`]. A timed-out probe is left to finish in
    /// the background and keeps its slot until it does; its result is dropped.
    pub async fn execute(
        &self,
        check: Arc<dyn HealthCheck>,
        timeout: Duration,
    ) -> Result<ProbeOutcome, Rejected> {
        let permit = match self.running.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let _waiting = self
                    .queued
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| Rejected(self.name.clone()))?;
                self.running
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Rejected(self.name.clone()))?
            }
        };

        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            check.check().await
        });

        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => CheckResult::unhealthy(format!("{e:#}")),
            Ok(Err(e)) if e.is_panic() => CheckResult::unhealthy("health check panicked"),
            Ok(Err(_)) => CheckResult::unhealthy("health check was cancelled"),
            Err(_) => CheckResult::unhealthy(format!(
                "health check timed out after {}ms",
                timeout.as_millis()
            )),
        };

        Ok(ProbeOutcome {
            result,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check_fn;

    fn executor(max_concurrent_checks: usize, queue_capacity: usize) -> CheckExecutor {
        CheckExecutor::new(
            "test",
            &ExecutorConfig {
                max_concurrent_checks,
                queue_capacity,
            },
        )
    }

    #[tokio::test]
    async fn healthy_probe_passes_through() {
        let check = Arc::new(check_fn(|| async { Ok(CheckResult::Healthy) }));

        let outcome = executor(1, 1)
            .execute(check, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.result, CheckResult::Healthy);
    }

    #[tokio::test]
    async fn error_becomes_unhealthy() {
        let check = Arc::new(check_fn(|| async {
            Err::<CheckResult, _>(anyhow::anyhow!("connection refused"))
        }));

        let outcome = executor(1, 1)
            .execute(check, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.result.message(), Some("connection refused"));
    }

    #[tokio::test]
    async fn panic_becomes_unhealthy() {
        struct Panics;

        #[async_trait::async_trait]
        impl HealthCheck for Panics {
            async fn check(&self) -> anyhow::Result<CheckResult> {
                panic!("probe blew up");
            }
        }

        let outcome = executor(1, 1)
            .execute(Arc::new(Panics), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.result.message(), Some("health check panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_probe_holds_its_slot_until_it_finishes() {
        let executor = executor(1, 0);
        let slow = Arc::new(check_fn(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CheckResult::Healthy)
        }));

        let outcome = executor
            .execute(slow, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(
            outcome.result.message(),
            Some("health check timed out after 500ms")
        );

        let fast = Arc::new(check_fn(|| async { Ok(CheckResult::Healthy) }));
        assert!(executor
            .execute(fast.clone(), Duration::from_secs(1))
            .await
            .is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let outcome = executor.execute(fast, Duration::from_secs(1)).await.unwrap();
        assert!(outcome.result.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_executor_rejects() {
        let executor = Arc::new(executor(1, 0));
        let slow = Arc::new(check_fn(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(CheckResult::Healthy)
        }));

        let busy = executor.clone();
        let first = tokio::spawn(async move { busy.execute(slow, Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let check = Arc::new(check_fn(|| async { Ok(CheckResult::Healthy) }));
        let rejected = executor.execute(check, Duration::from_secs(1)).await;
        assert_eq!(rejected.unwrap_err(), Rejected("test".to_string()));

        assert!(first.await.unwrap().unwrap().result.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_probe_waits_for_a_slot() {
        let executor = Arc::new(executor(1, 1));
        let slow = Arc::new(check_fn(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(CheckResult::Healthy)
        }));

        let busy = executor.clone();
        let first = tokio::spawn(async move { busy.execute(slow, Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let check = Arc::new(check_fn(|| async { Ok(CheckResult::Healthy) }));
        let queued = executor.execute(check, Duration::from_secs(1)).await.unwrap();

        assert!(queued.result.is_healthy());
        assert!(first.await.unwrap().unwrap().result.is_healthy());
    }
}
