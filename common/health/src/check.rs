use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Healthy,
    Unhealthy(String),
}

impl CheckResult {
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        CheckResult::Unhealthy(reason.into())
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, CheckResult::Healthy)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CheckResult::Healthy => None,
            CheckResult::Unhealthy(reason) => Some(reason),
        }
    }
}

impl From<bool> for CheckResult {
    fn from(healthy: bool) -> Self {
        if healthy {
            CheckResult::Healthy
        } else {
            CheckResult::unhealthy("check returned false")
        }
    }
}

/// A user-supplied probe of some dependency.
///
/// Returning `Err`, panicking, or running past the configured timeout all count as
/// an unhealthy result; none of them stop the schedule.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn check(&self) -> anyhow::Result<CheckResult>;
}

type BoxedCheckFuture = Pin<Box<dyn Future<Output = anyhow::Result<CheckResult>> + Send>>;

/// Adapts an async closure into a [`HealthCheck`].
pub struct FnCheck {
    probe: Box<dyn Fn() -> BoxedCheckFuture + Send + Sync>,
}

#[async_trait]
impl HealthCheck for FnCheck {
    async fn check(&self) -> anyhow::Result<CheckResult> {
        (self.probe)().await
    }
}

/// ```ignore
/// let check = check_fn(|| async { Ok(CheckResult::Healthy) });
/// ```
pub fn check_fn<F, Fut>(probe: F) -> FnCheck
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CheckResult>> + Send + 'static,
{
    FnCheck {
        probe: Box::new(move || -> BoxedCheckFuture { Box::pin(probe()) }),
    }
}
