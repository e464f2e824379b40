//! Lifecycle error types.

use thiserror::Error;

/// Errors returned by [`LifecycleEnvironment`](crate::LifecycleEnvironment) and
/// [`ShutdownCoordinator`](crate::ShutdownCoordinator).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A managed resource failed to start. Startup stops at this resource; the ones
    /// started before it are left running.
    #[error("managed resource '{name}' failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// [`ShutdownCoordinator::trigger_shutdown`](crate::ShutdownCoordinator::trigger_shutdown)
    /// was called before [`register`](crate::ShutdownCoordinator::register).
    #[error("shutdown triggered before the shutdown hook was registered")]
    ShutdownNotRegistered,

    /// The shutdown task panicked or was cancelled before finishing.
    #[error("shutdown sequence aborted: {0}")]
    ShutdownAborted(String),
}
