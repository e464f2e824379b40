//! Process lifecycle: ordered start and reverse-ordered stop of managed resources,
//! plus a run-once delayed shutdown that tells shutdown observers (health) first,
//! waits a grace period so load balancers can see the process go unhealthy, and
//! only then stops everything.

mod environment;
mod error;
mod managed;
mod metrics;
mod shutdown;
mod signals;

pub use environment::{LifecycleEnvironment, StopReport};
pub use error::LifecycleError;
pub use managed::{Hooks, Managed, ManagedResource, Startable, Stoppable};
pub use shutdown::{
    ShutdownCoordinator, ShutdownCoordinatorBuilder, ShutdownNotifier, ShutdownOutcome,
};
