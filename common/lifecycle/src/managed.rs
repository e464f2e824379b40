//! Capability traits for things with a lifecycle, and the tagged wrapper the
//! environment stores them as.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Something that must be started before the service takes traffic.
#[async_trait]
pub trait Startable: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
}

/// Something that must be stopped when the service shuts down.
#[async_trait]
pub trait Stoppable: Send + Sync {
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Both halves of the lifecycle. Implemented for every type that is
/// [`Startable`] and [`Stoppable`].
pub trait Managed: Startable + Stoppable {}

impl<T: Startable + Stoppable> Managed for T {}

/// Which lifecycle hooks a resource has.
#[derive(Clone)]
pub enum Hooks {
    Managed(Arc<dyn Managed>),
    StartOnly(Arc<dyn Startable>),
    StopOnly(Arc<dyn Stoppable>),
}

impl Hooks {
    pub(crate) async fn start(&self) -> anyhow::Result<()> {
        match self {
            Hooks::Managed(m) => m.start().await,
            Hooks::StartOnly(s) => s.start().await,
            Hooks::StopOnly(_) => Ok(()),
        }
    }

    pub(crate) async fn stop(&self) -> anyhow::Result<()> {
        match self {
            Hooks::Managed(m) => m.stop().await,
            Hooks::StopOnly(s) => s.stop().await,
            Hooks::StartOnly(_) => Ok(()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Hooks::Managed(_) => "managed",
            Hooks::StartOnly(_) => "start_only",
            Hooks::StopOnly(_) => "stop_only",
        }
    }
}

/// A named entry in the lifecycle ledger. The name is only used for logs and metrics.
#[derive(Clone)]
pub struct ManagedResource {
    name: String,
    hooks: Hooks,
}

impl ManagedResource {
    pub fn new(name: impl Into<String>, hooks: Hooks) -> Self {
        Self {
            name: name.into(),
            hooks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }
}

impl fmt::Debug for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedResource")
            .field("name", &self.name)
            .field("hooks", &self.hooks.kind())
            .finish()
    }
}
