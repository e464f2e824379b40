use std::sync::Arc;

use async_trait::async_trait;
use lifecycle::Startable;
use tracing::{error, info};

use crate::error::HealthError;
use crate::manager::HealthCheckManager;

/// Start-only resource that fails startup when a configured health check was never
/// registered, which almost always means a typo in the configuration.
///
/// Manage it after every check has been registered and before the manager itself.
pub struct HealthCheckConfigValidator {
    manager: Arc<HealthCheckManager>,
}

impl HealthCheckConfigValidator {
    pub fn new(manager: Arc<HealthCheckManager>) -> Self {
        Self { manager }
    }

    pub fn validate(&self) -> Result<(), HealthError> {
        if !self.manager.config().enabled {
            return Ok(());
        }
        let missing = self.manager.unregistered_checks();
        if missing.is_empty() {
            info!(
                health = %self.manager.name(),
                checks = self.manager.check_names().len(),
                "All configured health checks are registered"
            );
            return Ok(());
        }
        for name in &missing {
            error!(check = %name, "Health check configured but never registered");
        }
        Err(HealthError::UnregisteredChecks(missing))
    }
}

#[async_trait]
impl Startable for HealthCheckConfigValidator {
    async fn start(&self) -> anyhow::Result<()> {
        self.validate()?;
        Ok(())
    }
}
