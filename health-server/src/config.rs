use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use health::{ExecutorConfig, HealthCheckConfiguration, HealthConfig, HealthError};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3308")]
    pub port: u16,

    #[envconfig(default = "true")]
    pub health_enabled: bool,

    // Suffix for the health executor and log names
    pub health_name: Option<String>,

    // JSON array of health check configurations
    #[envconfig(default = "[]")]
    pub health_checks: HealthChecksDocument,

    #[envconfig(default = "true")]
    pub initial_overall_state: bool,

    #[envconfig(default = "true")]
    pub delayed_shutdown_handler_enabled: bool,

    #[envconfig(default = "15")]
    pub shutdown_wait_period_secs: u64,

    #[envconfig(default = "5000")]
    pub check_timeout_ms: u64,

    #[envconfig(default = "4")]
    pub max_concurrent_checks: usize,

    #[envconfig(default = "32")]
    pub check_queue_capacity: usize,

    // Shut down when this file appears, for k8s pre-stop hooks
    pub prestop_file: Option<PathBuf>,

    #[envconfig(default = "false")]
    pub log_json: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    pub fn bind_address(&self) -> String {
        match self.host.parse::<std::net::Ipv6Addr>() {
            Ok(ip) => SocketAddr::from((ip, self.port)).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            enabled: self.health_enabled,
            name: self.health_name.clone(),
            health_checks: self.health_checks.0.clone(),
            initial_overall_state: self.initial_overall_state,
            delayed_shutdown_handler_enabled: self.delayed_shutdown_handler_enabled,
            shutdown_wait_period: Duration::from_secs(self.shutdown_wait_period_secs),
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            executor: ExecutorConfig {
                max_concurrent_checks: self.max_concurrent_checks,
                queue_capacity: self.check_queue_capacity,
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HealthChecksDocument(pub Vec<HealthCheckConfiguration>);

impl FromStr for HealthChecksDocument {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(serde_json::from_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_build_an_empty_health_config() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        let health = config.health_config();

        assert!(health.enabled);
        assert!(health.health_checks.is_empty());
        assert_eq!(health.effective_shutdown_wait(), Duration::from_secs(15));
        assert_eq!(config.bind_address(), "[::]:3308");
    }

    #[test]
    fn parses_checks_from_the_environment() {
        let env = HashMap::from([
            (
                "HEALTH_CHECKS".to_string(),
                r#"[{"name": "db", "critical": true, "probe": {"type": "tcp", "host": "db", "port": 5432}}]"#
                    .to_string(),
            ),
            ("BIND_HOST".to_string(), "127.0.0.1".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        let checks = &config.health_config().health_checks;
        assert_eq!(checks.len(), 1);
        assert!(checks[0].is_critical());
        assert_eq!(config.bind_address(), "127.0.0.1:3308");
    }

    #[test]
    fn rejects_malformed_check_document() {
        assert!("{not json".parse::<HealthChecksDocument>().is_err());
    }
}
