use std::sync::Arc;

use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use health::{HealthCheckConfigValidator, HealthCheckManager, ProbeRegistry};
use lifecycle::{LifecycleEnvironment, ShutdownCoordinator};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use health_server::config::Config;
use health_server::router;
use health_server::server::HttpServer;

const SERVICE_NAME: &str = "health-server";

fn init_logging(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let log_layer = if json {
        fmt::layer().json().with_filter(filter).boxed()
    } else {
        fmt::layer().with_target(true).with_filter(filter).boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

async fn run(config: Config) -> Result<()> {
    let health_config = config.health_config();
    let grace_period = health_config.effective_shutdown_wait();
    let manager = Arc::new(
        HealthCheckManager::new(health_config).wrap_err("invalid health check configuration")?,
    );
    let probes = manager
        .register_probes(&ProbeRegistry::with_defaults())
        .wrap_err("failed to build health check probes")?;
    info!(probes, checks = ?manager.check_names(), "registered health checks");

    let mut app = router::router(manager.clone());
    if config.export_prometheus {
        let recorder = PrometheusBuilder::new()
            .install_recorder()
            .wrap_err("failed to install prometheus recorder")?;
        app = router::with_metrics(app, recorder);
    }

    let environment = Arc::new(LifecycleEnvironment::new(SERVICE_NAME));
    environment.manage_startable(
        "health-config-validator",
        Arc::new(HealthCheckConfigValidator::new(manager.clone())),
    );
    environment.manage("health-check-manager", manager.clone());
    environment.manage(
        "http-server",
        Arc::new(HttpServer::new(config.bind_address(), app)),
    );

    let mut coordinator = ShutdownCoordinator::builder(SERVICE_NAME, environment.clone())
        .with_grace_period(grace_period)
        .with_notifier(manager.clone());
    if let Some(path) = &config.prestop_file {
        coordinator = coordinator.with_prestop_file(path);
    }
    let coordinator = coordinator.build();
    coordinator.register();

    if let Err(e) = environment.start_all().await {
        error!("startup failed: {e}");
        let report = environment.stop_all().await;
        if !report.is_clean() {
            error!(failed = ?report.failed, "cleanup after failed startup was not clean");
        }
        return Err(e).wrap_err("failed to start");
    }
    info!(healthy = manager.is_healthy(), "{SERVICE_NAME} started");

    coordinator.wait().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    init_logging(config.log_json);

    let result = run(config).await;
    if let Err(e) = &result {
        error!("exiting: {e:#}");
    } else {
        info!("exiting");
    }
    result
}
