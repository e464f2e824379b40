use std::path::PathBuf;
use std::time::Duration;

use tokio::signal::unix::SignalKind;
use tracing::{error, info};

/// Resolves with the trigger reason once SIGINT, SIGTERM or the pre-stop file is observed.
pub(crate) async fn wait_for_shutdown_signal(prestop_file: Option<PathBuf>) -> &'static str {
    let ctrl_c = tokio::signal::ctrl_c();
    let sigterm = async {
        match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    let prestop = async {
        let Some(path) = prestop_file else {
            return std::future::pending::<()>().await;
        };
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if path.exists() {
                return;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT");
            "sigint"
        }
        _ = sigterm => {
            info!("received SIGTERM");
            "sigterm"
        }
        _ = prestop => {
            info!("prestop file detected");
            "prestop"
        }
    }
}
