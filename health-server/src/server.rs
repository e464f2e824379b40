use async_trait::async_trait;
use axum::Router;
use lifecycle::{Startable, Stoppable};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The admin HTTP server as a managed resource. Register it last so it keeps
/// answering health probes through the shutdown grace period and is the first
/// thing stopped afterwards.
pub struct HttpServer {
    bind: String,
    router: Router,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpServer {
    pub fn new(bind: String, router: Router) -> Self {
        Self {
            bind,
            router,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Startable for HttpServer {
    async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind).await?;
        info!(address = %listener.local_addr()?, "listening");

        let router = self.router.clone();
        let shutdown = self.cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("http server failed: {e}");
            }
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl Stoppable for HttpServer {
    async fn stop(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.await?;
        }
        info!("http server stopped");
        Ok(())
    }
}
