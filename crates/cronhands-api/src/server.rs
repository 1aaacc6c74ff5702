//! HTTP server for the status page.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ApiError;
use crate::routes::{AppState, cron_router};

/// Serves [`cron_router`] until cancelled.
pub struct ApiServer {
    addr: String,
    router: Router,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, state: AppState) -> Self {
        Self {
            addr: addr.into(),
            router: cron_router(state),
        }
    }

    /// Get the server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Bind and serve. Returns once `cancel` fires and open connections drain.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ApiError> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ApiError> {
        let local: SocketAddr = listener.local_addr()?;
        info!("cron status server listening on {}", local);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("cron status server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer").field("addr", &self.addr).finish()
    }
}
