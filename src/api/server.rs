//! Query server using Axum

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::store::CatalogStore;

use super::routes;

/// Shared state for query handlers
#[derive(Clone)]
pub struct AppState {
    pub store: CatalogStore,
    /// Advertised in the usage text
    pub port: u16,
}

/// Query server
pub struct ApiServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(host: impl Into<String>, port: u16, store: CatalogStore) -> Self {
        Self {
            host: host.into(),
            port,
            state: AppState { store, port },
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", self.host, self.port))
    }

    /// Serve on an already bound listener until `shutdown` changes
    #[instrument(skip(self, listener, shutdown))]
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = self.build_router();

        info!("API server listening on {}", listener.local_addr()?);
        info!("Visit http://localhost:{} for API documentation", self.port);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .context("API server failed")?;

        info!("API server shut down");
        Ok(())
    }
}
