//! HTTP server for the proxy.
//!
//! Serves the three administrative endpoints under the reserved prefix
//! and hands every other path to the coordination engine via the
//! fallback route.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use doormanlb_common::config::ADMIN_PATH_PREFIX;
use doormanlb_common::{DoormanError, Result};

use crate::handler;
use crate::service::CachingService;

pub struct HttpServer {
    service: Arc<CachingService>,
}

impl HttpServer {
    /// Creates a new HTTP server.
    ///
    /// # Arguments
    /// * `service` - Arc-wrapped caching service
    ///
    /// # Returns
    /// A new HTTP server instance
    pub fn new(service: Arc<CachingService>) -> Self {
        Self { service }
    }

    /// Builds the axum application.
    ///
    /// Routes the three administrative endpoints under the reserved
    /// prefix and hands every other path to the fallback proxy
    /// handler. Exposed so tests can drive the full routing surface
    /// without binding a port themselves.
    ///
    /// # Returns
    /// The configured axum router
    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .route(&format!("{ADMIN_PATH_PREFIX}health"), get(handler::health))
            .route(&format!("{ADMIN_PATH_PREFIX}ready"), get(handler::ready))
            .route(&format!("{ADMIN_PATH_PREFIX}metrics"), get(handler::metrics))
            .fallback(handler::proxy)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.service))
    }

    /// Runs the HTTP server.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "0.0.0.0:8080")
    ///
    /// # Returns
    /// - `Ok(())` - Server ran and drained successfully
    /// - `Err(DoormanError)` - Server failed to start or run
    ///
    /// # Behavior
    /// - Binds to the specified address
    /// - Logs the listening address
    /// - Runs until SIGINT/SIGTERM, then drains in-flight connections
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let app = self.app();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DoormanError::Config(format!("failed to bind to {addr}: {e}")))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DoormanError::Config(format!("failed to get local addr: {e}")))?;
        info!("doormanlb listening on {local_addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DoormanError::Config(format!("server error: {e}")))?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
