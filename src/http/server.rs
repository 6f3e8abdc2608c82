//! HTTP server implementation.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{self, AppState};
use super::identity::resolver_for;
use crate::config::QuotaGateConfig;
use crate::error::{LimiterError, Result};
use crate::ratelimit::DecisionService;

/// Path of the limit endpoint.
pub const LIMIT_PATH: &str = "/api/limit";

/// Build the router serving the limit endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            LIMIT_PATH,
            get(handlers::check_limit).post(handlers::consume_limit),
        )
        .with_state(state)
}

/// HTTP server for the limit endpoint.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Handler state
    state: AppState,
}

impl HttpServer {
    /// Create a new server from configuration and a decision service.
    pub fn new(config: &QuotaGateConfig, service: DecisionService) -> Self {
        Self {
            addr: config.server.http_addr,
            state: AppState {
                service,
                identity: resolver_for(&config.identity),
                on_store_error: config.server.on_store_error,
            },
        }
    }

    /// The address this server binds to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            disabled = self.state.service.is_disabled(),
            on_store_error = ?self.state.on_store_error,
            "Starting HTTP server"
        );

        let app = router(self.state).layer(TraceLayer::new_for_http());

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            LimiterError::Server(e.to_string())
        })
    }
}
