//! # HTTP Server
//!
//! Combines every route file into one router and serves it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::changes_routes::changes_routes;
use super::config::GatewayConfig;
use super::database_routes::database_routes;
use super::document_routes::document_routes;
use super::server_routes::server_routes;
use crate::gateway::Gateway;

/// CouchDB-compatible HTTP server
pub struct HttpServer {
    gateway: Arc<Gateway>,
    router: Router,
}

impl HttpServer {
    /// Create a server over a fresh in-memory store
    pub fn with_config(config: GatewayConfig) -> Self {
        Self::with_gateway(Arc::new(Gateway::in_memory(config)))
    }

    /// Create a server around an existing gateway
    pub fn with_gateway(gateway: Arc<Gateway>) -> Self {
        let router = build_router(Arc::clone(&gateway));
        Self { gateway, router }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.gateway.config().socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until ctrl-c, then stop background replications
    pub async fn start(self) -> Result<(), io::Error> {
        let addr: SocketAddr = self
            .socket_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid socket address: {}", e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, origin = %self.gateway.config().advertised_origin(), "couchgate listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.gateway.replicator().shutdown();
        info!("couchgate stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Build the combined router with all endpoints
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let config = gateway.config();

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .merge(server_routes(Arc::clone(&gateway)))
        .merge(database_routes(Arc::clone(&gateway)))
        .merge(changes_routes(Arc::clone(&gateway)))
        .merge(document_routes(gateway))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_with_custom_port() {
        let server = HttpServer::with_config(GatewayConfig::with_port(8080));
        assert_eq!(server.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_router_builds() {
        let server = HttpServer::with_config(GatewayConfig::default());
        let _router = server.router();
    }

    #[tokio::test]
    async fn test_bad_address_is_an_error() {
        let config = GatewayConfig {
            host: "not an address".into(),
            ..Default::default()
        };
        let err = HttpServer::with_config(config).start().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
