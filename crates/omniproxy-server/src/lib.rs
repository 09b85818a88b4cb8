//! OmniProxy HTTP API server.
//!
//! ## Endpoints
//!
//! - `GET /traffic` - List captured traffic with filtering and pagination
//! - `GET /traffic/{id}` - Full record detail
//! - `GET /stats` - Aggregate traffic statistics
//! - `GET /metrics` - Metrics snapshot (JSON)
//! - `GET /healthz` - Liveness probe
//! - `GET /readyz` - Readiness probe

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default API server port.
pub const DEFAULT_PORT: u16 = 8081;

/// Default API host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("server error: {0}")]
    Runtime(String),
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server over the given application state.
    pub fn new(config: ServerConfig, state: AppState) -> std::result::Result<Self, ServerError> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/traffic", get(handlers::list_traffic))
            .route("/traffic/{id}", get(handlers::get_traffic))
            .route("/stats", get(handlers::get_stats))
            .route("/metrics", get(handlers::metrics_snapshot))
            .route("/healthz", get(handlers::healthz))
            .route("/readyz", get(handlers::readyz))
            .layer(cors)
            .with_state(state);

        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {e}")))?;

        Ok(Self { router, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the router, mainly for tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Runs until the process is shut down.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        info!("starting API server on {}", self.addr);

        // SO_REUSEADDR so restarts do not trip over lingering sockets.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Bind(self.addr, e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::Bind(self.addr, e))?;
        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::Bind(self.addr, e))?;
        socket
            .listen(128)
            .map_err(|e| ServerError::Bind(self.addr, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::Bind(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Bind(self.addr, e))?;

        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        Ok(())
    }
}
