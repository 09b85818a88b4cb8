//! Proxy error types.

use thiserror::Error;

pub use crate::ca::CaError;

/// Errors that can occur in the proxy engine.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket or file I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate authority error.
    #[error("certificate authority error: {0}")]
    Ca(#[from] CaError),

    /// TLS configuration or handshake error.
    #[error("tls error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// HTTP protocol error.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// The upstream could not be reached or misbehaved.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
