//! OmniProxy proxy engine: an intercepting HTTP/HTTPS forward proxy.
//!
//! The engine accepts client connections on a single socket and dispatches
//! by method. Plain absolute-form requests are forwarded; `CONNECT` is
//! either spliced as an opaque tunnel (skip-hosts, or MITM disabled) or
//! terminated with a leaf certificate minted on the fly by the [`Ca`] and
//! cached in a [`CertCache`]. Each observed exchange is handed to the
//! capturer.
//!
//! ```text
//! Client ──► ProxyEngine ──► dispatch
//!              │                ├─ absolute-form ──► forward ──► upstream
//!              │                └─ CONNECT host:port
//!              │                     ├─ skip-host ──► splice bytes
//!              │                     └─ MITM: leaf cert ──► TLS ──► inner
//!              │                                                   requests
//!              └─ Capturer (start/finish per exchange)
//! ```

mod ca;
mod cert_cache;
mod engine;
mod error;
mod tls;
mod upstream;

pub use ca::{default_ca_dir, default_cert_path, default_key_path, Ca, CaConfig, CaError};
pub use cert_cache::{CertCache, LeafCert, LruCertCache, TtlCertCache, TtlCertCacheConfig};
pub use engine::{ProxyConfig, ProxyEngine, ProxyHandle};
pub use error::{ProxyError, Result};
pub use tls::{insecure_client_config, install_default_crypto_provider};
pub use upstream::Upstream;

/// Default proxy listen port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Matches a skip-host pattern against a host. A leading `*` makes the rest
/// a suffix match (`*.pinned.test` matches `app.pinned.test`); anything
/// else is an exact comparison.
pub(crate) fn match_skip_host(pattern: &str, host: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return host.len() >= suffix.len() && host.ends_with(suffix);
    }
    pattern == host
}
