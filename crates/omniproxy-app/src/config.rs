//! Application configuration: YAML file with CLI overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use omniproxy_capture::OutputFormat;

/// Default config file location: `<home>/.omniproxy/config.yaml`.
pub fn default_config_path() -> PathBuf {
    match directories::UserDirs::new() {
        Some(dirs) => dirs.home_dir().join(".omniproxy").join("config.yaml"),
        None => PathBuf::from(".omniproxy").join("config.yaml"),
    }
}

/// Top-level configuration. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Proxy listen address.
    pub listen: SocketAddr,
    /// API server listen address; `api_enabled: false` disables it.
    pub api_listen: SocketAddr,
    pub api_enabled: bool,
    /// Decrypt CONNECT traffic.
    pub mitm: bool,
    /// Hosts tunneled without decryption (`*.suffix` supported).
    pub skip_hosts: Vec<String>,
    /// Parent proxy URL.
    pub upstream: Option<String>,
    pub store: StoreSection,
    pub capture: CaptureSection,
    pub cert_cache: CertCacheSection,
    /// Verbose per-request logging.
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            api_listen: SocketAddr::from(([127, 0, 0, 1], 8081)),
            api_enabled: true,
            mitm: true,
            skip_hosts: Vec::new(),
            upstream: None,
            store: StoreSection::default(),
            capture: CaptureSection::default(),
            cert_cache: CertCacheSection::default(),
            verbose: false,
        }
    }
}

/// Where captured traffic goes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Database URL (`sqlite://...`, `postgres://...`). Takes precedence
    /// over `file`.
    pub url: Option<String>,
    /// NDJSON/JSON output file.
    pub file: Option<PathBuf>,
    pub format: OutputFormat,
    pub queue_size: usize,
    pub batch_size: usize,
    pub flush_period_ms: u64,
    pub workers: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            format: OutputFormat::Ndjson,
            queue_size: 10_000,
            batch_size: 100,
            flush_period_ms: 100,
            workers: 2,
        }
    }
}

impl StoreSection {
    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }
}

/// Capture behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub include_hosts: Vec<String>,
    pub exclude_hosts: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub include_methods: Vec<String>,
    pub exclude_methods: Vec<String>,
    pub skip_binary: bool,
    pub max_body_size: usize,
    /// Additional headers to redact beyond the default sensitive set.
    pub redact_headers: Vec<String>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            include_hosts: Vec::new(),
            exclude_hosts: Vec::new(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            include_methods: Vec::new(),
            exclude_methods: Vec::new(),
            skip_binary: true,
            max_body_size: 1024 * 1024,
            redact_headers: Vec::new(),
        }
    }
}

impl CaptureSection {
    /// True when any filter list is configured.
    pub fn has_filter(&self) -> bool {
        !(self.include_hosts.is_empty()
            && self.exclude_hosts.is_empty()
            && self.include_paths.is_empty()
            && self.exclude_paths.is_empty()
            && self.include_methods.is_empty()
            && self.exclude_methods.is_empty())
    }
}

/// Leaf cache selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertCacheSection {
    pub kind: CertCacheKind,
    /// TTL variant: entry lifetime in seconds.
    pub ttl_secs: u64,
    /// TTL variant: background sweep interval in seconds.
    pub cleanup_secs: u64,
    /// LRU variant: maximum cached leaves.
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertCacheKind {
    #[default]
    Ttl,
    Lru,
}

impl Default for CertCacheSection {
    fn default() -> Self {
        Self {
            kind: CertCacheKind::Ttl,
            ttl_secs: 3600,
            cleanup_secs: 300,
            capacity: 1000,
        }
    }
}

impl AppConfig {
    /// Loads the config file if it exists; defaults otherwise. An explicit
    /// path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }
}
