//! Traffic capture for OmniProxy.
//!
//! The [`Capturer`] observes proxied requests and responses and turns them
//! into [`Record`]s: headers are redacted, bodies are size-capped and
//! classified (binary bodies are replaced with a sentinel), and finished
//! records are filtered, written to an output format, and fanned out to
//! registered [`RecordSink`]s.
//!
//! Output formats: newline-delimited JSON (default), pretty JSON, and
//! HAR 1.2 (buffered until [`Capturer::close`]).

mod capturer;
mod filter;
mod har;
mod record;

pub use capturer::{CaptureConfig, Capturer, OutputFormat, RecordSink, DEFAULT_MAX_BODY_SIZE};
pub use filter::{Filter, FilterConfig};
pub use har::{Har, HarEntry, HarLog, HarWriter};
pub use record::{BodyValue, Record, RequestRecord, ResponseRecord, BINARY_SENTINEL};

use thiserror::Error;

/// Errors produced while capturing or writing records.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Writing a record to the output failed.
    #[error("write error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A wildcard pattern did not compile.
    #[error("invalid filter pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
