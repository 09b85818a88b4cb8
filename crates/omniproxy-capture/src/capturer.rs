//! The capture engine: observes requests and responses, builds records.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use omniproxy_detect::{detect_with_options, Options as DetectOptions};

use crate::filter::Filter;
use crate::har::HarWriter;
use crate::record::{BodyValue, Record, RequestRecord, ResponseRecord};
use crate::Result;

/// Default maximum body size retained per direction (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Headers removed from captured records, values included.
const DEFAULT_REDACT_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

/// Output format for captured records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON record per line.
    #[default]
    Ndjson,
    /// Pretty-printed JSON blocks with a trailing newline.
    Json,
    /// HTTP Archive 1.2; buffered and written on close.
    Har,
    /// Intermediate representation; line-oriented like ndjson.
    Ir,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ndjson" => Ok(OutputFormat::Ndjson),
            "json" => Ok(OutputFormat::Json),
            "har" => Ok(OutputFormat::Har),
            "ir" => Ok(OutputFormat::Ir),
            other => Err(format!("unknown capture format: {other}")),
        }
    }
}

/// Receives every emitted record. Implementations must not block.
pub trait RecordSink: Send + Sync {
    fn handle(&self, rec: &Record);
}

/// Capturer configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub format: OutputFormat,
    /// Whether to capture headers at all.
    pub include_headers: bool,
    /// Headers to drop, case-insensitive. Extends the default sensitive set
    /// when constructed through [`CaptureConfig::default`].
    pub redact_headers: Vec<String>,
    /// Whether to capture bodies at all.
    pub include_body: bool,
    /// Maximum number of body bytes retained per direction.
    pub max_body_size: usize,
    /// Replace binary bodies with the sentinel instead of retaining them.
    pub skip_binary: bool,
    /// Trust Content-Type hints during binary detection.
    pub trust_content_type: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Ndjson,
            include_headers: true,
            redact_headers: DEFAULT_REDACT_HEADERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            include_body: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            skip_binary: true,
            trust_content_type: true,
        }
    }
}

/// Captures HTTP transactions into [`Record`]s.
pub struct Capturer {
    config: CaptureConfig,
    filter: RwLock<Option<Filter>>,
    output: Mutex<Option<Box<dyn Write + Send>>>,
    har: Mutex<Option<HarWriter>>,
    sinks: RwLock<Vec<Arc<dyn RecordSink>>>,
}

impl Capturer {
    /// Creates a capturer with no output writer; records still reach sinks.
    pub fn new(config: CaptureConfig) -> Self {
        let har = match config.format {
            OutputFormat::Har => Some(HarWriter::new()),
            _ => None,
        };
        Self {
            config,
            filter: RwLock::new(None),
            output: Mutex::new(None),
            har: Mutex::new(har),
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Sets the output writer.
    pub fn with_output(self, writer: Box<dyn Write + Send>) -> Self {
        *self.output.lock() = Some(writer);
        self
    }

    /// Installs or replaces the record filter. Swapping is atomic with
    /// respect to concurrent finishes.
    pub fn set_filter(&self, filter: Option<Filter>) {
        *self.filter.write() = filter;
    }

    /// Whether a record filter is currently installed.
    pub fn has_filter(&self) -> bool {
        self.filter.read().is_some()
    }

    /// Registers a sink invoked for every emitted record.
    pub fn add_sink(&self, sink: Arc<dyn RecordSink>) {
        self.sinks.write().push(sink);
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Begins capturing a request. The body, when given, is the fully
    /// buffered request body; only the first `max_body_size` bytes are
    /// retained.
    pub fn start(
        &self,
        method: &Method,
        uri: &Uri,
        scheme: &str,
        host: &str,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Record {
        let path = uri.path().to_string();
        let url = if uri.scheme().is_some() {
            uri.to_string()
        } else {
            let pq = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            format!("{scheme}://{host}{pq}")
        };

        let mut request = RequestRecord {
            method: method.as_str().to_ascii_uppercase(),
            url,
            host: host.to_string(),
            path,
            scheme: scheme.to_string(),
            query: parse_query(uri.query()),
            ..RequestRecord::default()
        };

        if self.config.include_headers {
            request.headers = self.filter_headers(headers);
            request.content_type = header_value(headers, http::header::CONTENT_TYPE.as_str());
        }

        if let Some(body) = body {
            if self.config.include_body && !body.is_empty() {
                let (value, size, is_binary) = self.capture_body(body, &request.content_type);
                request.body = value;
                request.body_size = size;
                request.is_binary = is_binary;
            }
        }

        Record::started(request)
    }

    /// Completes a record with the response and emits it.
    ///
    /// Returns `Ok(true)` if the record passed the filter and was emitted.
    pub fn finish(
        &self,
        mut rec: Record,
        status: StatusCode,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Result<bool> {
        rec.finish_timing();

        let mut response = ResponseRecord {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            ..ResponseRecord::default()
        };

        if self.config.include_headers {
            response.headers = self.filter_headers(headers);
            response.content_type = header_value(headers, http::header::CONTENT_TYPE.as_str());
        }

        if let Some(body) = body {
            if self.config.include_body && !body.is_empty() {
                let (value, size, is_binary) = self.capture_body(body, &response.content_type);
                response.body = value;
                response.size = size;
                response.is_binary = is_binary;
            }
        }

        rec.response = response;
        self.emit(rec)
    }

    /// Degraded completion carrying only status and byte count, for paths
    /// where the response was streamed without inspection.
    pub fn finish_with_status(
        &self,
        mut rec: Record,
        status: u16,
        bytes_written: i64,
    ) -> Result<bool> {
        rec.finish_timing();
        rec.response = ResponseRecord {
            status,
            size: bytes_written,
            ..ResponseRecord::default()
        };
        self.emit(rec)
    }

    /// Flushes buffered output. For the HAR format this writes the complete
    /// archive document.
    pub fn close(&self) -> Result<()> {
        let mut output = self.output.lock();
        if let Some(har) = self.har.lock().as_ref() {
            if let Some(writer) = output.as_mut() {
                har.write_to(writer)?;
            }
        }
        if let Some(writer) = output.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn emit(&self, rec: Record) -> Result<bool> {
        if let Some(filter) = self.filter.read().as_ref() {
            if !filter.matches(&rec) {
                return Ok(false);
            }
        }

        for sink in self.sinks.read().iter() {
            sink.handle(&rec);
        }

        self.write_record(&rec)?;
        Ok(true)
    }

    fn write_record(&self, rec: &Record) -> Result<()> {
        if let Some(har) = self.har.lock().as_mut() {
            har.add_record(rec);
            return Ok(());
        }

        let mut output = self.output.lock();
        let writer = match output.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };

        let data = match self.config.format {
            OutputFormat::Json => serde_json::to_vec_pretty(rec)?,
            _ => serde_json::to_vec(rec)?,
        };
        writer.write_all(&data)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Retains at most `max_body_size` bytes and classifies them. Returns
    /// (body value, original size, is_binary).
    fn capture_body(&self, body: &Bytes, content_type: &str) -> (Option<BodyValue>, i64, bool) {
        let retained = &body[..body.len().min(self.config.max_body_size)];
        let size = body.len() as i64;

        let opts = DetectOptions {
            trust_content_type: self.config.trust_content_type,
            ..DetectOptions::default()
        };
        let info = detect_with_options(content_type, retained, &opts);

        if self.config.skip_binary && info.is_binary {
            return (Some(BodyValue::Binary), size, true);
        }

        (Some(parse_body(retained, content_type)), size, false)
    }

    fn filter_headers(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (name, value) in headers {
            let key = name.as_str().to_ascii_lowercase();
            if self
                .config
                .redact_headers
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&key))
            {
                continue;
            }
            if let Ok(v) = value.to_str() {
                // First value per key wins.
                out.entry(key).or_insert_with(|| v.to_string());
            }
        }
        out
    }
}

/// Parses a body as JSON when the content type or first byte suggests it,
/// otherwise keeps it as UTF-8 text.
fn parse_body(body: &[u8], content_type: &str) -> BodyValue {
    let first = body.iter().position(|b| !b.is_ascii_whitespace());
    let json_hinted = content_type.to_ascii_lowercase().contains("json")
        || matches!(first.map(|i| body[i]), Some(b'{') | Some(b'['));

    if json_hinted {
        if let Ok(v) = serde_json::from_slice::<serde_json::Value>(body) {
            return BodyValue::Parsed(v);
        }
    }
    BodyValue::Text(String::from_utf8_lossy(body).into_owned())
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(q) = query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }
    }
    out
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}
