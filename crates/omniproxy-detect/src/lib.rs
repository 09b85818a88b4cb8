//! Content type detection using multiple methods: Content-Type headers,
//! magic bytes (file signatures), and byte analysis heuristics.
//!
//! This crate is independent from the rest of OmniProxy and can be used on
//! its own.
//!
//! ```
//! use omniproxy_detect::{detect, is_binary};
//!
//! assert!(is_binary("image/png", &[0x89, 0x50, 0x4E, 0x47]));
//!
//! let info = detect("", b"{\"status\":\"ok\"}");
//! assert!(info.is_text);
//! assert_eq!(info.mime_type, "application/json");
//! ```

mod content_type;
mod heuristic;
mod magic;

pub use content_type::detect_by_content_type;
pub use heuristic::{detect_by_heuristic, is_valid_utf8, looks_like_json};
pub use magic::detect_by_magic_bytes;

/// How a detection result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// The Content-Type header was recognized.
    ContentType,
    /// A file signature (magic bytes) matched.
    Magic,
    /// Byte distribution heuristics decided.
    Heuristic,
}

impl DetectionMethod {
    /// Stable string name, useful for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::ContentType => "content-type",
            DetectionMethod::Magic => "magic",
            DetectionMethod::Heuristic => "heuristic",
        }
    }
}

/// Detailed information about detected content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentInfo {
    /// True if the content appears to be binary.
    pub is_binary: bool,
    /// True if the content appears to be text.
    pub is_text: bool,
    /// The detected or provided MIME type, empty if unknown.
    pub mime_type: String,
    /// The likely file extension (e.g. "png", "json"), empty if unknown.
    pub extension: String,
    /// How the detection was made.
    pub method: DetectionMethod,
    /// Detection confidence from 0.0 to 1.0.
    pub confidence: f64,
}

impl ContentInfo {
    pub(crate) fn binary(method: DetectionMethod, confidence: f64) -> Self {
        Self {
            is_binary: true,
            is_text: false,
            mime_type: String::new(),
            extension: String::new(),
            method,
            confidence,
        }
    }

    pub(crate) fn text(method: DetectionMethod, confidence: f64) -> Self {
        Self {
            is_binary: false,
            is_text: true,
            mime_type: String::new(),
            extension: String::new(),
            method,
            confidence,
        }
    }

    pub(crate) fn with_mime(mut self, mime: &str, ext: &str) -> Self {
        self.mime_type = mime.to_string();
        self.extension = ext.to_string();
        self
    }
}

/// Options controlling detection behavior.
#[derive(Debug, Clone)]
pub struct Options {
    /// Trust the Content-Type header if provided and recognized.
    pub trust_content_type: bool,
    /// Ratio of high-bit bytes above which content is suspected binary
    /// (unless it is valid UTF-8).
    pub high_bit_threshold: f64,
    /// Number of bytes to examine for heuristic detection.
    pub check_bytes: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            trust_content_type: true,
            high_bit_threshold: 0.30,
            check_bytes: 512,
        }
    }
}

/// Returns true if the content appears to be binary.
///
/// `content_type` is optional and may be empty.
pub fn is_binary(content_type: &str, data: &[u8]) -> bool {
    detect(content_type, data).is_binary
}

/// Returns true if the content appears to be text.
pub fn is_text(content_type: &str, data: &[u8]) -> bool {
    !is_binary(content_type, data)
}

/// Analyzes content and returns detailed information.
pub fn detect(content_type: &str, data: &[u8]) -> ContentInfo {
    detect_with_options(content_type, data, &Options::default())
}

/// Analyzes content with custom options.
///
/// Decision order: Content-Type table (if trusted and recognized), magic
/// bytes, then byte heuristics.
pub fn detect_with_options(content_type: &str, data: &[u8], opts: &Options) -> ContentInfo {
    let content_type = normalize_content_type(content_type);

    if opts.trust_content_type && !content_type.is_empty() {
        if let Some(info) = detect_by_content_type(&content_type) {
            return info;
        }
    }

    if !data.is_empty() {
        if let Some(info) = detect_by_magic_bytes(data) {
            return info;
        }
    }

    detect_by_heuristic(data, opts)
}

/// Extracts and lowercases the MIME type from a Content-Type header value,
/// dropping parameters ("text/html; charset=utf-8" -> "text/html").
fn normalize_content_type(ct: &str) -> String {
    let ct = match ct.find(';') {
        Some(idx) => &ct[..idx],
        None => ct,
    };
    ct.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_parameters() {
        assert_eq!(normalize_content_type("text/html; charset=utf-8"), "text/html");
        assert_eq!(normalize_content_type("  Application/JSON "), "application/json");
        assert_eq!(normalize_content_type(""), "");
    }

    #[test]
    fn content_type_wins_when_trusted() {
        // JSON payload, but the header claims PNG: header wins by default.
        let info = detect("image/png", b"{\"a\":1}");
        assert!(info.is_binary);
        assert_eq!(info.method, DetectionMethod::ContentType);
    }

    #[test]
    fn untrusted_content_type_falls_through_to_magic() {
        let opts = Options {
            trust_content_type: false,
            ..Options::default()
        };
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
        let info = detect_with_options("text/plain", &png, &opts);
        assert!(info.is_binary);
        assert_eq!(info.method, DetectionMethod::Magic);
        assert_eq!(info.mime_type, "image/png");
    }

    #[test]
    fn empty_input_is_text() {
        let info = detect("", b"");
        assert!(info.is_text);
        assert_eq!(info.method, DetectionMethod::Heuristic);
        assert!((info.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn binary_xor_text_always_holds() {
        let samples: &[(&str, &[u8])] = &[
            ("", b""),
            ("image/png", b"\x89PNG\r\n\x1a\n"),
            ("", b"plain old text"),
            ("", &[0u8, 1, 2, 3, 4, 5]),
            ("application/json", b"{}"),
            ("", b"\xff\xfe\xfd\xfc\xfb\xfa\xf9\xf8"),
        ];
        for (ct, data) in samples {
            let info = detect(ct, data);
            assert!(info.is_binary ^ info.is_text, "failed for {:?}", data);
        }
    }

    #[test]
    fn detect_is_deterministic() {
        let data = b"some ordinary text with numbers 12345";
        assert_eq!(detect("", data), detect("", data));
    }
}
