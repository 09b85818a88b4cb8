//! Content-Type header lookup tables.

use crate::{ContentInfo, DetectionMethod};

/// Known binary MIME types with their usual extension.
const BINARY_TYPES: &[(&str, &str)] = &[
    // Images
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/x-icon", "ico"),
    ("image/avif", "avif"),
    ("image/heic", "heic"),
    ("image/heif", "heif"),
    // Audio
    ("audio/mpeg", "mp3"),
    ("audio/wav", "wav"),
    ("audio/ogg", "ogg"),
    ("audio/webm", "webm"),
    ("audio/flac", "flac"),
    ("audio/aac", "aac"),
    ("audio/mp4", "m4a"),
    // Video
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/ogg", "ogv"),
    ("video/quicktime", "mov"),
    ("video/x-msvideo", "avi"),
    ("video/x-matroska", "mkv"),
    // Archives
    ("application/zip", "zip"),
    ("application/gzip", "gz"),
    ("application/x-tar", "tar"),
    ("application/x-rar-compressed", "rar"),
    ("application/x-7z-compressed", "7z"),
    ("application/x-bzip2", "bz2"),
    ("application/x-xz", "xz"),
    // Documents
    ("application/pdf", "pdf"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    // Executables
    ("application/octet-stream", ""),
    ("application/x-executable", "exe"),
    ("application/x-mach-binary", ""),
    ("application/x-elf", ""),
    ("application/x-dosexec", "exe"),
    // Fonts
    ("font/woff", "woff"),
    ("font/woff2", "woff2"),
    ("font/ttf", "ttf"),
    ("font/otf", "otf"),
    ("application/font-woff", "woff"),
    ("application/font-woff2", "woff2"),
    // Other binary
    ("application/x-shockwave-flash", "swf"),
    ("application/wasm", "wasm"),
];

/// Known text MIME types with their usual extension.
const TEXT_TYPES: &[(&str, &str)] = &[
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/css", "css"),
    ("text/javascript", "js"),
    ("text/xml", "xml"),
    ("text/csv", "csv"),
    ("text/markdown", "md"),
    ("text/calendar", "ics"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("application/javascript", "js"),
    ("application/x-javascript", "js"),
    ("application/ecmascript", "js"),
    ("application/ld+json", "jsonld"),
    ("application/x-yaml", "yaml"),
    ("application/yaml", "yaml"),
    ("application/x-www-form-urlencoded", ""),
    ("application/graphql", "graphql"),
    ("image/svg+xml", "svg"),
];

/// Classifies a normalized MIME type, if it is recognized.
///
/// Exact table entries are checked first, then type-family prefixes
/// (`text/*` is text; `audio/*`, `video/*`, and `image/*` except SVG are
/// binary), then the `+json` / `+xml` structured-syntax suffixes.
pub fn detect_by_content_type(ct: &str) -> Option<ContentInfo> {
    if let Some((_, ext)) = BINARY_TYPES.iter().find(|(mime, _)| *mime == ct) {
        return Some(ContentInfo::binary(DetectionMethod::ContentType, 0.9).with_mime(ct, ext));
    }

    if let Some((_, ext)) = TEXT_TYPES.iter().find(|(mime, _)| *mime == ct) {
        return Some(ContentInfo::text(DetectionMethod::ContentType, 0.9).with_mime(ct, ext));
    }

    if ct.starts_with("text/") {
        return Some(ContentInfo::text(DetectionMethod::ContentType, 0.8).with_mime(ct, ""));
    }

    if ct.starts_with("audio/") || ct.starts_with("video/") {
        return Some(ContentInfo::binary(DetectionMethod::ContentType, 0.8).with_mime(ct, ""));
    }
    if ct.starts_with("image/") && ct != "image/svg+xml" {
        return Some(ContentInfo::binary(DetectionMethod::ContentType, 0.8).with_mime(ct, ""));
    }

    // Structured syntax suffixes, e.g. application/vnd.api+json
    if ct.ends_with("+json") || ct.ends_with("+xml") {
        return Some(ContentInfo::text(DetectionMethod::ContentType, 0.85).with_mime(ct, ""));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_binary_types() {
        for ct in ["image/png", "application/pdf", "font/woff2", "application/zip"] {
            let info = detect_by_content_type(ct).unwrap();
            assert!(info.is_binary, "{} should be binary", ct);
            assert_eq!(info.mime_type, ct);
        }
    }

    #[test]
    fn known_text_types() {
        for ct in ["application/json", "text/html", "image/svg+xml", "text/csv"] {
            let info = detect_by_content_type(ct).unwrap();
            assert!(info.is_text, "{} should be text", ct);
        }
    }

    #[test]
    fn text_prefix_rule() {
        let info = detect_by_content_type("text/x-custom").unwrap();
        assert!(info.is_text);
        assert!((info.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn media_prefix_rules() {
        assert!(detect_by_content_type("audio/x-custom").unwrap().is_binary);
        assert!(detect_by_content_type("video/x-custom").unwrap().is_binary);
        assert!(detect_by_content_type("image/x-custom").unwrap().is_binary);
    }

    #[test]
    fn svg_is_text_despite_image_prefix() {
        assert!(detect_by_content_type("image/svg+xml").unwrap().is_text);
    }

    #[test]
    fn structured_suffix_rules() {
        let info = detect_by_content_type("application/vnd.api+json").unwrap();
        assert!(info.is_text);
        assert!((info.confidence - 0.85).abs() < f64::EPSILON);
        assert!(detect_by_content_type("application/atom+xml").unwrap().is_text);
    }

    #[test]
    fn unknown_type_is_none() {
        assert!(detect_by_content_type("application/x-nonsense").is_none());
    }
}
