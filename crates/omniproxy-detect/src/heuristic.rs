//! Byte-distribution heuristics for content without a recognized header or
//! signature.

use crate::{ContentInfo, DetectionMethod, Options};

/// Analyzes byte patterns to decide whether content is binary or text.
pub fn detect_by_heuristic(data: &[u8], opts: &Options) -> ContentInfo {
    if data.is_empty() {
        return ContentInfo::text(DetectionMethod::Heuristic, 0.5);
    }

    let sample = &data[..data.len().min(opts.check_bytes)];

    let mut null_bytes = 0usize;
    let mut control_bytes = 0usize;
    let mut high_bit_bytes = 0usize;
    let mut printable_bytes = 0usize;

    for &b in sample {
        match b {
            0 => null_bytes += 1,
            0x09 | 0x0A | 0x0D => printable_bytes += 1,
            0x01..=0x08 | 0x0B..=0x1F | 0x7F => control_bytes += 1,
            0x20..=0x7E => printable_bytes += 1,
            _ => high_bit_bytes += 1,
        }
    }

    let total = sample.len() as f64;

    // Null bytes are a strong binary indicator; a stray trailing pad byte is
    // tolerated.
    if null_bytes > 0 && null_bytes as f64 / total > 0.01 {
        return ContentInfo::binary(DetectionMethod::Heuristic, 0.85);
    }

    if control_bytes as f64 / total > 0.05 {
        return ContentInfo::binary(DetectionMethod::Heuristic, 0.80);
    }

    // A lot of high-bit bytes is either non-ASCII text or binary; valid
    // UTF-8 decides which.
    if high_bit_bytes as f64 / total > opts.high_bit_threshold {
        if is_valid_utf8(sample) {
            return ContentInfo::text(DetectionMethod::Heuristic, 0.70).with_mime("text/plain", "");
        }
        return ContentInfo::binary(DetectionMethod::Heuristic, 0.75);
    }

    if looks_like_json(sample) {
        return ContentInfo::text(DetectionMethod::Heuristic, 0.75)
            .with_mime("application/json", "json");
    }

    if printable_bytes as f64 / total > 0.85 {
        return ContentInfo::text(DetectionMethod::Heuristic, 0.70).with_mime("text/plain", "txt");
    }

    ContentInfo::binary(DetectionMethod::Heuristic, 0.50)
}

/// Byte-wise UTF-8 validation.
///
/// Rejects overlong two-byte encodings, invalid start bytes, four-byte leads
/// beyond 0xF4, and truncated sequences.
pub fn is_valid_utf8(data: &[u8]) -> bool {
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b < 0x80 {
            i += 1;
            continue;
        }

        let size = if b & 0xE0 == 0xC0 {
            if b < 0xC2 {
                return false; // overlong encoding
            }
            2
        } else if b & 0xF0 == 0xE0 {
            3
        } else if b & 0xF8 == 0xF0 {
            if b > 0xF4 {
                return false; // beyond U+10FFFF
            }
            4
        } else {
            return false;
        };

        if i + size > data.len() {
            return false;
        }
        for j in 1..size {
            let c = data[i + j];
            if !(0x80..=0xBF).contains(&c) {
                return false;
            }
        }
        i += size;
    }
    true
}

/// Checks whether data appears to be JSON: after optional whitespace it must
/// open with `{` or `[`, and either close balanced with only whitespace
/// after, or look like plausibly truncated JSON (open depth below 100).
pub fn looks_like_json(data: &[u8]) -> bool {
    let mut i = 0;
    while i < data.len() && is_ws(data[i]) {
        i += 1;
    }
    if i >= data.len() {
        return false;
    }

    let opening = data[i];
    let closing = match opening {
        b'{' => b'}',
        b'[' => b']',
        _ => return false,
    };

    let mut depth = 1u32;
    let mut in_string = false;
    let mut escaped = false;

    for j in i + 1..data.len() {
        let b = data[j];

        if escaped {
            escaped = false;
            continue;
        }
        if b == b'\\' && in_string {
            escaped = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }

        if b == opening {
            depth += 1;
        } else if b == closing {
            depth -= 1;
            if depth == 0 {
                return data[j + 1..].iter().all(|&k| is_ws(k));
            }
        }
    }

    depth > 0 && depth < 100
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristic(data: &[u8]) -> ContentInfo {
        detect_by_heuristic(data, &Options::default())
    }

    #[test]
    fn null_bytes_mean_binary() {
        let data = vec![0u8; 100];
        let info = heuristic(&data);
        assert!(info.is_binary);
        assert!((info.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn control_bytes_mean_binary() {
        let mut data = b"text".to_vec();
        data.extend(std::iter::repeat(0x01u8).take(20));
        let info = heuristic(&data);
        assert!(info.is_binary);
        assert!((info.confidence - 0.80).abs() < f64::EPSILON);
    }

    #[test]
    fn utf8_high_bit_is_text() {
        let data = "日本語のテキストです。これは完全に有効なUTF-8です。".as_bytes();
        let info = heuristic(data);
        assert!(info.is_text);
        assert_eq!(info.mime_type, "text/plain");
        assert!((info.confidence - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_high_bit_is_binary() {
        let data: Vec<u8> = (0x80..=0xFF).cycle().take(100).collect();
        let info = heuristic(&data);
        assert!(info.is_binary);
        assert!((info.confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn json_detection() {
        let info = heuristic(b"  {\"key\": \"value\", \"n\": [1, 2, 3]}  ");
        assert!(info.is_text);
        assert_eq!(info.mime_type, "application/json");
        assert_eq!(info.extension, "json");
    }

    #[test]
    fn mostly_printable_is_text() {
        let info = heuristic(b"Just a perfectly ordinary sentence.");
        assert!(info.is_text);
        assert_eq!(info.extension, "txt");
    }

    #[test]
    fn utf8_rejects_overlong() {
        assert!(!is_valid_utf8(&[0xC0, 0x80]));
        assert!(!is_valid_utf8(&[0xC1, 0xBF]));
    }

    #[test]
    fn utf8_rejects_high_lead() {
        assert!(!is_valid_utf8(&[0xF5, 0x80, 0x80, 0x80]));
    }

    #[test]
    fn utf8_rejects_truncated() {
        assert!(!is_valid_utf8(&[0xE3, 0x81]));
    }

    #[test]
    fn utf8_rejects_bad_continuation() {
        assert!(!is_valid_utf8(&[0xC3, 0x20]));
    }

    #[test]
    fn utf8_accepts_ascii_and_multibyte() {
        assert!(is_valid_utf8(b"plain ascii"));
        assert!(is_valid_utf8("héllo wörld €".as_bytes()));
        assert!(is_valid_utf8("😀 emoji".as_bytes()));
    }

    #[test]
    fn json_balanced_with_trailing_garbage_is_not_json() {
        assert!(!looks_like_json(b"{\"a\":1} trailing"));
    }

    #[test]
    fn json_truncated_is_still_json() {
        assert!(looks_like_json(b"{\"a\": {\"b\": [1, 2"));
    }

    #[test]
    fn json_string_content_does_not_affect_depth() {
        assert!(looks_like_json(b"{\"a\": \"}}}}\"}"));
        assert!(looks_like_json(b"{\"a\": \"\\\"}\"}"));
    }

    #[test]
    fn non_json_openers() {
        assert!(!looks_like_json(b"plain"));
        assert!(!looks_like_json(b"   "));
        assert!(!looks_like_json(b""));
    }
}
