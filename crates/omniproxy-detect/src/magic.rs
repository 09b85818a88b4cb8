//! File signature (magic byte) tables.

use crate::{ContentInfo, DetectionMethod};

/// A file signature at a fixed offset.
struct Signature {
    bytes: &'static [u8],
    /// Offset from the start of the data (the tar signature sits at 257).
    offset: usize,
    mime_type: &'static str,
    extension: &'static str,
}

/// Binary signatures, ordered by specificity.
const BINARY_SIGNATURES: &[Signature] = &[
    // Images
    sig(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png", "png"),
    sig(&[0xFF, 0xD8, 0xFF], "image/jpeg", "jpg"),
    sig(b"GIF87a", "image/gif", "gif"),
    sig(b"GIF89a", "image/gif", "gif"),
    sig(b"RIFF", "image/webp", "webp"),
    sig(b"BM", "image/bmp", "bmp"),
    sig(&[0x49, 0x49, 0x2A, 0x00], "image/tiff", "tiff"),
    sig(&[0x4D, 0x4D, 0x00, 0x2A], "image/tiff", "tiff"),
    sig(&[0x00, 0x00, 0x01, 0x00], "image/x-icon", "ico"),
    sig(&[0x00, 0x00, 0x02, 0x00], "image/x-icon", "cur"),
    // Audio
    sig(b"ID3", "audio/mpeg", "mp3"),
    sig(&[0xFF, 0xFB], "audio/mpeg", "mp3"),
    sig(&[0xFF, 0xFA], "audio/mpeg", "mp3"),
    sig(&[0xFF, 0xF3], "audio/mpeg", "mp3"),
    sig(&[0xFF, 0xF2], "audio/mpeg", "mp3"),
    sig(b"OggS", "audio/ogg", "ogg"),
    sig(b"fLaC", "audio/flac", "flac"),
    sig(&[0x00, 0x00, 0x00, 0x20, 0x66, 0x74, 0x79, 0x70], "audio/mp4", "m4a"),
    // Video
    sig(&[0x00, 0x00, 0x00, 0x1C, 0x66, 0x74, 0x79, 0x70], "video/mp4", "mp4"),
    sig(&[0x00, 0x00, 0x00, 0x18, 0x66, 0x74, 0x79, 0x70], "video/mp4", "mp4"),
    sig(&[0x00, 0x00, 0x00, 0x14, 0x66, 0x74, 0x79, 0x70], "video/mp4", "mp4"),
    sig(&[0x1A, 0x45, 0xDF, 0xA3], "video/webm", "webm"),
    sig(&[0x46, 0x4C, 0x56, 0x01], "video/x-flv", "flv"),
    // Archives
    sig(&[0x50, 0x4B, 0x03, 0x04], "application/zip", "zip"),
    sig(&[0x50, 0x4B, 0x05, 0x06], "application/zip", "zip"),
    sig(&[0x50, 0x4B, 0x07, 0x08], "application/zip", "zip"),
    sig(&[0x1F, 0x8B, 0x08], "application/gzip", "gz"),
    sig(b"BZh", "application/x-bzip2", "bz2"),
    sig(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], "application/x-xz", "xz"),
    sig(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], "application/x-7z-compressed", "7z"),
    sig(&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00], "application/x-rar-compressed", "rar"),
    sig(
        &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00],
        "application/x-rar-compressed",
        "rar",
    ),
    Signature {
        bytes: b"ustar",
        offset: 257,
        mime_type: "application/x-tar",
        extension: "tar",
    },
    // Documents
    sig(b"%PDF-", "application/pdf", "pdf"),
    // OLE2 container (DOC, XLS, PPT)
    sig(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1], "application/msword", "doc"),
    // Executables
    sig(b"MZ", "application/x-dosexec", "exe"),
    sig(&[0x7F, 0x45, 0x4C, 0x46], "application/x-elf", ""),
    sig(&[0xCF, 0xFA, 0xED, 0xFE], "application/x-mach-binary", ""),
    sig(&[0xCE, 0xFA, 0xED, 0xFE], "application/x-mach-binary", ""),
    sig(&[0xCA, 0xFE, 0xBA, 0xBE], "application/x-mach-binary", ""),
    sig(&[0xFE, 0xED, 0xFA, 0xCF], "application/x-mach-binary", ""),
    sig(&[0xFE, 0xED, 0xFA, 0xCE], "application/x-mach-binary", ""),
    // Fonts
    sig(b"wOFF", "font/woff", "woff"),
    sig(b"wOF2", "font/woff2", "woff2"),
    sig(&[0x00, 0x01, 0x00, 0x00], "font/ttf", "ttf"),
    sig(b"OTTO", "font/otf", "otf"),
    // Other binary
    sig(&[0x00, 0x61, 0x73, 0x6D], "application/wasm", "wasm"),
    sig(b"FWS", "application/x-shockwave-flash", "swf"),
    sig(b"CWS", "application/x-shockwave-flash", "swf"),
    sig(b"SQLite format 3\x00", "application/x-sqlite3", "sqlite"),
];

/// Signatures for text-based formats. JSON is deliberately absent: leading
/// whitespace makes it a heuristic case.
const TEXT_SIGNATURES: &[Signature] = &[
    sig(b"<?xml", "application/xml", "xml"),
    sig(b"<svg", "image/svg+xml", "svg"),
    sig(b"<!DOCTYPE svg", "image/svg+xml", "svg"),
    sig(b"<!DOCTYPE html", "text/html", "html"),
    sig(b"<!doctype html", "text/html", "html"),
    sig(b"<html", "text/html", "html"),
    sig(b"<HTML", "text/html", "html"),
    sig(b"<!DOCTYPE HTML", "text/html", "html"),
    sig(b"#!/bin/bash", "application/x-sh", "sh"),
    sig(b"#!/bin/sh", "application/x-sh", "sh"),
    sig(b"#!/usr/bin/env", "application/x-sh", "sh"),
    sig(b"%!PS", "application/postscript", "ps"),
    sig(b"{\\rtf", "application/rtf", "rtf"),
];

const fn sig(bytes: &'static [u8], mime_type: &'static str, extension: &'static str) -> Signature {
    Signature {
        bytes,
        offset: 0,
        mime_type,
        extension,
    }
}

/// Checks the data against known file signatures.
pub fn detect_by_magic_bytes(data: &[u8]) -> Option<ContentInfo> {
    if data.is_empty() {
        return None;
    }

    for s in BINARY_SIGNATURES {
        if matches_signature(data, s) {
            return Some(
                ContentInfo::binary(DetectionMethod::Magic, 0.95).with_mime(s.mime_type, s.extension),
            );
        }
    }

    for s in TEXT_SIGNATURES {
        if matches_signature(data, s) {
            return Some(
                ContentInfo::text(DetectionMethod::Magic, 0.90).with_mime(s.mime_type, s.extension),
            );
        }
    }

    None
}

fn matches_signature(data: &[u8], s: &Signature) -> bool {
    match data.get(s.offset..s.offset + s.bytes.len()) {
        Some(chunk) => chunk == s.bytes,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_signature() {
        let data = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0xAA, 0xBB];
        let info = detect_by_magic_bytes(&data).unwrap();
        assert!(info.is_binary);
        assert_eq!(info.mime_type, "image/png");
        assert_eq!(info.extension, "png");
        assert!((info.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn gzip_signature() {
        let info = detect_by_magic_bytes(&[0x1F, 0x8B, 0x08, 0x00]).unwrap();
        assert_eq!(info.mime_type, "application/gzip");
    }

    #[test]
    fn tar_signature_at_offset_257() {
        let mut data = vec![0x20u8; 300];
        data[257..262].copy_from_slice(b"ustar");
        let info = detect_by_magic_bytes(&data).unwrap();
        assert_eq!(info.mime_type, "application/x-tar");
    }

    #[test]
    fn tar_needs_enough_bytes() {
        // Shorter than offset+signature: no match, no panic.
        assert!(detect_by_magic_bytes(b"ustar").map(|i| i.mime_type) != Some("application/x-tar".into()));
    }

    #[test]
    fn xml_is_text() {
        let info = detect_by_magic_bytes(b"<?xml version=\"1.0\"?>").unwrap();
        assert!(info.is_text);
        assert_eq!(info.mime_type, "application/xml");
        assert!((info.confidence - 0.90).abs() < f64::EPSILON);
    }

    #[test]
    fn pdf_signature() {
        let info = detect_by_magic_bytes(b"%PDF-1.7 ...").unwrap();
        assert!(info.is_binary);
        assert_eq!(info.extension, "pdf");
    }

    #[test]
    fn no_match_for_plain_text() {
        assert!(detect_by_magic_bytes(b"hello world").is_none());
    }

    #[test]
    fn empty_is_none() {
        assert!(detect_by_magic_bytes(b"").is_none());
    }
}
