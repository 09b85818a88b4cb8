//! HAR 1.2 export.

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::Result;

/// An HTTP Archive document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarHeader>,
    pub query_string: Vec<HarQueryPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarCookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarQueryPair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarCache {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarTimings {
    pub blocked: f64,
    pub dns: f64,
    pub connect: f64,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
    pub ssl: f64,
}

/// Buffers records as HAR entries and writes a complete archive on demand.
#[derive(Debug, Default)]
pub struct HarWriter {
    entries: Vec<HarEntry>,
}

impl HarWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a record to a HAR entry and buffers it.
    pub fn add_record(&mut self, rec: &Record) {
        self.entries.push(record_to_entry(rec));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the complete HAR document.
    pub fn write_to(&self, writer: &mut dyn Write) -> Result<()> {
        let har = Har {
            log: HarLog {
                version: "1.2".to_string(),
                creator: HarCreator {
                    name: "OmniProxy".to_string(),
                    version: "0.1.0".to_string(),
                },
                entries: self.entries.clone(),
            },
        };
        let data = serde_json::to_vec_pretty(&har)?;
        writer.write_all(&data)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

fn record_to_entry(rec: &Record) -> HarEntry {
    let mut entry = HarEntry {
        started_date_time: rec
            .start_time
            .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        time: rec.duration_ms,
        request: HarRequest {
            method: rec.request.method.clone(),
            url: rec.request.url.clone(),
            http_version: "HTTP/1.1".to_string(),
            cookies: Vec::new(),
            headers: headers_to_har(&rec.request.headers),
            query_string: rec
                .request
                .query
                .iter()
                .map(|(name, value)| HarQueryPair {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            post_data: None,
            headers_size: -1,
            body_size: 0,
        },
        response: HarResponse {
            status: rec.response.status,
            status_text: rec.response.status_text.clone(),
            http_version: "HTTP/1.1".to_string(),
            cookies: Vec::new(),
            headers: headers_to_har(&rec.response.headers),
            content: HarContent {
                size: rec.response.size,
                mime_type: rec.response.content_type.clone(),
                text: None,
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: rec.response.size,
        },
        cache: HarCache {},
        timings: HarTimings {
            blocked: -1.0,
            dns: -1.0,
            connect: -1.0,
            send: 0.0,
            wait: rec.duration_ms,
            receive: 0.0,
            ssl: -1.0,
        },
    };

    if let Some(body) = &rec.request.body {
        let text = body.as_text();
        entry.request.body_size = text.len() as i64;
        entry.request.post_data = Some(HarPostData {
            mime_type: rec.request.content_type.clone(),
            text,
        });
    }

    if let Some(body) = &rec.response.body {
        entry.response.content.text = Some(body.as_text());
    }

    entry
}

fn headers_to_har(headers: &BTreeMap<String, String>) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|(name, value)| HarHeader {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}
