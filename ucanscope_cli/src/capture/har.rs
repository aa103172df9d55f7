//! HAR 1.2 subset as produced by browser devtools
//!
//! Only the fields the inspector reads are modelled; unknown fields are
//! ignored so full HAR exports parse.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A HAR document, either wrapped (`{"log": {...}}`) or a bare log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum HarDocument {
    Wrapped { log: HarLog },
    Bare(HarLog),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

impl HarLog {
    pub fn parse(text: &str) -> Result<Self> {
        let document: HarDocument = serde_json::from_str(text).context("Failed to parse HAR")?;
        Ok(match document {
            HarDocument::Wrapped { log } | HarDocument::Bare(log) => log,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read HAR file {}", path.display()))?;
        Self::parse(&content)
    }
}

/// One finished network transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    #[serde(default)]
    pub started_date_time: Option<String>,
    /// Total elapsed milliseconds
    #[serde(default)]
    pub time: Option<f64>,
    pub request: HarRequest,
    #[serde(default)]
    pub response: HarResponse,
    #[serde(default)]
    pub timings: Option<HarTimings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    #[serde(default)]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    #[serde(default)]
    pub post_data: Option<HarContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    /// Zero while the browser has no status
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    #[serde(default)]
    pub content: Option<HarContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

/// Request post data or response content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Phase durations in milliseconds; `-1` means not reported
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarTimings {
    #[serde(default)]
    pub blocked: Option<f64>,
    #[serde(default)]
    pub dns: Option<f64>,
    #[serde(default)]
    pub connect: Option<f64>,
    #[serde(default)]
    pub send: Option<f64>,
    #[serde(default)]
    pub wait: Option<f64>,
    #[serde(default)]
    pub receive: Option<f64>,
    #[serde(default)]
    pub ssl: Option<f64>,
}

#[cfg(test)]
pub(crate) mod test_entries {
    //! Entry builders shared by tests across the crate

    use super::*;
    use ucanscope_common::constants::CAR_CONTENT_TYPE;

    pub fn entry(url: &str, status: i64) -> HarEntry {
        HarEntry {
            started_date_time: None,
            time: None,
            request: HarRequest {
                method: "POST".into(),
                url: url.into(),
                headers: Vec::new(),
                post_data: None,
            },
            response: HarResponse {
                status,
                ..Default::default()
            },
            timings: None,
        }
    }

    /// A CAR request whose body is `body`, sent base64 encoded
    pub fn car_entry(url: &str, status: i64, body: &[u8]) -> HarEntry {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let mut entry = entry(url, status);
        entry.request.headers.push(HarHeader {
            name: "Content-Type".into(),
            value: CAR_CONTENT_TYPE.into(),
        });
        entry.request.post_data = Some(HarContent {
            mime_type: Some(CAR_CONTENT_TYPE.into()),
            text: Some(STANDARD.encode(body)),
            encoding: Some("base64".into()),
        });
        entry
    }

    pub fn timed(mut entry: HarEntry, time: f64) -> HarEntry {
        entry.time = Some(time);
        entry
    }

    pub fn started(mut entry: HarEntry, at: &str) -> HarEntry {
        entry.started_date_time = Some(at.into());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_HAR: &str = r#"{
        "log": {
            "version": "1.2",
            "creator": { "name": "WebInspector", "version": "537.36" },
            "entries": [{
                "startedDateTime": "2024-05-01T10:00:00.000Z",
                "time": 84.2,
                "request": {
                    "method": "POST",
                    "url": "https://up.web3.storage/",
                    "headers": [{ "name": "content-type", "value": "application/vnd.ipld.car" }],
                    "postData": { "mimeType": "application/vnd.ipld.car", "text": "AAEC", "encoding": "base64" }
                },
                "response": {
                    "status": 200,
                    "headers": [],
                    "content": { "size": 3, "mimeType": "application/vnd.ipld.car" }
                },
                "timings": { "blocked": -1, "dns": -1, "connect": -1, "send": 0.2, "wait": 80.0, "receive": 4.0, "ssl": -1 }
            }]
        }
    }"#;

    #[test]
    fn test_parse_wrapped_log() {
        let log = HarLog::parse(CHROME_HAR).unwrap();
        assert_eq!(log.entries.len(), 1);

        let entry = &log.entries[0];
        assert_eq!(entry.request.url, "https://up.web3.storage/");
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.time, Some(84.2));
        assert_eq!(entry.timings.as_ref().unwrap().dns, Some(-1.0));
        assert!(entry.response.content.as_ref().unwrap().text.is_none());
    }

    #[test]
    fn test_parse_bare_log() {
        let log = HarLog::parse(r#"{ "entries": [{ "request": { "url": "https://x/" } }] }"#).unwrap();
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].response.status, 0);
    }

    #[test]
    fn test_parse_rejects_non_har() {
        assert!(HarLog::parse("[1, 2, 3]").is_err());
    }
}
