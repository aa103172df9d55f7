use super::har::{HarContent, HarEntry, HarHeader, HarTimings};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::sync::OnceLock;
use ucanscope_common::Decoded;

/// A captured body as the browser reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Body {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl Body {
    pub fn from_content(content: &HarContent) -> Option<Self> {
        content.text.as_ref().map(|text| Self {
            text: text.clone(),
            encoding: content.encoding.clone(),
        })
    }

    pub fn is_base64(&self) -> bool {
        self.encoding.as_deref() == Some("base64")
    }

    /// Raw bytes: base64-decoded, or one byte per character of a binary string
    pub fn bytes(&self) -> Vec<u8> {
        if self.is_base64() {
            match STANDARD.decode(self.text.trim()) {
                Ok(bytes) => return bytes,
                Err(e) => tracing::debug!("Body is not valid base64, reading as text: {}", e),
            }
        }
        self.text.chars().map(|c| c as u32 as u8).collect()
    }
}

/// Phase timings with unreported phases removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timings {
    pub blocked: Option<f64>,
    pub dns: Option<f64>,
    pub connect: Option<f64>,
    pub send: Option<f64>,
    pub wait: Option<f64>,
    pub receive: Option<f64>,
}

impl Timings {
    fn from_har(timings: &HarTimings) -> Self {
        let known = |value: Option<f64>| value.filter(|v| *v >= 0.0);
        Self {
            blocked: known(timings.blocked),
            dns: known(timings.dns),
            connect: known(timings.connect),
            send: known(timings.send),
            wait: known(timings.wait),
            receive: known(timings.receive),
        }
    }

    /// Sum of reported phases, `None` if no phase was reported
    pub fn total(&self) -> Option<f64> {
        let phases = [
            self.blocked,
            self.dns,
            self.connect,
            self.send,
            self.wait,
            self.receive,
        ];
        phases
            .into_iter()
            .flatten()
            .fold(None, |sum, phase| Some(sum.unwrap_or(0.0) + phase))
    }
}

/// One captured network transaction; immutable once recorded
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub id: u64,
    pub started_date_time: Option<String>,
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Option<Body>,
    /// `None` while the response is pending
    pub response_status: Option<u16>,
    pub response_headers: Vec<(String, String)>,
    /// Only present when the capture source delivered it inline
    pub response_body: Option<Body>,
    pub time: Option<f64>,
    pub timings: Option<Timings>,
    #[serde(skip)]
    request_message: OnceLock<Decoded>,
}

fn headers(headers: &[HarHeader]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect()
}

impl CapturedRequest {
    pub fn from_har(id: u64, entry: &HarEntry) -> Self {
        Self {
            id,
            started_date_time: entry.started_date_time.clone(),
            method: entry.request.method.clone(),
            url: entry.request.url.clone(),
            request_headers: headers(&entry.request.headers),
            request_body: entry.request.post_data.as_ref().and_then(Body::from_content),
            response_status: u16::try_from(entry.response.status)
                .ok()
                .filter(|status| *status != 0),
            response_headers: headers(&entry.response.headers),
            response_body: entry.response.content.as_ref().and_then(Body::from_content),
            time: entry.time.filter(|t| *t >= 0.0),
            timings: entry.timings.as_ref().map(Timings::from_har),
            request_message: OnceLock::new(),
        }
    }

    pub fn request_bytes(&self) -> Option<Vec<u8>> {
        self.request_body.as_ref().map(Body::bytes)
    }

    /// Decoded request body, computed once on first access
    pub fn request_message(&self) -> &Decoded {
        self.request_message
            .get_or_init(|| Decoded::from_body(self.request_bytes().as_deref()))
    }
}
