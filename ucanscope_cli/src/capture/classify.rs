//! Request classification: candidate detection, status and timing

use super::CapturedRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use ucanscope_common::constants::CAR_CONTENT_TYPE;

/// Whether the request carries an agent message container
pub fn is_candidate(request: &CapturedRequest) -> bool {
    request
        .request_headers
        .iter()
        .any(|(name, value)| {
            name.eq_ignore_ascii_case("content-type") && value == CAR_CONTENT_TYPE
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Success,
    Error,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        })
    }
}

/// Only 2xx counts as success; informational and redirect codes are errors
pub fn status(request: &CapturedRequest) -> RequestStatus {
    match request.response_status {
        None => RequestStatus::Pending,
        Some(code) if (200..300).contains(&code) => RequestStatus::Success,
        Some(_) => RequestStatus::Error,
    }
}

/// Elapsed milliseconds: the reported total, else the sum of phases
pub fn timing(request: &CapturedRequest) -> Option<f64> {
    request
        .time
        .or_else(|| request.timings.as_ref().and_then(|t| t.total()))
}

pub fn format_timing(timing: Option<f64>) -> String {
    match timing {
        None => "-".to_string(),
        Some(ms) if ms < 1000.0 => format!("{}ms", ms.round()),
        Some(ms) => format!("{:.2}s", ms / 1000.0),
    }
}
