//! Request list filtering
//!
//! All criteria are AND-ed. Text criteria are case-insensitive substring
//! matches; the capability criterion matches against the comma-separated
//! capability summary of the decoded request message.

use crate::capture::classify::{self, RequestStatus};
use crate::capture::CapturedRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Success,
    Error,
}

impl StatusFilter {
    fn accepts(self, status: RequestStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Pending => status == RequestStatus::Pending,
            StatusFilter::Success => status == RequestStatus::Success,
            StatusFilter::Error => status == RequestStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    pub url_search: String,
    pub capability_search: String,
    pub status: StatusFilter,
    /// Inclusive lower bound in milliseconds
    pub min_timing: Option<f64>,
    /// Inclusive upper bound in milliseconds
    pub max_timing: Option<f64>,
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, request: &CapturedRequest) -> bool {
        if !self.url_search.is_empty()
            && !contains_ignore_case(&request.url, &self.url_search)
        {
            return false;
        }

        if !self.capability_search.is_empty() {
            let Some(message) = request.request_message().message() else {
                return false;
            };
            if !contains_ignore_case(&message.capability_summary(), &self.capability_search) {
                return false;
            }
        }

        if !self.status.accepts(classify::status(request)) {
            return false;
        }

        if self.min_timing.is_some() || self.max_timing.is_some() {
            let Some(timing) = classify::timing(request) else {
                return false;
            };
            if self.min_timing.is_some_and(|min| timing < min)
                || self.max_timing.is_some_and(|max| timing > max)
            {
                return false;
            }
        }

        true
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Matching requests, in input order
pub fn apply(requests: &[Arc<CapturedRequest>], criteria: &FilterCriteria) -> Vec<Arc<CapturedRequest>> {
    requests
        .iter()
        .filter(|request| criteria.matches(request))
        .cloned()
        .collect()
}
