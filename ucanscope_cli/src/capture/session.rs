//! Time-ordered capture set with reset, navigation and selection handling
//!
//! Two asynchronous operations can be overtaken: a HAR fetch started by
//! [`CaptureSession::begin_reset`] and a response-body fetch started by
//! [`CaptureSession::select`]. Both hand out a generation token; results
//! carrying a token that is no longer current are discarded.

use super::har::HarEntry;
use super::request::{Body, CapturedRequest};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use ucanscope_common::Decoded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Empty,
    Capturing,
    ResetPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionToken(u64);

/// Response side of the selection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResponseView {
    Loading,
    Ready { body: Option<Body>, message: Decoded },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub request: Arc<CapturedRequest>,
    pub request_message: Decoded,
    pub response: ResponseView,
    #[serde(skip)]
    generation: u64,
}

#[derive(Debug, Default)]
pub struct CaptureSession {
    requests: Vec<Arc<CapturedRequest>>,
    next_id: u64,
    reset_generation: u64,
    reset_pending: bool,
    selection_generation: u64,
    selection: Option<Selection>,
}

fn dedup_key(request: &CapturedRequest) -> Option<(&str, &str)> {
    request
        .started_date_time
        .as_deref()
        .map(|started| (request.url.as_str(), started))
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        if self.reset_pending {
            CaptureState::ResetPending
        } else if self.is_empty() {
            CaptureState::Empty
        } else {
            CaptureState::Capturing
        }
    }

    pub fn requests(&self) -> &[Arc<CapturedRequest>] {
        &self.requests
    }

    pub fn get(&self, id: u64) -> Option<&Arc<CapturedRequest>> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn record(&mut self, entry: &HarEntry) -> Arc<CapturedRequest> {
        self.next_id += 1;
        Arc::new(CapturedRequest::from_har(self.next_id, entry))
    }

    /// Append a finished request
    pub fn push(&mut self, entry: &HarEntry) -> Arc<CapturedRequest> {
        let request = self.record(entry);
        self.requests.push(request.clone());
        request
    }

    /// Clear the set and start a replacement; any earlier reset becomes stale
    pub fn begin_reset(&mut self) -> ResetToken {
        self.reset_generation += 1;
        self.reset_pending = true;
        self.requests.clear();
        self.clear_selection();
        ResetToken(self.reset_generation)
    }

    /// Install a fetched HAR snapshot. Requests pushed since the reset began
    /// are kept after the snapshot unless the snapshot already holds them.
    /// Returns `false` when the token is stale.
    pub fn complete_reset(&mut self, token: ResetToken, entries: &[HarEntry]) -> bool {
        if !self.reset_pending || token.0 != self.reset_generation {
            return false;
        }
        self.reset_pending = false;

        let appended = std::mem::take(&mut self.requests);
        let mut requests: Vec<_> = entries.iter().map(|entry| self.record(entry)).collect();

        let seen: HashSet<(String, String)> = requests
            .iter()
            .filter_map(|r| dedup_key(r))
            .map(|(url, started)| (url.to_string(), started.to_string()))
            .collect();
        requests.extend(appended.into_iter().filter(|r| {
            dedup_key(r).map_or(true, |(url, started)| {
                !seen.contains(&(url.to_string(), started.to_string()))
            })
        }));
        self.requests = requests;

        let selection_dropped = self
            .selection
            .as_ref()
            .is_some_and(|selection| self.get(selection.request.id).is_none());
        if selection_dropped {
            self.clear_selection();
        }
        true
    }

    /// Drop everything, including the selection and any in-flight reset
    pub fn clear(&mut self) {
        self.requests.clear();
        self.reset_generation += 1;
        self.reset_pending = false;
        self.clear_selection();
    }

    /// Page navigation. Returns whether the set was cleared.
    pub fn navigated(&mut self, persist_on_reload: bool) -> bool {
        if persist_on_reload {
            return false;
        }
        self.clear();
        true
    }

    /// Select a request; the response body is to be delivered through
    /// [`CaptureSession::complete_response`] with the returned token
    pub fn select(&mut self, id: u64) -> Option<(SelectionToken, Arc<CapturedRequest>)> {
        let request = self.get(id)?.clone();
        self.selection_generation += 1;
        self.selection = Some(Selection {
            request: request.clone(),
            request_message: request.request_message().clone(),
            response: ResponseView::Loading,
            generation: self.selection_generation,
        });
        Some((SelectionToken(self.selection_generation), request))
    }

    /// Returns `false` when the selection has changed since `token` was issued
    pub fn complete_response(&mut self, token: SelectionToken, body: Option<Body>) -> bool {
        let Some(selection) = self.selection.as_mut() else {
            return false;
        };
        if selection.generation != token.0 {
            return false;
        }

        let message = Decoded::from_body(body.as_ref().map(Body::bytes).as_deref());
        selection.response = ResponseView::Ready { body, message };
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection_generation += 1;
        self.selection = None;
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }
}
