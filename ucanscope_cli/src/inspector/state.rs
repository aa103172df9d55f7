//! Inspector runtime: capture session, grouping store and live events

use crate::capture::classify::{self, RequestStatus};
use crate::capture::{
    CaptureSession, CaptureSource, CaptureState, CapturedRequest, HarEntry, Selection,
};
use crate::export::BodyPart;
use crate::filter::{self, FilterCriteria};
use crate::grouping::{Collection, GroupStats, GroupingStore, RequestGroup, Tag};
use crate::storage::{self, keys, KeyValueStore, StorageError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Row of the request list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub id: u64,
    pub method: String,
    pub url: String,
    pub status: RequestStatus,
    pub response_status: Option<u16>,
    pub timing: Option<f64>,
    pub capabilities: String,
    pub tags: Vec<Tag>,
}

/// Events broadcast to WebSocket subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum InspectorEvent {
    #[serde(rename = "request")]
    NewRequest(RequestSummary),
    #[serde(rename = "reset")]
    Reset { state: CaptureState, count: usize },
    #[serde(rename = "selection")]
    Selection { id: Option<u64> },
    #[serde(rename = "grouping")]
    Grouping,
}

pub struct Inspector {
    session: RwLock<CaptureSession>,
    grouping: RwLock<GroupingStore>,
    storage: Arc<dyn KeyValueStore>,
    source: Arc<dyn CaptureSource>,
    broadcast_tx: broadcast::Sender<InspectorEvent>,
}

impl Inspector {
    pub fn new(storage: Arc<dyn KeyValueStore>, source: Arc<dyn CaptureSource>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(100);
        Self {
            session: RwLock::new(CaptureSession::new()),
            grouping: RwLock::new(GroupingStore::load(storage.clone())),
            storage,
            source,
            broadcast_tx,
        }
    }

    /// Subscribe to inspector events
    pub fn subscribe(&self) -> broadcast::Receiver<InspectorEvent> {
        self.broadcast_tx.subscribe()
    }

    fn broadcast(&self, event: InspectorEvent) {
        // No subscribers is fine
        let _ = self.broadcast_tx.send(event);
    }

    fn summarize(&self, request: &CapturedRequest, grouping: &GroupingStore) -> RequestSummary {
        RequestSummary {
            id: request.id,
            method: request.method.clone(),
            url: request.url.clone(),
            status: classify::status(request),
            response_status: request.response_status,
            timing: classify::timing(request),
            capabilities: request
                .request_message()
                .message()
                .map(|message| message.capability_summary())
                .unwrap_or_default(),
            tags: grouping.request_tags(&request.url).into_iter().cloned().collect(),
        }
    }

    // Capture

    pub async fn capture_state(&self) -> CaptureState {
        self.session.read().await.state()
    }

    /// Replace the capture set with a fresh snapshot from the source.
    /// Returns the number of requests, or `None` if a newer reset won.
    pub async fn attach(&self) -> Result<Option<usize>> {
        let token = self.session.write().await.begin_reset();
        self.broadcast(InspectorEvent::Reset {
            state: CaptureState::ResetPending,
            count: 0,
        });

        let fetched = self.source.get_har().await;
        let entries: &[HarEntry] = match &fetched {
            Ok(entries) => entries.as_slice(),
            Err(e) => {
                tracing::warn!("Failed to fetch HAR snapshot: {:#}", e);
                &[]
            }
        };

        let mut session = self.session.write().await;
        if !session.complete_reset(token, entries) {
            tracing::debug!("Discarding stale HAR snapshot");
            return Ok(None);
        }
        let count = session.len();
        let state = session.state();
        drop(session);

        self.broadcast(InspectorEvent::Reset { state, count });
        fetched.map(|_| Some(count))
    }

    /// Record one finished request
    pub async fn record(&self, entry: &HarEntry) -> RequestSummary {
        let request = self.session.write().await.push(entry);
        let summary = self.summarize(&request, &*self.grouping.read().await);
        tracing::debug!("Captured {} {}", request.method, request.url);
        self.broadcast(InspectorEvent::NewRequest(summary.clone()));
        summary
    }

    /// Page navigation; clears unless persistence across reloads is on
    pub async fn navigated(&self) -> bool {
        let persist = self.persist_on_reload();
        let cleared = self.session.write().await.navigated(persist);
        if cleared {
            self.broadcast(InspectorEvent::Reset {
                state: CaptureState::Empty,
                count: 0,
            });
        }
        cleared
    }

    pub async fn clear(&self) {
        self.session.write().await.clear();
        self.broadcast(InspectorEvent::Reset {
            state: CaptureState::Empty,
            count: 0,
        });
    }

    // Settings

    pub fn persist_on_reload(&self) -> bool {
        storage::load_or_default(self.storage.as_ref(), keys::PERSIST_ON_RELOAD)
    }

    pub fn set_persist_on_reload(&self, persist: bool) -> Result<(), StorageError> {
        storage::save(self.storage.as_ref(), keys::PERSIST_ON_RELOAD, &persist)
    }

    pub fn filter_criteria(&self) -> FilterCriteria {
        storage::load_or_default(self.storage.as_ref(), keys::FILTER_STATE)
    }

    pub fn set_filter_criteria(&self, criteria: &FilterCriteria) -> Result<(), StorageError> {
        storage::save(self.storage.as_ref(), keys::FILTER_STATE, criteria)
    }

    // Requests

    /// Requests matching the persisted filter; only candidates unless `all`
    pub async fn list_requests(&self, all: bool) -> Vec<RequestSummary> {
        let criteria = self.filter_criteria();
        let session = self.session.read().await;
        let grouping = self.grouping.read().await;

        filter::apply(session.requests(), &criteria)
            .iter()
            .filter(|request| all || classify::is_candidate(request))
            .map(|request| self.summarize(request, &grouping))
            .collect()
    }

    pub async fn get_request(&self, id: u64) -> Option<Arc<CapturedRequest>> {
        self.session.read().await.get(id).cloned()
    }

    /// Raw body bytes of one side of a request
    pub async fn body_bytes(&self, id: u64, part: BodyPart) -> Result<Option<Vec<u8>>> {
        let Some(request) = self.get_request(id).await else {
            return Ok(None);
        };
        match part {
            BodyPart::Request => Ok(request.request_bytes()),
            BodyPart::Response => {
                let body = self.source.get_response_body(request).await?;
                Ok(body.map(|body| body.bytes()))
            }
        }
    }

    // Selection

    /// Select a request and load its response body. A body that arrives
    /// after the selection moved on is dropped.
    pub async fn select(&self, id: u64) -> Option<Selection> {
        let (token, request) = self.session.write().await.select(id)?;
        self.broadcast(InspectorEvent::Selection { id: Some(id) });

        let body = match self.source.get_response_body(request).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to fetch response body for request {}: {:#}", id, e);
                None
            }
        };

        let mut session = self.session.write().await;
        if !session.complete_response(token, body) {
            tracing::debug!("Discarding stale response body for request {}", id);
        }
        session.selection().cloned()
    }

    pub async fn selection(&self) -> Option<Selection> {
        self.session.read().await.selection().cloned()
    }

    pub async fn clear_selection(&self) {
        self.session.write().await.clear_selection();
        self.broadcast(InspectorEvent::Selection { id: None });
    }

    // Grouping

    pub async fn read_grouping<R>(&self, f: impl FnOnce(&GroupingStore) -> R) -> R {
        f(&*self.grouping.read().await)
    }

    /// Run a grouping mutation; subscribers are told when it applied
    pub async fn mutate_grouping<R: Applied>(&self, f: impl FnOnce(&mut GroupingStore) -> R) -> R {
        let result = f(&mut *self.grouping.write().await);
        if result.applied() {
            self.broadcast(InspectorEvent::Grouping);
        }
        result
    }

    pub async fn group_stats(&self, group_id: &str) -> GroupStats {
        let session = self.session.read().await;
        self.grouping
            .read()
            .await
            .group_stats(group_id, session.requests())
    }
}

/// Whether a grouping mutation changed anything
pub trait Applied {
    fn applied(&self) -> bool;
}

impl Applied for bool {
    fn applied(&self) -> bool {
        *self
    }
}

impl<T> Applied for Option<T> {
    fn applied(&self) -> bool {
        self.is_some()
    }
}

impl Applied for Tag {
    fn applied(&self) -> bool {
        true
    }
}

impl Applied for RequestGroup {
    fn applied(&self) -> bool {
        true
    }
}

impl Applied for Collection {
    fn applied(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::har::test_entries::{car_entry, entry};
    use crate::capture::{Body, MemorySource, ResponseView};
    use crate::filter::StatusFilter;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use ucanscope_common::fixtures::message_with_capabilities;

    fn inspector(entries: Vec<HarEntry>) -> Inspector {
        Inspector::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySource::new(entries)),
        )
    }

    #[tokio::test]
    async fn test_attach_lists_candidates_only() {
        let inspector = inspector(vec![
            car_entry("https://up/", 200, &message_with_capabilities(&["store/add"])),
            entry("https://plain/", 200),
        ]);
        assert_eq!(inspector.attach().await.unwrap(), Some(2));

        let listed = inspector.list_requests(false).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].capabilities, "store/add");
        assert_eq!(inspector.list_requests(true).await.len(), 2);
    }

    #[tokio::test]
    async fn test_list_uses_persisted_filter() {
        let inspector = inspector(vec![
            car_entry("https://a/", 200, b""),
            car_entry("https://b/", 500, b""),
        ]);
        inspector.attach().await.unwrap();
        inspector
            .set_filter_criteria(&FilterCriteria {
                status: StatusFilter::Error,
                ..Default::default()
            })
            .unwrap();

        let listed = inspector.list_requests(false).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].url, "https://b/");
    }

    #[tokio::test]
    async fn test_navigation_respects_persist_setting() {
        let inspector = inspector(Vec::new());
        let request = inspector.record(&entry("https://a/", 200)).await;
        inspector.select(request.id).await.unwrap();

        inspector.set_persist_on_reload(true).unwrap();
        assert!(!inspector.navigated().await);
        assert!(inspector.selection().await.is_some());

        inspector.set_persist_on_reload(false).unwrap();
        assert!(inspector.navigated().await);
        assert!(inspector.selection().await.is_none());
        assert!(inspector.list_requests(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let inspector = inspector(Vec::new());
        let mut events = inspector.subscribe();

        inspector.record(&entry("https://a/", 200)).await;
        assert!(matches!(events.recv().await.unwrap(), InspectorEvent::NewRequest(_)));

        inspector.mutate_grouping(|g| g.add_tag("t", "c")).await;
        assert!(matches!(events.recv().await.unwrap(), InspectorEvent::Grouping));

        // A mutation that changes nothing stays quiet
        inspector.mutate_grouping(|g| g.remove_tag("missing")).await;
        inspector.clear().await;
        assert!(matches!(events.recv().await.unwrap(), InspectorEvent::Reset { .. }));
    }

    /// Holds the response body until released
    struct GatedSource {
        gate: Notify,
    }

    #[async_trait]
    impl CaptureSource for GatedSource {
        async fn get_har(&self) -> Result<Vec<HarEntry>> {
            Ok(Vec::new())
        }

        async fn get_response_body(&self, request: Arc<CapturedRequest>) -> Result<Option<Body>> {
            if request.url == "https://slow/" {
                self.gate.notified().await;
            }
            Ok(Some(Body {
                text: request.url.clone(),
                encoding: None,
            }))
        }
    }

    #[tokio::test]
    async fn test_slow_response_body_does_not_overwrite_newer_selection() {
        let source = Arc::new(GatedSource { gate: Notify::new() });
        let inspector = Arc::new(Inspector::new(Arc::new(MemoryStore::new()), source.clone()));
        let slow = inspector.record(&entry("https://slow/", 200)).await;
        let fast = inspector.record(&entry("https://fast/", 200)).await;

        let pending = tokio::spawn({
            let inspector = inspector.clone();
            async move { inspector.select(slow.id).await }
        });
        // Let the slow selection reach the gate
        while inspector.selection().await.is_none() {
            tokio::task::yield_now().await;
        }

        let selected = inspector.select(fast.id).await.unwrap();
        assert_eq!(selected.request.id, fast.id);

        source.gate.notify_one();
        let after_slow = pending.await.unwrap().unwrap();
        assert_eq!(after_slow.request.id, fast.id);
        match after_slow.response {
            ResponseView::Ready { body, .. } => assert_eq!(body.unwrap().text, "https://fast/"),
            ResponseView::Loading => panic!("response should be ready"),
        }
    }

    #[tokio::test]
    async fn test_group_stats_use_captured_requests() {
        let inspector = inspector(vec![car_entry(
            "https://up/",
            200,
            &message_with_capabilities(&["blob/add"]),
        )]);
        inspector.attach().await.unwrap();

        let group = inspector
            .mutate_grouping(|g| {
                g.add_group(crate::grouping::NewGroup {
                    name: "g".into(),
                    ..Default::default()
                })
            })
            .await;
        inspector
            .mutate_grouping(|g| g.add_request_to_group(&group.id, "https://up/"))
            .await;

        let stats = inspector.group_stats(&group.id).await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.unique_capabilities, vec!["blob/add"]);
        assert_eq!(stats.success_rate, 100.0);
    }
}
