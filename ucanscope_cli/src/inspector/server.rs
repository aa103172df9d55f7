//! Inspector HTTP server with WebSocket support

use super::html::INSPECTOR_HTML;
use super::state::{Inspector, InspectorEvent, RequestSummary};
use crate::capture::{CaptureState, CapturedRequest, HarEntry, Selection};
use crate::export::{self, BodyPart};
use crate::filter::FilterCriteria;
use crate::grouping::{Collection, GroupStats, NewCollection, NewGroup, RequestGroup, Tag};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use ucanscope_common::constants::CAR_CONTENT_TYPE;
use ucanscope_common::Decoded;

pub const SERVICE_NAME: &str = "ucanscope-inspector";

/// App state for the inspector server
#[derive(Clone)]
struct AppState {
    inspector: Arc<Inspector>,
}

pub fn router(inspector: Arc<Inspector>) -> Router {
    let state = AppState { inspector };

    Router::new()
        // Dashboard
        .route("/", get(serve_dashboard))
        // Health check (for port detection)
        .route("/api/health", get(health_check))
        // Capture pipeline
        .route("/api/capture/state", get(get_capture_state))
        .route("/api/capture/attach", post(attach))
        .route("/api/capture/entries", post(submit_entry))
        .route("/api/capture/navigated", post(navigated))
        .route("/api/capture/clear", post(clear_requests))
        // Requests and selection
        .route("/api/requests", get(get_requests))
        .route("/api/requests/{id}", get(get_request))
        .route("/api/requests/{id}/car/{part}", get(download_car))
        .route("/api/requests/{id}/select", post(select_request))
        .route("/api/selection", get(get_selection).delete(clear_selection))
        // Settings
        .route("/api/filter", get(get_filter).put(set_filter))
        .route("/api/settings/persist", get(get_persist).put(set_persist))
        // Grouping
        .route("/api/tags", get(get_tags).post(add_tag))
        .route("/api/tags/{id}", put(update_tag).delete(remove_tag))
        .route("/api/groups", get(get_groups).post(add_group))
        .route(
            "/api/groups/{id}",
            get(get_group).put(update_group).delete(remove_group),
        )
        .route(
            "/api/groups/{id}/requests",
            post(add_request_to_group).delete(remove_request_from_group),
        )
        .route("/api/groups/{id}/stats", get(get_group_stats))
        .route("/api/collections", get(get_collections).post(add_collection))
        .route(
            "/api/collections/{id}",
            put(update_collection).delete(remove_collection),
        )
        .route(
            "/api/request-tags",
            get(get_request_tags)
                .post(add_tag_to_request)
                .delete(remove_tag_from_request),
        )
        .route("/api/request-groups", get(get_request_groups))
        // WebSocket
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the inspector server on the given port
pub async fn start_server(port: u16, inspector: Arc<Inspector>) -> Result<JoinHandle<()>> {
    let app = router(inspector);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind inspector to {}", addr))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Inspector server stopped: {}", e);
        }
    });

    Ok(handle)
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    service: String,
    version: String,
    state: CaptureState,
}

/// Health check endpoint for port detection
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        state: state.inspector.capture_state().await,
    })
}

/// Serve the HTML dashboard
async fn serve_dashboard() -> Html<&'static str> {
    Html(INSPECTOR_HTML)
}

// ============================================================================
// Capture
// ============================================================================

async fn get_capture_state(State(state): State<AppState>) -> Json<CaptureState> {
    Json(state.inspector.capture_state().await)
}

#[derive(Serialize)]
struct AttachResponse {
    applied: bool,
    count: usize,
}

/// Re-read the capture source and replace the request set
async fn attach(State(state): State<AppState>) -> Response {
    match state.inspector.attach().await {
        Ok(Some(count)) => Json(AttachResponse {
            applied: true,
            count,
        })
        .into_response(),
        Ok(None) => Json(AttachResponse {
            applied: false,
            count: 0,
        })
        .into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, format!("{:#}", e)).into_response(),
    }
}

/// Record one finished HAR entry
async fn submit_entry(
    State(state): State<AppState>,
    Json(entry): Json<HarEntry>,
) -> Json<RequestSummary> {
    Json(state.inspector.record(&entry).await)
}

#[derive(Serialize)]
struct NavigatedResponse {
    cleared: bool,
}

async fn navigated(State(state): State<AppState>) -> Json<NavigatedResponse> {
    Json(NavigatedResponse {
        cleared: state.inspector.navigated().await,
    })
}

/// Clear all captured requests
async fn clear_requests(State(state): State<AppState>) -> StatusCode {
    state.inspector.clear().await;
    StatusCode::OK
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

async fn get_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<RequestSummary>> {
    Json(state.inspector.list_requests(query.all).await)
}

#[derive(Serialize)]
struct RequestDetail {
    request: Arc<CapturedRequest>,
    message: Decoded,
    tags: Vec<Tag>,
    groups: Vec<RequestGroup>,
}

async fn get_request(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let Some(request) = state.inspector.get_request(id).await else {
        return not_found("Request");
    };
    let (tags, groups): (Vec<Tag>, Vec<RequestGroup>) = state
        .inspector
        .read_grouping(|g| {
            (
                g.request_tags(&request.url).into_iter().cloned().collect(),
                g.request_groups(&request.url).into_iter().cloned().collect(),
            )
        })
        .await;

    Json(RequestDetail {
        message: request.request_message().clone(),
        request,
        tags,
        groups,
    })
    .into_response()
}

/// Download a body as a `.car` attachment
async fn download_car(
    State(state): State<AppState>,
    Path((id, part)): Path<(u64, BodyPart)>,
) -> Response {
    let Some(request) = state.inspector.get_request(id).await else {
        return not_found("Request");
    };
    let bytes = match state.inspector.body_bytes(id, part).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return not_found("Body"),
        Err(e) => return internal_error(format!("{:#}", e)),
    };

    let name = export::car_file_name(&part.to_string(), &request.url, chrono::Utc::now());
    (
        [
            (header::CONTENT_TYPE, CAR_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn select_request(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.inspector.select(id).await {
        Some(selection) => Json(selection).into_response(),
        None => not_found("Request"),
    }
}

async fn get_selection(State(state): State<AppState>) -> Json<Option<Selection>> {
    Json(state.inspector.selection().await)
}

async fn clear_selection(State(state): State<AppState>) -> StatusCode {
    state.inspector.clear_selection().await;
    StatusCode::OK
}

// ============================================================================
// Settings
// ============================================================================

async fn get_filter(State(state): State<AppState>) -> Json<FilterCriteria> {
    Json(state.inspector.filter_criteria())
}

async fn set_filter(
    State(state): State<AppState>,
    Json(criteria): Json<FilterCriteria>,
) -> Response {
    match state.inspector.set_filter_criteria(&criteria) {
        Ok(()) => Json(criteria).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistSetting {
    persist_on_reload: bool,
}

async fn get_persist(State(state): State<AppState>) -> Json<PersistSetting> {
    Json(PersistSetting {
        persist_on_reload: state.inspector.persist_on_reload(),
    })
}

async fn set_persist(
    State(state): State<AppState>,
    Json(setting): Json<PersistSetting>,
) -> Response {
    match state.inspector.set_persist_on_reload(setting.persist_on_reload) {
        Ok(()) => Json(setting).into_response(),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Tags
// ============================================================================

#[derive(Deserialize)]
struct NewTag {
    name: String,
    color: String,
}

async fn get_tags(State(state): State<AppState>) -> Json<Vec<Tag>> {
    Json(state.inspector.read_grouping(|g| g.tags().cloned().collect()).await)
}

async fn add_tag(State(state): State<AppState>, Json(tag): Json<NewTag>) -> Json<Tag> {
    Json(
        state
            .inspector
            .mutate_grouping(|g| g.add_tag(tag.name, tag.color))
            .await,
    )
}

async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut tag): Json<Tag>,
) -> Response {
    tag.id = id;
    let updated = tag.clone();
    if state.inspector.mutate_grouping(|g| g.update_tag(tag)).await {
        Json(updated).into_response()
    } else {
        not_found("Tag")
    }
}

async fn remove_tag(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.inspector.mutate_grouping(|g| g.remove_tag(&id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// ============================================================================
// Groups
// ============================================================================

async fn get_groups(State(state): State<AppState>) -> Json<Vec<RequestGroup>> {
    Json(
        state
            .inspector
            .read_grouping(|g| g.groups().cloned().collect())
            .await,
    )
}

async fn get_group(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.inspector.read_grouping(|g| g.group(&id).cloned()).await {
        Some(group) => Json(group).into_response(),
        None => not_found("Group"),
    }
}

async fn add_group(
    State(state): State<AppState>,
    Json(group): Json<NewGroup>,
) -> Json<RequestGroup> {
    Json(state.inspector.mutate_grouping(|g| g.add_group(group)).await)
}

async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut group): Json<RequestGroup>,
) -> Response {
    group.id = id;
    match state.inspector.mutate_grouping(|g| g.update_group(group)).await {
        Some(group) => Json(group).into_response(),
        None => not_found("Group"),
    }
}

async fn remove_group(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.inspector.mutate_grouping(|g| g.remove_group(&id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct UrlParam {
    url: String,
}

#[derive(Serialize)]
struct ChangedResponse {
    changed: bool,
}

async fn add_request_to_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(param): Json<UrlParam>,
) -> Json<ChangedResponse> {
    let changed = state
        .inspector
        .mutate_grouping(|g| g.add_request_to_group(&id, &param.url))
        .await;
    Json(ChangedResponse { changed })
}

async fn remove_request_from_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(param): Query<UrlParam>,
) -> Json<ChangedResponse> {
    let changed = state
        .inspector
        .mutate_grouping(|g| g.remove_request_from_group(&id, &param.url))
        .await;
    Json(ChangedResponse { changed })
}

async fn get_group_stats(State(state): State<AppState>, Path(id): Path<String>) -> Json<GroupStats> {
    Json(state.inspector.group_stats(&id).await)
}

// ============================================================================
// Collections
// ============================================================================

async fn get_collections(State(state): State<AppState>) -> Json<Vec<Collection>> {
    Json(
        state
            .inspector
            .read_grouping(|g| g.collections().cloned().collect())
            .await,
    )
}

async fn add_collection(
    State(state): State<AppState>,
    Json(collection): Json<NewCollection>,
) -> Json<Collection> {
    Json(
        state
            .inspector
            .mutate_grouping(|g| g.add_collection(collection))
            .await,
    )
}

async fn update_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut collection): Json<Collection>,
) -> Response {
    collection.id = id;
    match state
        .inspector
        .mutate_grouping(|g| g.update_collection(collection))
        .await
    {
        Some(collection) => Json(collection).into_response(),
        None => not_found("Collection"),
    }
}

async fn remove_collection(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.inspector.mutate_grouping(|g| g.remove_collection(&id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// ============================================================================
// Request lookups
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestTagParam {
    url: String,
    tag_id: String,
}

async fn get_request_tags(
    State(state): State<AppState>,
    Query(param): Query<UrlParam>,
) -> Json<Vec<Tag>> {
    Json(
        state
            .inspector
            .read_grouping(|g| g.request_tags(&param.url).into_iter().cloned().collect())
            .await,
    )
}

async fn add_tag_to_request(
    State(state): State<AppState>,
    Json(param): Json<RequestTagParam>,
) -> Json<ChangedResponse> {
    let changed = state
        .inspector
        .mutate_grouping(|g| g.add_tag_to_request(&param.url, &param.tag_id))
        .await;
    Json(ChangedResponse { changed })
}

async fn remove_tag_from_request(
    State(state): State<AppState>,
    Query(param): Query<RequestTagParam>,
) -> Json<ChangedResponse> {
    let changed = state
        .inspector
        .mutate_grouping(|g| g.remove_tag_from_request(&param.url, &param.tag_id))
        .await;
    Json(ChangedResponse { changed })
}

async fn get_request_groups(
    State(state): State<AppState>,
    Query(param): Query<UrlParam>,
) -> Json<Vec<RequestGroup>> {
    Json(
        state
            .inspector
            .read_grouping(|g| g.request_groups(&param.url).into_iter().cloned().collect())
            .await,
    )
}

// ============================================================================
// WebSocket
// ============================================================================

/// WebSocket handler for live updates
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Full request list, sent on connect and after the subscriber lags
async fn requests_snapshot(inspector: &Inspector) -> Option<String> {
    let requests = inspector.list_requests(false).await;
    let msg = serde_json::json!({
        "type": "requests",
        "data": requests
    });
    serde_json::to_string(&msg).ok()
}

/// Next message for a subscriber, or `None` once the inspector is gone
async fn next_update(
    event_rx: &mut broadcast::Receiver<InspectorEvent>,
    inspector: &Inspector,
) -> Option<String> {
    loop {
        match event_rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => return Some(json),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("WebSocket subscriber lagged by {} events, resyncing", skipped);
                // The snapshot covers everything still buffered
                *event_rx = event_rx.resubscribe();
                if let Some(json) = requests_snapshot(inspector).await {
                    return Some(json);
                }
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Handle a WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing falls in between
    let mut event_rx = state.inspector.subscribe();

    if let Some(json) = requests_snapshot(&state.inspector).await {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    let inspector = state.inspector.clone();
    let send_task = tokio::spawn(async move {
        while let Some(json) = next_update(&mut event_rx, &inspector).await {
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
            break;
        }
    }

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::har::test_entries::car_entry;
    use crate::capture::MemorySource;
    use crate::inspector::InspectorClient;
    use crate::storage::MemoryStore;
    use ucanscope_common::fixtures::message_with_capabilities;

    async fn serve(entries: Vec<HarEntry>) -> (u16, JoinHandle<()>) {
        let inspector = Arc::new(Inspector::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySource::new(entries)),
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = router(inspector);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_resynced() {
        let inspector = Inspector::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySource::default()),
        );
        let mut event_rx = inspector.subscribe();
        for i in 0..150 {
            inspector
                .record(&car_entry(&format!("https://up/{}", i), 200, b""))
                .await;
        }

        let json = next_update(&mut event_rx, &inspector).await.unwrap();
        let snapshot: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot["type"], "requests");
        assert_eq!(snapshot["data"].as_array().unwrap().len(), 150);

        // Live events keep flowing afterwards
        inspector.record(&car_entry("https://up/next", 200, b"")).await;
        let json = next_update(&mut event_rx, &inspector).await.unwrap();
        let event: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(event["type"], "request");
        assert_eq!(event["data"]["url"], "https://up/next");
    }

    #[tokio::test]
    async fn test_connect_requires_running_inspector() {
        let free = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = free.local_addr().unwrap().port();
        drop(free);
        assert!(InspectorClient::connect(port).await.is_err());
    }

    #[tokio::test]
    async fn test_push_and_list_over_http() {
        let (port, handle) = serve(Vec::new()).await;
        let client = InspectorClient::connect(port).await.unwrap();

        let body = message_with_capabilities(&["store/add"]);
        client
            .submit_entry(&car_entry("https://up/", 200, &body))
            .await
            .unwrap();

        let base = format!("http://127.0.0.1:{}", port);
        let http = reqwest::Client::new();
        let listed: serde_json::Value = http
            .get(format!("{}/api/requests", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed[0]["capabilities"], "store/add");
        assert_eq!(listed[0]["status"], "success");

        let id = listed[0]["id"].as_u64().unwrap();
        let download = http
            .get(format!("{}/api/requests/{}/car/request", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(
            download.headers()[header::CONTENT_TYPE.as_str()],
            CAR_CONTENT_TYPE
        );
        assert_eq!(download.bytes().await.unwrap().to_vec(), body);

        let missing = http
            .get(format!("{}/api/requests/999", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        handle.abort();
    }

    #[tokio::test]
    async fn test_grouping_endpoints() {
        let (port, handle) = serve(Vec::new()).await;
        let base = format!("http://127.0.0.1:{}", port);
        let http = reqwest::Client::new();

        let tag: Tag = http
            .post(format!("{}/api/tags", base))
            .json(&serde_json::json!({ "name": "slow", "color": "#f00" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let changed: serde_json::Value = http
            .post(format!("{}/api/request-tags", base))
            .json(&serde_json::json!({ "url": "https://up/", "tagId": tag.id }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(changed["changed"], true);

        let tags: Vec<Tag> = http
            .get(format!("{}/api/request-tags", base))
            .query(&[("url", "https://up/")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tags, vec![tag.clone()]);

        let removed = http
            .delete(format!("{}/api/tags/{}", base, tag.id))
            .send()
            .await
            .unwrap();
        assert_eq!(removed.status().as_u16(), 204);

        let tags: Vec<Tag> = http
            .get(format!("{}/api/request-tags", base))
            .query(&[("url", "https://up/")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(tags.is_empty());

        handle.abort();
    }
}
