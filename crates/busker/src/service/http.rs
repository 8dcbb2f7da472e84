//! HTTP handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use busker_proto::{ErrorData, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse, RequestId};

use super::ServiceState;
use crate::schema::App;

pub const SESSION_HEADER: &str = "busker-session-id";

/// Handle one JSON-RPC request.
///
/// 1. Resume or create the session named by the session header
/// 2. Parse the JSON-RPC message; malformed input only fails this request
/// 3. Dispatch and reply with the session header set (202 for notifications)
#[tracing::instrument(skip(state, headers, body), fields(session_id = tracing::field::Empty))]
pub async fn rpc_handler<A: App>(
    State(state): State<Arc<ServiceState<A>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&opentelemetry_http::HeaderExtractor(&headers))
    });
    tracing::Span::current().set_parent(parent);

    let session_hint = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let session_id = state.sessions.get_or_create(session_hint.as_deref());
    tracing::Span::current().record("session_id", session_id.as_str());
    state.sessions.touch(&session_id);

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                None,
                ErrorData::parse_error(format!("Invalid JSON: {}", e)),
            );
            return build_response(StatusCode::BAD_REQUEST, &session_id, Json(error));
        }
    };

    let request_id: Option<RequestId> = raw
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok());

    let message: JsonRpcMessage = match serde_json::from_value(raw) {
        Ok(m) => m,
        Err(e) => {
            let error = JsonRpcErrorResponse::new(
                request_id,
                ErrorData::invalid_request(format!("Invalid JSON-RPC: {}", e)),
            );
            return build_response(StatusCode::BAD_REQUEST, &session_id, Json(error));
        }
    };

    let Some(request_id) = message.id.clone() else {
        tracing::debug!(method = %message.method, "Ignoring notification");
        return build_response(StatusCode::ACCEPTED, &session_id, ());
    };

    tracing::info!(
        method = %message.method,
        request_id = %request_id,
        "Processing request"
    );

    match super::protocol::dispatch(&state, &session_id, &message).await {
        Ok(result) => build_response(
            StatusCode::OK,
            &session_id,
            Json(JsonRpcResponse::success(request_id, result)),
        ),
        Err(error) => build_response(
            StatusCode::OK,
            &session_id,
            Json(JsonRpcErrorResponse::new(Some(request_id), error)),
        ),
    }
}

fn build_response<T: IntoResponse>(status: StatusCode, session_id: &str, body: T) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;

    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }

    response
}

/// End a session.
#[tracing::instrument(skip(state, headers), fields(session_id = tracing::field::Empty))]
pub async fn delete_handler<A: App>(
    State(state): State<Arc<ServiceState<A>>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "Missing busker-session-id header").into_response();
    };
    tracing::Span::current().record("session_id", session_id);

    if state.sessions.remove(session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Stream the bytes of a result file.
pub async fn attachment_handler<A: App>(
    State(state): State<Arc<ServiceState<A>>>,
    Path((call_id, index)): Path<(String, usize)>,
) -> Response {
    let Some(file) = state.attachments.get(&call_id, index) else {
        tracing::debug!(call_id = %call_id, index, "Unknown attachment requested");
        return (StatusCode::NOT_FOUND, "Unknown attachment").into_response();
    };

    let handle = match tokio::fs::File::open(&file.path).await {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(path = %file.path.display(), error = %e, "Attachment no longer readable");
            return (StatusCode::GONE, format!("{} is no longer available", file.name))
                .into_response();
        }
    };

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        file.name.replace(['"', '\\'], "_")
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(handle)),
    )
        .into_response()
}

/// Liveness and a few counters.
pub async fn health_handler<A: App>(State(state): State<Arc<ServiceState<A>>>) -> Response {
    let stats = state.sessions.stats();
    Json(serde_json::json!({
        "status": "healthy",
        "version": state.version,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "app": state.dispatcher.metadata().name,
        "tools": state.dispatcher.catalog().len(),
        "sessions": stats.total,
        "busy_sessions": stats.busy,
        "available_permits": state.dispatcher.available_permits(),
    }))
    .into_response()
}
