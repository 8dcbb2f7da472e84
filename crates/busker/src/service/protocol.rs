//! JSON-RPC method dispatch.
//!
//! Implements OpenTelemetry JSON-RPC semantic conventions for observability.
//! See: https://opentelemetry.io/docs/specs/semconv/rpc/json-rpc/

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

use busker_proto::rpc::{METHOD_CALL, METHOD_DESCRIBE, METHOD_DISCOVER, METHOD_PING};
use busker_proto::{
    CallParams, CallResult, DescribeAppResult, ErrorData, JsonRpcMessage, PingResult,
};

use super::ServiceState;
use crate::schema::App;

/// Route one request to its method.
pub async fn dispatch<A: App>(
    state: &Arc<ServiceState<A>>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let request_id = message
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    let span = tracing::info_span!(
        "busker.dispatch",
        rpc.system = "jsonrpc",
        rpc.method = %message.method,
        rpc.jsonrpc.version = "2.0",
        rpc.jsonrpc.request_id = %request_id,
        busker.session_id = %session_id,
        error.type = tracing::field::Empty,
        rpc.jsonrpc.error_code = tracing::field::Empty,
        rpc.jsonrpc.error_message = tracing::field::Empty,
    );

    async {
        let result = dispatch_inner(state, session_id, message).await;
        if let Err(ref error) = result {
            record_error_on_span(error);
        }
        result
    }
    .instrument(span)
    .await
}

fn record_error_on_span(error: &ErrorData) {
    let span = tracing::Span::current();
    span.record("error.type", error_type_for(error));
    span.record("rpc.jsonrpc.error_code", error.code);
    span.record("rpc.jsonrpc.error_message", error.message.as_str());
}

fn error_type_for(error: &ErrorData) -> &'static str {
    if let Some(dispatch) = error.dispatch_error() {
        return dispatch.kind.as_str();
    }
    match error.code {
        ErrorData::PARSE_ERROR => "parse_error",
        ErrorData::INVALID_REQUEST => "invalid_request",
        ErrorData::METHOD_NOT_FOUND => "method_not_found",
        ErrorData::INVALID_PARAMS => "invalid_params",
        ErrorData::INTERNAL_ERROR => "internal_error",
        _ => "application_error",
    }
}

async fn dispatch_inner<A: App>(
    state: &Arc<ServiceState<A>>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    match message.method.as_str() {
        METHOD_DESCRIBE => to_result(&DescribeAppResult {
            app: state.dispatcher.metadata().clone(),
            tools: state.dispatcher.catalog().as_ref().clone(),
        }),
        METHOD_CALL => handle_call(state, session_id, message).await,
        METHOD_DISCOVER => to_result(&state.discovery),
        METHOD_PING => to_result(&PingResult {
            status: "ok".to_string(),
            version: state.version.clone(),
        }),
        _ => Err(ErrorData::method_not_found(&message.method)),
    }
}

async fn handle_call<A: App>(
    state: &Arc<ServiceState<A>>,
    session_id: &str,
    message: &JsonRpcMessage,
) -> Result<Value, ErrorData> {
    let params: CallParams = serde_json::from_value(message.params.clone().unwrap_or(Value::Null))
        .map_err(|e| ErrorData::invalid_params(format!("Invalid tools.call params: {}", e)))?;

    // One call per session at a time, in arrival order.
    let _turn = state
        .sessions
        .acquire_turn(session_id)
        .await
        .ok_or_else(|| ErrorData::invalid_request(format!("Session ended: {}", session_id)))?;

    let outcome = state
        .dispatcher
        .invoke(&params.name, params.arguments, Some(session_id))
        .await
        .map_err(ErrorData::from)?;

    let attachments = state.attachments.register(&outcome.call_id, outcome.files);
    to_result(&CallResult {
        call_id: outcome.call_id,
        value: outcome.value,
        attachments,
    })
}

fn to_result<T: Serialize>(result: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(result)
        .map_err(|e| ErrorData::internal_error(format!("Failed to serialize result: {}", e)))
}
