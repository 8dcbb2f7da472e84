//! JSON-RPC client for a running busker app.
//!
//! Speaks to the invocation service over HTTP. Each client owns one
//! session, so calls made through it are processed in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use busker_proto::rpc::{METHOD_CALL, METHOD_DESCRIBE, METHOD_DISCOVER, METHOD_PING};
use busker_proto::{
    Attachment, CallParams, CallResult, DescribeAppResult, DispatchError, ErrorData, PingResult,
    ServiceDescription, WireValue,
};

use crate::service::SESSION_HEADER;

/// Errors that can occur when talking to a busker app.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The app rejected a tool call.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Any other JSON-RPC error.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(ErrorData),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub struct ToolClient {
    base_url: String,
    client: Client,
    session_id: String,
    request_id: AtomicU64,
    timeout: Duration,
}

impl ToolClient {
    /// `base_url` is the service root, e.g. `http://127.0.0.1:7070`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            session_id: uuid::Uuid::new_v4().to_string(),
            request_id: AtomicU64::new(1),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    #[tracing::instrument(skip(self), fields(busker.url = %self.base_url))]
    pub async fn describe(&self) -> Result<DescribeAppResult, ClientError> {
        self.request(METHOD_DESCRIBE, serde_json::json!({})).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn discover(&self) -> Result<ServiceDescription, ClientError> {
        self.request(METHOD_DISCOVER, serde_json::json!({})).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn ping(&self) -> Result<PingResult, ClientError> {
        self.request(METHOD_PING, serde_json::json!({})).await
    }

    /// Invoke a tool. Tool failures come back as [`ClientError::Dispatch`].
    #[tracing::instrument(skip(self, params), fields(tool.name = %params.name))]
    pub async fn call(&self, params: &CallParams) -> Result<CallResult, ClientError> {
        self.request(METHOD_CALL, params).await
    }

    /// Invoke a tool and keep only its value.
    pub async fn call_tool<I, K>(
        &self,
        name: &str,
        arguments: I,
    ) -> Result<Option<WireValue>, ClientError>
    where
        I: IntoIterator<Item = (K, WireValue)>,
        K: Into<String>,
    {
        let mut params = CallParams::new(name);
        for (k, v) in arguments {
            params = params.arg(k, v);
        }
        Ok(self.call(&params).await?.value)
    }

    /// Download the bytes of a file a result referenced.
    #[tracing::instrument(skip(self, attachment), fields(attachment.name = %attachment.name))]
    pub async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes, ClientError> {
        let url = format!("{}{}", self.base_url, attachment.url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    /// End this client's session on the server.
    pub async fn end_session(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(format!("{}/rpc", self.base_url))
            .header(SESSION_HEADER, &self.session_id)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        match response.status() {
            s if s.is_success() || s == reqwest::StatusCode::NOT_FOUND => Ok(()),
            s => Err(ClientError::Http {
                status: s.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, ClientError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": method,
            "params": params,
        });

        let response = self.send_request(request).await?;

        if let Some(error) = response.get("error") {
            let error: ErrorData = serde_json::from_value(error.clone())
                .map_err(|e| ClientError::Protocol(format!("Invalid error object: {}", e)))?;
            return Err(match error.dispatch_error() {
                Some(dispatch) => ClientError::Dispatch(dispatch),
                None => ClientError::Rpc(error),
            });
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| ClientError::Protocol("Missing result in response".into()))?;

        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("Invalid {} result: {}", method, e)))
    }

    async fn send_request(&self, request: Value) -> Result<Value, ClientError> {
        let mut req_builder = self
            .client
            .post(format!("{}/rpc", self.base_url))
            .header("Content-Type", "application/json")
            .header(SESSION_HEADER, &self.session_id)
            .timeout(self.timeout);

        if let Some(tp) = current_traceparent() {
            req_builder = req_builder.header("traceparent", tp);
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to parse response: {}", e)))
    }
}

/// W3C traceparent for the current span, if it is being exported.
fn current_traceparent() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let context = tracing::Span::current().context();
    let span = context.span();
    let sc = span.span_context();

    if !sc.is_valid() {
        return None;
    }
    let flags = if sc.is_sampled() { "01" } else { "00" };
    Some(format!("00-{}-{}-{}", sc.trace_id(), sc.span_id(), flags))
}
