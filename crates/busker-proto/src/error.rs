//! Error Types
//!
//! JSON-RPC error objects plus the structured `DispatchError` every failed
//! tool call is reported as.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    // JSON-RPC 2.0 standard error codes
    // https://www.jsonrpc.org/specification#error_object

    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;

    // Server error range, one code per tool failure kind.

    pub const TOOL_EXECUTION_FAILED: i32 = -32000;
    pub const RESULT_ENCODING_FAILED: i32 = -32001;
    pub const TIMEOUT: i32 = -32002;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    /// Recover the structured dispatch error carried in `data`, if any.
    pub fn dispatch_error(&self) -> Option<DispatchError> {
        self.data
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorData {}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    UnknownTool,
    InvalidArguments,
    ToolExecutionFailed,
    ResultEncodingFailed,
    Timeout,
}

impl DispatchErrorKind {
    /// JSON-RPC code the kind travels under.
    pub fn code(self) -> i32 {
        match self {
            DispatchErrorKind::UnknownTool => ErrorData::METHOD_NOT_FOUND,
            DispatchErrorKind::InvalidArguments => ErrorData::INVALID_PARAMS,
            DispatchErrorKind::ToolExecutionFailed => ErrorData::TOOL_EXECUTION_FAILED,
            DispatchErrorKind::ResultEncodingFailed => ErrorData::RESULT_ENCODING_FAILED,
            DispatchErrorKind::Timeout => ErrorData::TIMEOUT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchErrorKind::UnknownTool => "unknown_tool",
            DispatchErrorKind::InvalidArguments => "invalid_arguments",
            DispatchErrorKind::ToolExecutionFailed => "tool_execution_failed",
            DispatchErrorKind::ResultEncodingFailed => "result_encoding_failed",
            DispatchErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call.
///
/// `detail` holds machine-oriented context (which parameters were wrong),
/// `trace` holds the diagnostic trace of a failure inside the tool body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            trace: None,
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(
            DispatchErrorKind::UnknownTool,
            format!("Tool not found: {}", name),
        )
    }

    pub fn invalid_arguments(tool: &str, detail: impl Into<String>) -> Self {
        Self::new(
            DispatchErrorKind::InvalidArguments,
            format!("Invalid arguments for {}", tool),
        )
        .with_detail(detail)
    }

    pub fn execution_failed(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::ToolExecutionFailed, message).with_trace(trace)
    }

    pub fn encoding_failed(tool: &str, detail: impl Into<String>) -> Self {
        Self::new(
            DispatchErrorKind::ResultEncodingFailed,
            format!("Could not encode result of {}", tool),
        )
        .with_detail(detail)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::Timeout, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl From<DispatchError> for ErrorData {
    fn from(err: DispatchError) -> Self {
        let data = serde_json::to_value(&err).ok();
        ErrorData {
            code: err.kind.code(),
            message: err.message,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn standard_codes() {
        assert_eq!(ErrorData::PARSE_ERROR, -32700);
        assert_eq!(ErrorData::INVALID_REQUEST, -32600);
        assert_eq!(ErrorData::METHOD_NOT_FOUND, -32601);
        assert_eq!(ErrorData::INVALID_PARAMS, -32602);
        assert_eq!(ErrorData::INTERNAL_ERROR, -32603);
    }

    #[test]
    fn dispatch_error_survives_the_json_rpc_envelope() {
        let err = DispatchError::execution_failed("division by zero", "at divide()\nat main()");
        let data: ErrorData = err.clone().into();

        assert_eq!(data.code, ErrorData::TOOL_EXECUTION_FAILED);
        assert_eq!(data.message, "division by zero");

        let wire = serde_json::to_string(&data).unwrap();
        let parsed: ErrorData = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.dispatch_error(), Some(err));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let err = DispatchError::invalid_arguments("Echo", "missing: text");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalid_arguments");
        assert_eq!(json["detail"], "missing: text");
        assert!(json.get("trace").is_none());
    }

    #[test]
    fn each_kind_has_a_distinct_code() {
        let kinds = [
            DispatchErrorKind::UnknownTool,
            DispatchErrorKind::InvalidArguments,
            DispatchErrorKind::ToolExecutionFailed,
            DispatchErrorKind::ResultEncodingFailed,
            DispatchErrorKind::Timeout,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn plain_errors_carry_no_dispatch_error() {
        assert!(ErrorData::method_not_found("nope").dispatch_error().is_none());
    }
}
