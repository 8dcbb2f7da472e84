//! busker-proto - wire types shared by busker servers and clients.
//!
//! - [`value`]: the tagged value union and declared kinds
//! - [`catalog`]: app metadata and tool descriptors
//! - [`error`]: JSON-RPC errors and `DispatchError`
//! - [`rpc`]: method params/results and the reflection document
//! - [`jsonrpc`]: JSON-RPC 2.0 envelopes

pub mod catalog;
pub mod error;
pub mod jsonrpc;
pub mod rpc;
pub mod value;

pub use catalog::{AppMetadata, MetadataError, ParamDescriptor, ToolCatalog, ToolDescriptor};
pub use error::{DispatchError, DispatchErrorKind, ErrorData};
pub use jsonrpc::{JsonRpcErrorResponse, JsonRpcMessage, JsonRpcReply, JsonRpcResponse, RequestId};
pub use rpc::{
    Attachment, CallParams, CallResult, DescribeAppResult, NoParams, OperationShape, PingResult,
    ServiceDescription, ToolShape,
};
pub use value::{FileRef, ValueKind, WireValue};
