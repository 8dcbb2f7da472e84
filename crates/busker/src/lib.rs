//! busker - tool app runtime
//!
//! An app is a value implementing [`App`]: some metadata plus an ordered
//! list of [`ToolDef`]s. At startup the runtime extracts an immutable tool
//! catalog, then serves it over a JSON-RPC invocation service that clients
//! can reflect on (`app.describe`, `rpc.discover`) and call (`tools.call`).
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     busker::launch(Notes::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod collab;
pub mod context;
pub mod dispatch;
pub mod exec;
pub mod marshal;
pub mod schema;
pub mod service;
pub mod session;
pub mod shell;
pub mod state;

#[cfg(feature = "client")]
pub mod client;

pub use busker_proto::{
    AppMetadata, DispatchError, DispatchErrorKind, ToolCatalog, ToolDescriptor, ValueKind,
    WireValue,
};
pub use context::{Args, CallContext};
pub use dispatch::{CallOutcome, Dispatcher};
pub use exec::{CommandOutput, ExecError};
pub use marshal::{FileHandle, Marshal, MarshalError};
pub use schema::{extract, App, Extracted, SchemaError, ToolDef};
pub use shell::{launch, launch_with, BindAddr, Server, ShellError};
pub use state::{CommandHistory, Guarded, SharedLog};

#[cfg(feature = "client")]
pub use client::{ClientError, ToolClient};
