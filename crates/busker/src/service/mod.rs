//! Invocation Service
//!
//! JSON-RPC 2.0 over HTTP:
//! - POST /rpc - `app.describe`, `tools.call`, `rpc.discover`, `ping`
//! - DELETE /rpc - end the session named in the `busker-session-id` header
//! - GET /attachments/{call_id}/{index} - bytes of a file a result referenced
//! - GET /health - liveness for process supervisors

mod http;
mod protocol;

pub use http::SESSION_HEADER;
pub use protocol::dispatch;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use busker_conf::RuntimeConfig;
use busker_proto::ServiceDescription;

use crate::attachments::AttachmentStore;
use crate::dispatch::Dispatcher;
use crate::schema::App;
use crate::session::SessionStore;

/// Shared state behind every route.
pub struct ServiceState<A> {
    pub dispatcher: Dispatcher<A>,
    pub sessions: Arc<SessionStore>,
    pub attachments: Arc<AttachmentStore>,
    /// Reflection document, built once from the immutable catalog.
    pub discovery: ServiceDescription,
    pub version: String,
    pub started_at: Instant,
}

impl<A: App> ServiceState<A> {
    pub fn new(dispatcher: Dispatcher<A>, version: impl Into<String>) -> Self {
        let version = version.into();
        let discovery = ServiceDescription::new(version.clone(), dispatcher.catalog());
        Self {
            dispatcher,
            sessions: Arc::new(SessionStore::new()),
            attachments: Arc::new(AttachmentStore::new()),
            discovery,
            version,
            started_at: Instant::now(),
        }
    }
}

/// Build the service router.
pub fn router<A: App>(state: Arc<ServiceState<A>>) -> Router {
    Router::new()
        .route(
            "/rpc",
            post(http::rpc_handler::<A>).delete(http::delete_handler::<A>),
        )
        .route(
            "/attachments/{call_id}/{index}",
            get(http::attachment_handler::<A>),
        )
        .route("/health", get(http::health_handler::<A>))
        .with_state(state)
}

/// Periodically drop idle sessions and expired attachments.
pub fn spawn_cleanup_task(
    sessions: Arc<SessionStore>,
    attachments: Arc<AttachmentStore>,
    runtime: &RuntimeConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = runtime.cleanup_interval().max(Duration::from_millis(100));
    let max_idle = runtime.session_idle();
    let ttl = runtime.attachment_ttl();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Cleanup task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    sessions.cleanup(max_idle);
                    attachments.cleanup(ttl);
                }
            }
        }
    })
}
