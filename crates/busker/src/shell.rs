//! App Runtime Shell
//!
//! Extract the schema, bind the service address, serve until a shutdown
//! signal, release the address.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use busker_conf::{BuskerConfig, ConfigError, RuntimeConfig};

use crate::dispatch::Dispatcher;
use crate::schema::{App, SchemaError};
use crate::service::{self, ServiceState};

/// Where the service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bind address {input:?}: {reason}")]
pub struct AddrError {
    pub input: String,
    pub reason: String,
}

impl FromStr for BindAddr {
    type Err = AddrError;

    /// Accepts `unix:///path`, `unix:/path`, `tcp://host:port`, or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| AddrError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = s.strip_prefix("unix://").or_else(|| s.strip_prefix("unix:")) {
            if path.is_empty() {
                return Err(err("empty socket path"));
            }
            return Ok(BindAddr::Unix(PathBuf::from(path)));
        }

        let hostport = s.strip_prefix("tcp://").unwrap_or(s);
        hostport
            .parse::<SocketAddr>()
            .map(BindAddr::Tcp)
            .map_err(|e| err(&e.to_string()))
    }
}

impl fmt::Display for BindAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAddr::Tcp(addr) => write!(f, "tcp://{}", addr),
            BindAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("schema extraction failed: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Address(#[from] AddrError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: BindAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("shared directory {path}: {source}")]
    SharedDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// An app with its schema extracted, not yet listening.
pub struct Server<A> {
    state: Arc<ServiceState<A>>,
    runtime: RuntimeConfig,
}

impl<A: App> Server<A> {
    /// Extract the schema. A bad schema fails here, before any address is taken.
    pub fn build(app: A, runtime: RuntimeConfig) -> Result<Self, SchemaError> {
        let dispatcher = Dispatcher::build(app, &runtime)?;
        let state = Arc::new(ServiceState::new(dispatcher, env!("CARGO_PKG_VERSION")));
        Ok(Self { state, runtime })
    }

    /// Like [`Server::build`], but result files must live under `shared_dir`,
    /// which is created if missing.
    pub fn build_confined(
        app: A,
        runtime: RuntimeConfig,
        shared_dir: impl Into<PathBuf>,
    ) -> Result<Self, ShellError> {
        let shared_dir = shared_dir.into();
        let dispatcher = Dispatcher::build(app, &runtime)?;
        std::fs::create_dir_all(&shared_dir).map_err(|source| ShellError::SharedDir {
            path: shared_dir.clone(),
            source,
        })?;
        info!(shared_dir = %shared_dir.display(), "Result files confined");
        let dispatcher = dispatcher.with_shared_dir(shared_dir);
        let state = Arc::new(ServiceState::new(dispatcher, env!("CARGO_PKG_VERSION")));
        Ok(Self { state, runtime })
    }

    pub fn state(&self) -> &Arc<ServiceState<A>> {
        &self.state
    }

    pub async fn bind(self, addr: &BindAddr) -> Result<BoundServer<A>, ShellError> {
        let bind_err = |source| ShellError::Bind {
            addr: addr.clone(),
            source,
        };

        let (listener, local) = match addr {
            BindAddr::Tcp(sock) => {
                let l = tokio::net::TcpListener::bind(sock).await.map_err(bind_err)?;
                let local = l.local_addr().map_err(bind_err)?;
                (Listener::Tcp(l), BindAddr::Tcp(local))
            }
            #[cfg(unix)]
            BindAddr::Unix(path) => {
                remove_stale_socket(path).map_err(bind_err)?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(bind_err)?;
                }
                let l = tokio::net::UnixListener::bind(path).map_err(bind_err)?;
                (Listener::Unix(l, path.clone()), BindAddr::Unix(path.clone()))
            }
            #[cfg(not(unix))]
            BindAddr::Unix(_) => {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                )))
            }
        };

        info!(addr = %local, "Bound invocation service");
        Ok(BoundServer {
            server: self,
            listener,
            local,
        })
    }
}

enum Listener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

/// A server holding its address.
pub struct BoundServer<A> {
    server: Server<A>,
    listener: Listener,
    local: BindAddr,
}

impl<A: App> BoundServer<A> {
    /// The address actually bound (port 0 resolved).
    pub fn local_addr(&self) -> &BindAddr {
        &self.local
    }

    pub fn state(&self) -> &Arc<ServiceState<A>> {
        &self.server.state
    }

    /// Serve until `shutdown` resolves, then release the address.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ShellError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.server.state);
        let cancel = CancellationToken::new();
        let cleanup = service::spawn_cleanup_task(
            Arc::clone(&state.sessions),
            Arc::clone(&state.attachments),
            &self.server.runtime,
            cancel.clone(),
        );
        let app = service::router(state);

        info!(
            addr = %self.local,
            app = %self.server.state.dispatcher.metadata().name,
            "Invocation service ready: POST /rpc, GET /attachments/{{call_id}}/{{index}}, GET /health"
        );

        let served = match self.listener {
            Listener::Tcp(l) => axum::serve(l, app).with_graceful_shutdown(shutdown).await,
            #[cfg(unix)]
            Listener::Unix(l, path) => {
                let result = axum::serve(l, app).with_graceful_shutdown(shutdown).await;
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Could not remove socket file");
                }
                result
            }
        };

        cancel.cancel();
        if let Err(e) = cleanup.await {
            warn!(error = %e, "Cleanup task ended abnormally");
        }

        served.map_err(ShellError::Serve)?;
        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Load config from the standard locations and run `app` until SIGINT/SIGTERM.
pub async fn launch<A: App>(app: A) -> Result<(), ShellError> {
    launch_with(app, BuskerConfig::load()?).await
}

/// Run `app` with an explicit config until SIGINT/SIGTERM.
pub async fn launch_with<A: App>(app: A, config: BuskerConfig) -> Result<(), ShellError> {
    let addr: BindAddr = config.bind.address.parse()?;
    let server = Server::build_confined(app, config.runtime, config.paths.shared_dir)?;
    server.bind(&addr).await?.serve(shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
