//! Shared fixture app and server harness for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use busker::shell::BoundServer;
use busker::{
    App, AppMetadata, Args, BindAddr, CallContext, FileHandle, Guarded, Server, SharedLog, ToolDef,
};
use busker_conf::RuntimeConfig;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct Fixture {
    /// Bumped by `Touch` only after its arguments validated.
    pub touched: AtomicUsize,
    pub log: SharedLog<String>,
    /// Tags in the order `Tag` calls finished.
    pub finished: SharedLog<String>,
    pub last_pid: Guarded<Option<u32>>,
    pub out_dir: PathBuf,
}

impl Fixture {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            touched: AtomicUsize::new(0),
            log: SharedLog::new(),
            finished: SharedLog::new(),
            last_pid: Guarded::new(None),
            out_dir,
        }
    }
}

impl App for Fixture {
    fn metadata(&self) -> AppMetadata {
        AppMetadata::new("Fixture", "integration test app").with_icon("beaker")
    }

    fn tools() -> Vec<ToolDef<Self>> {
        vec![
            ToolDef::new("Echo", "Return the text unchanged")
                .param::<String>("text")
                .hint("text", "what to echo")
                .handler(echo),
            ToolDef::new("Touch", "Bump a counter")
                .param::<String>("label")
                .param::<u8>("times")
                .blocking_handler(touch),
            ToolDef::new("Append", "Append to the shared log and read it back")
                .param::<String>("entry")
                .handler(append),
            ToolDef::new("Tag", "Sleep, then record a tag")
                .param::<String>("tag")
                .param::<u64>("delay_ms")
                .handler(tag),
            ToolDef::new("Explode", "Always panics").blocking_handler(explode),
            ToolDef::new("Stumble", "Panics before it starts unless told not to")
                .param::<bool>("fail")
                .handler(stumble),
            ToolDef::new("Sleepy", "Run a command that outlives its timeout")
                .param::<String>("script")
                .command_timeout(Duration::from_secs(1))
                .handler(sleepy),
            ToolDef::new("Export", "Write text to a file and return it")
                .param::<String>("content")
                .handler(export),
            ToolDef::new("Vanish", "Return a file that no longer exists").handler(vanish),
        ]
    }
}

async fn echo(_app: Arc<Fixture>, mut args: Args, _ctx: CallContext) -> anyhow::Result<String> {
    args.take("text")
}

fn touch(app: &Fixture, args: Args, _ctx: &CallContext) -> anyhow::Result<usize> {
    let times: u8 = args.get("times")?;
    let mut total = 0;
    for _ in 0..times {
        total = app.touched.fetch_add(1, Ordering::SeqCst) + 1;
    }
    Ok(total)
}

async fn append(app: Arc<Fixture>, mut args: Args, _ctx: CallContext) -> anyhow::Result<Vec<String>> {
    let entry: String = args.take("entry")?;
    app.log.append(entry);
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(app.log.snapshot())
}

async fn tag(app: Arc<Fixture>, mut args: Args, _ctx: CallContext) -> anyhow::Result<()> {
    let tag: String = args.take("tag")?;
    let delay: u64 = args.take("delay_ms")?;
    tokio::time::sleep(Duration::from_millis(delay)).await;
    app.finished.append(tag);
    Ok(())
}

fn explode(_app: &Fixture, _args: Args, _ctx: &CallContext) -> anyhow::Result<bool> {
    panic!("kaboom");
}

fn stumble(
    _app: Arc<Fixture>,
    mut args: Args,
    _ctx: CallContext,
) -> impl Future<Output = anyhow::Result<bool>> + Send + 'static {
    let fail: bool = args.take("fail").unwrap_or(true);
    if fail {
        panic!("stumbled during setup");
    }
    async move { Ok(false) }
}

async fn sleepy(app: Arc<Fixture>, mut args: Args, ctx: CallContext) -> anyhow::Result<String> {
    let script: String = args.take("script")?;
    match ctx.run_shell(&script).await {
        Ok(out) => Ok(out.stdout),
        Err(e) => {
            if let busker::ExecError::TimedOut { pid, .. } = &e {
                app.last_pid.with(|p| *p = Some(*pid));
            }
            Err(e.into())
        }
    }
}

async fn export(app: Arc<Fixture>, mut args: Args, _ctx: CallContext) -> anyhow::Result<FileHandle> {
    let content: String = args.take("content")?;
    let path = app.out_dir.join("export.txt");
    tokio::fs::write(&path, content).await?;
    Ok(FileHandle::new(path, "export.txt")?)
}

async fn vanish(app: Arc<Fixture>, _args: Args, _ctx: CallContext) -> anyhow::Result<FileHandle> {
    let path = app.out_dir.join("ghost.txt");
    tokio::fs::write(&path, "boo").await?;
    let handle = FileHandle::from_path(&path)?;
    tokio::fs::remove_file(&path).await?;
    Ok(handle)
}

pub struct TestServer {
    pub url: String,
    pub app: Arc<Fixture>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bound = bind(Fixture::new(dir.path().to_path_buf()), "127.0.0.1:0").await;
        let url = match bound.local_addr() {
            BindAddr::Tcp(addr) => format!("http://{}", addr),
            other => panic!("expected tcp address, got {}", other),
        };
        let app = Arc::clone(bound.state().dispatcher.app());

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            bound
                .serve(async move {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            url,
            app,
            shutdown: Some(tx),
            handle: Some(handle),
            _dir: dir,
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("{}/rpc", self.url)
    }

    /// POST one JSON-RPC request, returning the parsed body.
    pub async fn rpc(&self, session: &str, method: &str, params: Value) -> Value {
        reqwest::Client::new()
            .post(self.rpc_url())
            .header(busker::service::SESSION_HEADER, session)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    pub async fn call(&self, session: &str, tool: &str, arguments: Value) -> Value {
        self.rpc(session, "tools.call", json!({"name": tool, "arguments": arguments}))
            .await
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.unwrap();
        }
    }
}

pub fn runtime() -> RuntimeConfig {
    RuntimeConfig {
        cleanup_interval_secs: 1,
        ..RuntimeConfig::default()
    }
}

/// A fixture whose result files must live under `shared_dir`.
pub fn confined(out_dir: &Path, shared_dir: &Path) -> Server<Fixture> {
    Server::build_confined(Fixture::new(out_dir.to_path_buf()), runtime(), shared_dir).unwrap()
}

pub async fn bind(app: Fixture, addr: &str) -> BoundServer<Fixture> {
    let addr: BindAddr = addr.parse().unwrap();
    Server::build(app, runtime()).unwrap().bind(&addr).await.unwrap()
}

/// The `kind` of a JSON-RPC error reply.
pub fn error_kind(reply: &Value) -> &str {
    reply["error"]["data"]["kind"].as_str().unwrap_or_default()
}
