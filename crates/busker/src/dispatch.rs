//! Dispatcher
//!
//! Turns `(tool name, tagged arguments)` into a tool body invocation and its
//! outcome. Arguments are validated all-or-nothing before any tool code runs;
//! tool bodies run on their own task, bounded by a permit pool.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busker_conf::RuntimeConfig;
use busker_proto::{AppMetadata, DispatchError, DispatchErrorKind, ToolCatalog, WireValue};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::context::{Args, CallContext, InvocationState};
use crate::exec::ExecError;
use crate::schema::{extract, App, Binding, Body, Encoded, SchemaError};

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Received,
    Validated,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallPhase::Received => "received",
            CallPhase::Validated => "validated",
            CallPhase::Executing => "executing",
            CallPhase::Succeeded => "succeeded",
            CallPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A file referenced by a result, checked readable at return time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// A successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub call_id: String,
    pub value: Option<WireValue>,
    pub files: Vec<ResultFile>,
    pub elapsed: Duration,
}

pub struct Dispatcher<A> {
    app: Arc<A>,
    metadata: AppMetadata,
    catalog: Arc<ToolCatalog>,
    bindings: std::collections::HashMap<String, Binding<A>>,
    permits: Arc<Semaphore>,
    command_timeout: Duration,
    shared_dir: Option<PathBuf>,
}

impl<A: App> Dispatcher<A> {
    /// Extract the app's schema and get ready to dispatch.
    pub fn build(app: A, runtime: &RuntimeConfig) -> Result<Self, SchemaError> {
        let extracted = extract(&app)?;
        info!(
            app = %extracted.metadata.name,
            tools = extracted.catalog.len(),
            max_concurrent_calls = runtime.max_concurrent_calls,
            "Tool catalog ready"
        );

        Ok(Self {
            app: Arc::new(app),
            metadata: extracted.metadata,
            catalog: Arc::new(extracted.catalog),
            bindings: extracted.bindings,
            permits: Arc::new(Semaphore::new(runtime.max_concurrent_calls.max(1))),
            command_timeout: runtime.command_timeout(),
            shared_dir: None,
        })
    }

    /// Confine result files to `dir`. Tool bodies get it through their context.
    pub fn with_shared_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_dir = Some(dir.into());
        self
    }

    pub fn shared_dir(&self) -> Option<&Path> {
        self.shared_dir.as_deref()
    }

    pub fn app(&self) -> &Arc<A> {
        &self.app
    }

    pub fn metadata(&self) -> &AppMetadata {
        &self.metadata
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Tool bodies that could start right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Validate, run, and encode one call.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: BTreeMap<String, WireValue>,
        session: Option<&str>,
    ) -> Result<CallOutcome, DispatchError> {
        let call_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "busker.tool.call",
            tool.name = %tool,
            tool.call_id = %call_id,
            busker.session_id = session.unwrap_or_default(),
            tool.phase = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );

        async {
            let result = self.invoke_inner(call_id, tool, arguments, session).await;
            let span = tracing::Span::current();
            match &result {
                Ok(outcome) => {
                    span.record("tool.phase", CallPhase::Succeeded.to_string().as_str());
                    info!(elapsed_ms = outcome.elapsed.as_millis() as u64, "Tool call succeeded");
                }
                Err(err) => {
                    span.record("tool.phase", CallPhase::Failed.to_string().as_str());
                    span.record("error.type", err.kind.as_str());
                    warn!(kind = %err.kind, message = %err.message, "Tool call failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn invoke_inner(
        &self,
        call_id: String,
        tool: &str,
        arguments: BTreeMap<String, WireValue>,
        session: Option<&str>,
    ) -> Result<CallOutcome, DispatchError> {
        debug!(phase = %CallPhase::Received, args = arguments.len());

        let binding = self
            .bindings
            .get(tool)
            .ok_or_else(|| DispatchError::unknown_tool(tool))?;

        validate(tool, binding, &arguments)?;
        debug!(phase = %CallPhase::Validated);

        let state = InvocationState {
            call_id: call_id.clone(),
            tool: tool.to_string(),
            session: session.map(str::to_string),
            arguments: arguments.clone(),
            started_at: Instant::now(),
        };
        let ctx = CallContext::new(
            state,
            binding.command_timeout.unwrap_or(self.command_timeout),
            self.shared_dir.clone(),
        );
        let args = Args::new(arguments);

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| {
                DispatchError::new(DispatchErrorKind::ToolExecutionFailed, "dispatcher is shutting down")
            })?;
        debug!(phase = %CallPhase::Executing);

        let started = Instant::now();
        let app = Arc::clone(&self.app);
        let joined: Result<anyhow::Result<Encoded>, JoinError> = match &binding.body {
            Body::Async(body) => {
                let body = Arc::clone(body);
                tokio::spawn(
                    async move {
                        let _permit = permit;
                        body(app, args, ctx).await
                    }
                    .in_current_span(),
                )
                .await
            }
            Body::Blocking(body) => {
                let body = Arc::clone(body);
                let span = tracing::Span::current();
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let _entered = span.enter();
                    body(app.as_ref(), args, &ctx)
                })
                .await
            }
        };

        let encoded = match joined {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(err)) => return Err(classify_failure(tool, err)),
            Err(join_err) => return Err(join_failure(tool, join_err)),
        };
        let value = encoded.map_err(|e| DispatchError::encoding_failed(tool, e.to_string()))?;
        let files = match &value {
            Some(v) => check_files(tool, v, self.shared_dir.as_deref()).await?,
            None => Vec::new(),
        };

        Ok(CallOutcome {
            call_id,
            value,
            files,
            elapsed: started.elapsed(),
        })
    }
}

/// Check every argument before anything runs. Reports all problems at once.
fn validate<A>(
    tool: &str,
    binding: &Binding<A>,
    arguments: &BTreeMap<String, WireValue>,
) -> Result<(), DispatchError> {
    let mut problems = Vec::new();

    for p in &binding.params {
        match arguments.get(&p.name) {
            None => problems.push(format!("missing parameter `{}` ({})", p.name, p.kind)),
            Some(value) => {
                if let Err(e) = (p.check)(value) {
                    problems.push(format!("parameter `{}`: {}", p.name, e));
                }
            }
        }
    }
    for name in arguments.keys() {
        if !binding.params.iter().any(|p| &p.name == name) {
            problems.push(format!("unexpected parameter `{}`", name));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::invalid_arguments(tool, problems.join("; ")))
    }
}

/// Map an error returned by a tool body.
fn classify_failure(tool: &str, err: anyhow::Error) -> DispatchError {
    let timed_out = err
        .chain()
        .find_map(|e| e.downcast_ref::<ExecError>())
        .filter(|e| e.is_timeout());

    if let Some(exec_err) = timed_out {
        return DispatchError::timeout(format!("{} timed out: {}", tool, exec_err))
            .with_trace(format!("{:?}", err));
    }

    DispatchError::execution_failed(err.to_string(), format!("{:?}", err))
}

/// Map a tool task that panicked or was cancelled.
fn join_failure(tool: &str, err: JoinError) -> DispatchError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        DispatchError::execution_failed(
            message.clone(),
            format!("tool `{}` panicked: {}", tool, message),
        )
    } else {
        DispatchError::execution_failed(
            format!("tool `{}` was cancelled", tool),
            err.to_string(),
        )
    }
}

/// Every file a result references must exist and be readable now, and sit
/// under `shared_dir` when one is set.
async fn check_files(
    tool: &str,
    value: &WireValue,
    shared_dir: Option<&Path>,
) -> Result<Vec<ResultFile>, DispatchError> {
    let root = match shared_dir {
        Some(dir) => Some(tokio::fs::canonicalize(dir).await.map_err(|e| {
            DispatchError::encoding_failed(
                tool,
                format!("shared directory {}: {}", dir.display(), e),
            )
        })?),
        None => None,
    };

    let mut files = Vec::new();
    for f in value.files() {
        let path = PathBuf::from(&f.path);
        let checked = async {
            let resolved = tokio::fs::canonicalize(&path).await?;
            if let Some(root) = &root {
                if !resolved.starts_with(root) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("outside the shared directory {}", root.display()),
                    ));
                }
            }
            let meta = tokio::fs::metadata(&resolved).await?;
            if !meta.is_file() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ));
            }
            tokio::fs::File::open(&path).await?;
            Ok(meta.len())
        }
        .await;

        match checked {
            Ok(size) => files.push(ResultFile {
                path,
                name: f.name.clone(),
                size,
            }),
            Err(e) => {
                return Err(DispatchError::encoding_failed(
                    tool,
                    format!("file `{}` at {}: {}", f.name, f.path, e),
                ))
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::FileHandle;
    use crate::schema::ToolDef;
    use busker_proto::DispatchErrorKind;

    struct Pairing;

    impl App for Pairing {
        fn metadata(&self) -> AppMetadata {
            AppMetadata::new("Pairing", "names paired with ages")
        }

        fn tools() -> Vec<ToolDef<Self>> {
            vec![
                ToolDef::new("Pair", "Two params")
                    .param::<String>("name")
                    .param::<u8>("age")
                    .handler(|_app: Arc<Pairing>, mut args: Args, _ctx| async move {
                        let name: String = args.take("name")?;
                        let age: u8 = args.take("age")?;
                        Ok::<_, anyhow::Error>(format!("{}:{}", name, age))
                    }),
                ToolDef::new("Hasty", "Fails before its future exists").handler(
                    |_app: Arc<Pairing>, _args: Args, _ctx| {
                        if true {
                            panic!("setup went wrong");
                        }
                        async move { Ok::<_, anyhow::Error>(true) }
                    },
                ),
                ToolDef::new("Point", "Return an existing file")
                    .param::<String>("path")
                    .handler(|_app: Arc<Pairing>, mut args: Args, _ctx| async move {
                        let path: String = args.take("path")?;
                        Ok::<_, anyhow::Error>(FileHandle::from_path(path)?)
                    }),
                ToolDef::new("Write", "Write a file through the context")
                    .param::<String>("text")
                    .handler(|_app: Arc<Pairing>, mut args: Args, ctx: CallContext| async move {
                        let text: String = args.take("text")?;
                        Ok::<_, anyhow::Error>(ctx.write_file("out.txt", text).await?)
                    }),
            ]
        }
    }

    fn binding() -> Dispatcher<Pairing> {
        Dispatcher::build(Pairing, &RuntimeConfig::default()).unwrap()
    }

    fn point_at(path: &Path) -> BTreeMap<String, WireValue> {
        let mut args = BTreeMap::new();
        args.insert(
            "path".to_string(),
            WireValue::text(path.to_string_lossy().into_owned()),
        );
        args
    }

    #[test]
    fn validation_reports_every_problem() {
        let d = binding();
        let b = d.bindings.get("Pair").unwrap();
        let mut args = BTreeMap::new();
        args.insert("age".to_string(), WireValue::Int(300));
        args.insert("nickname".to_string(), WireValue::text("x"));

        let err = validate("Pair", b, &args).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::InvalidArguments);
        let detail = err.detail.unwrap();
        assert!(detail.contains("missing parameter `name`"), "{}", detail);
        assert!(detail.contains("parameter `age`: 300 does not fit in u8"), "{}", detail);
        assert!(detail.contains("unexpected parameter `nickname`"), "{}", detail);
    }

    #[test]
    fn timeouts_are_found_through_context() {
        let err = anyhow::Error::new(ExecError::TimedOut {
            program: "sleep".into(),
            pid: 42,
            timeout: Duration::from_secs(1),
        })
        .context("running the report");

        let mapped = classify_failure("Report", err);
        assert_eq!(mapped.kind, DispatchErrorKind::Timeout);
        assert!(mapped.trace.unwrap().contains("running the report"));
    }

    #[test]
    fn other_errors_keep_their_chain_as_trace() {
        let err = anyhow::anyhow!("disk full").context("saving note");
        let mapped = classify_failure("Save", err);
        assert_eq!(mapped.kind, DispatchErrorKind::ToolExecutionFailed);
        assert_eq!(mapped.message, "saving note");
        assert!(mapped.trace.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn narrow_ints_decode_after_validation() {
        let d = binding();
        let mut args = BTreeMap::new();
        args.insert("name".to_string(), WireValue::text("ada"));
        args.insert("age".to_string(), WireValue::Int(36));
        let outcome = d.invoke("Pair", args, None).await.unwrap();
        assert_eq!(outcome.value, Some(WireValue::text("ada:36")));
        assert!(outcome.files.is_empty());
    }

    #[tokio::test]
    async fn panic_before_the_future_is_a_tool_failure() {
        let d = binding();
        let err = d.invoke("Hasty", BTreeMap::new(), None).await.unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::ToolExecutionFailed);
        assert_eq!(err.message, "setup went wrong");
        assert_eq!(d.available_permits(), RuntimeConfig::default().max_concurrent_calls);

        let mut args = BTreeMap::new();
        args.insert("name".to_string(), WireValue::text("bo"));
        args.insert("age".to_string(), WireValue::Int(7));
        assert!(d.invoke("Pair", args, None).await.is_ok());
    }

    #[tokio::test]
    async fn result_files_stay_inside_the_shared_dir() {
        let shared = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let inside = shared.path().join("kept.txt");
        let outside = elsewhere.path().join("secret.txt");
        std::fs::write(&inside, "kept").unwrap();
        std::fs::write(&outside, "secret").unwrap();

        let d = binding().with_shared_dir(shared.path());

        let outcome = d.invoke("Point", point_at(&inside), None).await.unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].name, "kept.txt");
        assert_eq!(outcome.files[0].size, 4);

        let err = d.invoke("Point", point_at(&outside), None).await.unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::ResultEncodingFailed);
        let detail = err.detail.unwrap();
        assert!(detail.contains("outside the shared directory"), "{}", detail);

        let sneaky = shared
            .path()
            .join("..")
            .join(elsewhere.path().file_name().unwrap())
            .join("secret.txt");
        let err = d.invoke("Point", point_at(&sneaky), None).await.unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::ResultEncodingFailed);
    }

    #[tokio::test]
    async fn unconfined_dispatch_accepts_any_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("any.txt");
        std::fs::write(&path, "x").unwrap();
        let outcome = binding().invoke("Point", point_at(&path), None).await.unwrap();
        assert_eq!(outcome.files[0].size, 1);
    }

    #[tokio::test]
    async fn written_files_land_under_the_call_id() {
        let shared = tempfile::tempdir().unwrap();
        let d = binding().with_shared_dir(shared.path());
        let mut args = BTreeMap::new();
        args.insert("text".to_string(), WireValue::text("hello"));

        let outcome = d.invoke("Write", args, None).await.unwrap();
        let file = &outcome.files[0];
        assert_eq!(file.name, "out.txt");
        assert_eq!(file.size, 5);
        assert_eq!(
            file.path,
            shared.path().join(&outcome.call_id).join("out.txt")
        );
    }

    #[test]
    fn phases_display_lowercase() {
        assert_eq!(CallPhase::Executing.to_string(), "executing");
    }
}
