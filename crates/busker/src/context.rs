//! Per-call state handed to tool bodies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _};
use busker_proto::WireValue;
use tokio::process::Command;

use crate::exec::{self, CommandOutput, ExecError};
use crate::marshal::{FileHandle, Marshal};

/// Validated arguments of one call, keyed by parameter name.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: BTreeMap<String, WireValue>,
}

impl Args {
    pub(crate) fn new(values: BTreeMap<String, WireValue>) -> Self {
        Self { values }
    }

    /// Remove and decode the argument bound to `name`.
    pub fn take<T: Marshal>(&mut self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .remove(name)
            .ok_or_else(|| anyhow!("no argument named `{}`", name))?;
        T::decode(value).with_context(|| format!("argument `{}`", name))
    }

    /// Decode a copy of the argument bound to `name`.
    pub fn get<T: Marshal>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no argument named `{}`", name))?;
        T::decode(value).with_context(|| format!("argument `{}`", name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything known about a call once its arguments validated.
#[derive(Debug, Clone)]
pub struct InvocationState {
    pub call_id: String,
    pub tool: String,
    pub session: Option<String>,
    pub arguments: BTreeMap<String, WireValue>,
    pub started_at: Instant,
}

/// Handle a tool body gets alongside its arguments.
#[derive(Debug, Clone)]
pub struct CallContext {
    state: Arc<InvocationState>,
    command_timeout: Duration,
    shared_dir: Option<PathBuf>,
}

impl CallContext {
    pub(crate) fn new(
        state: InvocationState,
        command_timeout: Duration,
        shared_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            state: Arc::new(state),
            command_timeout,
            shared_dir,
        }
    }

    pub fn state(&self) -> &InvocationState {
        &self.state
    }

    pub fn call_id(&self) -> &str {
        &self.state.call_id
    }

    pub fn tool(&self) -> &str {
        &self.state.tool
    }

    pub fn session(&self) -> Option<&str> {
        self.state.session.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.state.started_at.elapsed()
    }

    /// Timeout applied to helper commands started through this context.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Run a helper command under this call's timeout.
    ///
    /// A timeout surfaces to the caller as a `timeout` dispatch error as long
    /// as the tool propagates it.
    pub async fn run_command(&self, command: Command) -> Result<CommandOutput, ExecError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        tracing::info!(
            call_id = %self.state.call_id,
            tool = %self.state.tool,
            program = %program,
            timeout_ms = self.command_timeout.as_millis() as u64,
            "Running helper command"
        );
        exec::run_command(command, self.command_timeout).await
    }

    /// Directory result files must live under, if the service confines them.
    pub fn shared_dir(&self) -> Option<&Path> {
        self.shared_dir.as_deref()
    }

    /// Directory this call writes its output files to: `<shared_dir>/<call_id>`,
    /// or a per-call directory under the system temp dir when unconfined.
    pub fn output_dir(&self) -> PathBuf {
        let base = match &self.shared_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("busker"),
        };
        base.join(&self.state.call_id)
    }

    /// Write `bytes` to a file named `name` in this call's output directory
    /// and hand back a reference to it, ready to return.
    pub async fn write_file(
        &self,
        name: &str,
        bytes: impl AsRef<[u8]>,
    ) -> std::io::Result<FileHandle> {
        let dir = self.output_dir();
        let bytes = bytes.as_ref().to_vec();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || FileHandle::from_bytes(&dir, name, bytes))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Run `script` with `/bin/sh -c`.
    pub async fn run_shell(&self, script: &str) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        self.run_command(command).await
    }
}
