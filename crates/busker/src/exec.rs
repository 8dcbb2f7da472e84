//! Helper subprocesses with a hard timeout.
//!
//! Children run in their own process group. The timeout covers both the exit
//! of the child and the drain of its output pipes, so a grandchild holding a
//! pipe open cannot stall the call. When the command ends, either way, the
//! whole group is killed and the child is reaped before returning, so nothing
//! started by the call outlives it.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} (pid {pid}) timed out after {timeout:?} and was killed")]
    TimedOut {
        program: String,
        pid: u32,
        timeout: Duration,
    },

    #[error("waiting on {program} failed: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::TimedOut { .. })
    }
}

/// What a finished command left behind.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub pid: u32,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Run `command` to completion, killing it if it outlives `timeout`.
pub async fn run_command(mut command: Command, timeout: Duration) -> Result<CommandOutput, ExecError> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id().unwrap_or_default();
    debug!(pid, program = %program, ?timeout, "Spawned helper command");

    let stdout = read_all(child.stdout.take());
    let stderr = read_all(child.stderr.take());
    let finished = tokio::time::timeout(timeout, async {
        let (status, stdout, stderr) = tokio::join!(child.wait(), stdout, stderr);
        status.map(|status| (status, stdout, stderr))
    })
    .await;

    match finished {
        Ok(Ok((status, stdout, stderr))) => {
            kill_process_group(pid);
            Ok(CommandOutput {
                pid,
                status,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                elapsed: start.elapsed(),
            })
        }
        Ok(Err(source)) => {
            kill_process_group(pid);
            Err(ExecError::Wait { program, source })
        }
        Err(_) => {
            kill_process_group(pid);
            // The child may have exited already while a grandchild kept the pipes open.
            if !matches!(child.try_wait(), Ok(Some(_))) {
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "Kill after timeout failed");
                }
            }
            warn!(pid, program = %program, ?timeout, "Helper command timed out and was killed");
            Err(ExecError::TimedOut {
                program,
                pid,
                timeout,
            })
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "Helper output stream closed early");
        }
    }
    buf
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if pgid <= 0 {
        return;
    }
    // SAFETY: kill(2) has no memory effects; the group was created for this child at spawn.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_output_and_status() {
        let out = run_command(sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.code(), Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_command(
            Command::new("/definitely/not/a/program"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_the_child() {
        let start = Instant::now();
        let err = run_command(sh("sleep 5"), Duration::from_millis(300))
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(3));
        let pid = match err {
            ExecError::TimedOut { pid, .. } => pid,
            other => panic!("expected timeout, got {:?}", other),
        };
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
    }

    /// False once the process is gone or left as a zombie.
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn settles_dead(pid: u32) -> bool {
        for _ in 0..40 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_covers_a_grandchild_holding_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!("sleep 5 & echo $! > {}; echo hi", pid_file.display());

        let start = Instant::now();
        let err = run_command(sh(&script), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        assert!(start.elapsed() < Duration::from_secs(3));

        let bg: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(settles_dead(bg).await, "background sleep {} survived", bg);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn detached_leftovers_are_killed_on_success() {
        let start = Instant::now();
        let out = run_command(
            sh("sleep 5 >/dev/null 2>&1 & echo $!"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(out.success());
        assert!(start.elapsed() < Duration::from_secs(3));

        let bg: u32 = out.stdout.trim().parse().unwrap();
        assert!(settles_dead(bg).await, "background sleep {} survived", bg);
    }
}
