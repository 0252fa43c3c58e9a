//! Local process executor
//!
//! Commands run through `sh -c` on this machine. Used by Local targets, by
//! the sync engine's validation pass, and to drive rsync/sbatch from here.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use jasmine_core::{JasmineError, JasmineResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::error;

use crate::execution::{line_stream, Execution, OutputChunk};
use crate::shell;
use crate::traits::CommandExecutor;

pub const LOCAL_HOST: &str = "localhost";

/// Executor that spawns child processes on this machine
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    timeout: Option<Duration>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every command by `limit`
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    fn build_command(command: &str, cwd: Option<&str>) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(shell::in_dir(command, cwd));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    fn host(&self) -> &str {
        LOCAL_HOST
    }

    async fn spawn(&self, command: &str, cwd: Option<&str>) -> JasmineResult<Execution> {
        let mut child = Self::build_command(command, cwd).spawn().map_err(|e| {
            error!(command = command, error = %e, "Failed to spawn local process");
            if e.kind() == std::io::ErrorKind::NotFound {
                JasmineError::missing_tool(LOCAL_HOST, "sh")
            } else {
                JasmineError::Io(e)
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .map(|out| line_stream(out, OutputChunk::Stdout))
            .unwrap_or_else(|| futures::stream::empty().boxed());
        let stderr = child
            .stderr
            .take()
            .map(|err| line_stream(err, OutputChunk::Stderr))
            .unwrap_or_else(|| futures::stream::empty().boxed());

        let exit = async move {
            let status = child.wait().await?;
            Ok(status.code().unwrap_or(-1))
        }
        .boxed();

        Ok(Execution::new(
            command,
            futures::stream::select(stdout, stderr).boxed(),
            exit,
        ))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_echo() {
        let exec = LocalExecutor::new();
        let out = exec.run("echo hello", None).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_in_cwd() {
        let exec = LocalExecutor::new();
        let out = exec.run("pwd", Some("/")).await.unwrap();
        assert_eq!(out.stdout.trim(), "/");
    }

    #[tokio::test]
    async fn test_run_checked_reports_exit_code() {
        let exec = LocalExecutor::new();
        let err = exec
            .run_checked("echo oops >&2; exit 3", None)
            .await
            .unwrap_err();
        match err {
            JasmineError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = LocalExecutor::new().with_timeout(Some(Duration::from_millis(100)));
        let err = exec.run("sleep 5", None).await.unwrap_err();
        assert!(matches!(err, JasmineError::Timeout { .. }));
    }
}
