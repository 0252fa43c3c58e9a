//! Executor trait definitions

use async_trait::async_trait;
use jasmine_core::{JasmineError, JasmineResult};
use std::time::Duration;
use tracing::debug;

use crate::execution::{CommandOutput, Execution};

/// Runs shell commands on one host, locally or over an open control channel
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Host this executor reaches, used in logs and errors
    fn host(&self) -> &str;

    /// Start a command, optionally in a working directory
    async fn spawn(&self, command: &str, cwd: Option<&str>) -> JasmineResult<Execution>;

    /// Upper bound on a single command, if any
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run a command to completion and collect its output
    async fn run(&self, command: &str, cwd: Option<&str>) -> JasmineResult<CommandOutput> {
        debug!(host = self.host(), command = command, cwd = ?cwd, "Running command");
        let execution = self.spawn(command, cwd).await?;
        let output = match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, execution.finish())
                .await
                .map_err(|_| JasmineError::Timeout {
                    command: command.to_string(),
                    secs: limit.as_secs(),
                })??,
            None => execution.finish().await?,
        };
        debug!(
            host = self.host(),
            command = command,
            exit_code = output.exit_code,
            "Command finished"
        );
        Ok(output)
    }

    /// Run a command and turn a non-zero exit into `CommandFailed`
    async fn run_checked(&self, command: &str, cwd: Option<&str>) -> JasmineResult<CommandOutput> {
        let output = self.run(command, cwd).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(JasmineError::CommandFailed {
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    /// Release the control channel
    async fn close(&self) -> JasmineResult<()> {
        Ok(())
    }
}
