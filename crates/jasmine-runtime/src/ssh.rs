//! SSH control channel executor
//!
//! One OpenSSH ControlMaster socket is opened per host and every command is
//! multiplexed through it with `ssh -S`. The socket is the connection handle:
//! it belongs to exactly one executor and is torn down on `close` or drop.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use jasmine_core::{ConnectionSpec, JasmineError, JasmineResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::execution::{line_stream, Execution, OutputChunk};
use crate::shell;
use crate::traits::CommandExecutor;

/// Exit status the ssh client reserves for its own failures
const SSH_CHANNEL_FAILURE: i32 = 255;

/// SSH connection options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// ConnectTimeout passed to the master connection
    pub connect_timeout_secs: u64,
    /// Directories prepended to PATH before each remote command
    pub extra_path: Vec<String>,
    /// Per-command timeout
    pub command_timeout: Option<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            extra_path: vec![
                "$HOME/.local/bin".to_string(),
                "$HOME/.cargo/bin".to_string(),
            ],
            command_timeout: None,
        }
    }
}

/// Executor bound to one open SSH control channel
pub struct SshExecutor {
    spec: ConnectionSpec,
    options: SshOptions,
    control_path: PathBuf,
    broken: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl SshExecutor {
    /// Open the control channel to `spec`
    pub async fn connect(spec: &ConnectionSpec, options: SshOptions) -> JasmineResult<Self> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let control_path = std::env::temp_dir().join(format!("jasmine-{}.sock", &id[..12]));

        info!(
            host = %spec.host,
            proxy = ?spec.proxy.as_ref().map(|p| p.jump_spec()),
            "Opening SSH control channel"
        );

        let mut cmd = Command::new("ssh");
        cmd.args(["-M", "-N", "-f"])
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", options.connect_timeout_secs))
            .args(spec.ssh_options())
            .arg(spec.destination())
            .stdin(Stdio::null());

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                JasmineError::missing_tool("localhost", "ssh")
            } else {
                JasmineError::connection(&spec.host, e.to_string())
            }
        })?;

        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(host = %spec.host, reason = %reason, "SSH connection failed");
            return Err(JasmineError::connection(&spec.host, reason));
        }

        debug!(host = %spec.host, control_path = %control_path.display(), "Control channel open");

        Ok(Self {
            spec: spec.clone(),
            options,
            control_path,
            broken: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// The full command string handed to the remote shell
    pub fn remote_command(&self, command: &str, cwd: Option<&str>) -> String {
        let body = shell::in_dir(command, cwd);
        match shell::path_prelude(&self.options.extra_path) {
            Some(prelude) => format!("{} && {}", prelude, body),
            None => body,
        }
    }

    fn client(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-S")
            .arg(&self.control_path)
            .args(["-o", "BatchMode=yes"])
            .args(self.spec.ssh_options());
        cmd
    }

    fn exit_master(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new("ssh");
        cmd.arg("-S")
            .arg(&self.control_path)
            .args(["-O", "exit"])
            .arg(self.spec.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    fn host(&self) -> &str {
        &self.spec.host
    }

    async fn spawn(&self, command: &str, cwd: Option<&str>) -> JasmineResult<Execution> {
        if self.broken.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(JasmineError::connection(
                &self.spec.host,
                "control channel is no longer open",
            ));
        }

        let mut cmd = self.client();
        cmd.arg(self.spec.destination())
            .arg("--")
            .arg(self.remote_command(command, cwd))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                JasmineError::missing_tool("localhost", "ssh")
            } else {
                JasmineError::connection(&self.spec.host, e.to_string())
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

        let host = self.spec.host.clone();
        let broken = Arc::clone(&self.broken);
        let exit = async move {
            let status = child.wait().await?;
            match status.code() {
                Some(SSH_CHANNEL_FAILURE) | None => {
                    broken.store(true, Ordering::SeqCst);
                    warn!(host = %host, "SSH control channel lost");
                    Err(JasmineError::connection(host, "control channel lost"))
                }
                Some(code) => Ok(code),
            }
        }
        .boxed();

        Ok(Execution::new(
            command,
            futures::stream::select(stdout, stderr).boxed(),
            exit,
        ))
    }

    fn timeout(&self) -> Option<Duration> {
        self.options.command_timeout
    }

    async fn close(&self) -> JasmineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(host = %self.spec.host, "Closing SSH control channel");
        if let Err(e) = Command::from(self.exit_master()).status().await {
            warn!(host = %self.spec.host, error = %e, "Failed to close control channel");
        }
        Ok(())
    }
}

impl Drop for SshExecutor {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Spawned, never waited on
        match self.exit_master().spawn() {
            Ok(_) => debug!(host = %self.spec.host, "Control channel exit requested on drop"),
            Err(e) => warn!(host = %self.spec.host, error = %e, "Failed to close control channel"),
        }
    }
}
