//! Session supervisor: start, poll and reattach agent sessions

use jasmine_core::{
    session_name, ConflictPolicy, ConnectionSpec, JasmineError, JasmineResult, Session,
    SessionStatus,
};
use jasmine_runtime::{shell, CommandExecutor};
use jasmine_scheduler::Allocation;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::tmux;

/// What to run inside a session
#[derive(Debug, Clone)]
pub struct Launch<'a> {
    /// Opaque agent command
    pub command: &'a str,
    /// Exported after the allocation variables
    pub extra_env: &'a BTreeMap<String, String>,
    /// Directory the session starts in
    pub cwd: Option<&'a str>,
}

/// Creates and polls durable sessions over a command executor
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionSupervisor {
    policy: ConflictPolicy,
}

impl SessionSupervisor {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    async fn ensure_tmux(exec: &dyn CommandExecutor) -> JasmineResult<()> {
        let probe = exec.run(tmux::PROBE, None).await?;
        if probe.success() {
            Ok(())
        } else {
            warn!(host = exec.host(), "tmux is not installed");
            Err(JasmineError::missing_tool(exec.host(), "tmux"))
        }
    }

    async fn probe(exec: &dyn CommandExecutor, name: &str) -> JasmineResult<SessionStatus> {
        let exists = exec.run(&tmux::has_session(name), None).await?;
        if !exists.success() {
            return Ok(SessionStatus::NotFound);
        }
        let panes = exec.run_checked(&tmux::pane_status(name), None).await?;
        Ok(tmux::parse_pane_status(&panes.stdout))
    }

    /// Current status of the session for `(target, process_index)`
    pub async fn status(
        &self,
        exec: &dyn CommandExecutor,
        target: &str,
        process_index: u32,
    ) -> JasmineResult<Session> {
        Self::ensure_tmux(exec).await?;
        let status = Self::probe(exec, &session_name(target, process_index)).await?;
        debug!(
            host = exec.host(),
            target = target,
            process_index = process_index,
            status = %status,
            "Polled session"
        );
        Ok(Session::new(target, process_index, status))
    }

    /// Start the agent for `allocation` in its own session
    ///
    /// Returns as soon as the session exists; the agent keeps running after
    /// the executor's channel closes.
    pub async fn start(
        &self,
        exec: &dyn CommandExecutor,
        target: &str,
        allocation: &Allocation,
        launch: &Launch<'_>,
    ) -> JasmineResult<Session> {
        Self::ensure_tmux(exec).await?;

        let index = allocation.process_index;
        let name = session_name(target, index);
        match Self::probe(exec, &name).await? {
            SessionStatus::Running => match self.policy {
                ConflictPolicy::Reject => {
                    warn!(host = exec.host(), session = %name, "Session already running");
                    return Err(JasmineError::SessionConflict { session: name });
                }
                ConflictPolicy::Reuse => {
                    info!(host = exec.host(), session = %name, "Reusing running session");
                    return Ok(Session::new(target, index, SessionStatus::Running));
                }
                ConflictPolicy::Restart => {
                    info!(host = exec.host(), session = %name, "Restarting running session");
                    exec.run_checked(&tmux::kill_session(&name), None).await?;
                }
            },
            SessionStatus::Exited(code) => {
                debug!(host = exec.host(), session = %name, exit_code = code, "Replacing exited session");
                exec.run_checked(&tmux::kill_session(&name), None).await?;
            }
            SessionStatus::NotFound => {}
        }

        let env = allocation.launch_env(launch.extra_env);
        let command = match shell::export_env(env.iter().map(|(k, v)| (k, v))) {
            Some(exports) => format!("{} && {}", exports, launch.command),
            None => launch.command.to_string(),
        };
        exec.run_checked(&tmux::create_session(&name, launch.cwd, &command), None)
            .await?;

        info!(
            host = exec.host(),
            session = %name,
            gpus = ?allocation.gpu_ids,
            "Started agent session"
        );
        Ok(Session::new(target, index, SessionStatus::Running))
    }

    /// Command a person runs to reattach to the session
    pub fn attach_command(
        target: &str,
        process_index: u32,
        connection: Option<&ConnectionSpec>,
    ) -> String {
        let attach = tmux::attach_session(&session_name(target, process_index));
        match connection {
            None => attach,
            Some(conn) => {
                let mut parts = vec!["ssh".to_string(), "-t".to_string()];
                parts.extend(conn.ssh_options().iter().map(|o| shell::quote(o)));
                parts.push(shell::quote(&conn.destination()));
                parts.push(attach);
                parts.join(" ")
            }
        }
    }
}
