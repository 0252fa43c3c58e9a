//! Per-host lifecycle shared by the local, remote and fleet strategies

use jasmine_core::{ConnectionSpec, GpuConfig, JasmineError, JasmineResult, Target};
use jasmine_runtime::{shell, CommandExecutor};
use jasmine_scheduler::{plan, resolve_gpus};
use jasmine_session::Launch;
use jasmine_sync::repo::with_runner;
use jasmine_sync::{SyncDestination, SyncEngine, SyncState};
use tracing::{debug, info, warn};

use crate::context::OrchestratorContext;
use crate::result::{HostError, Phase, PhaseDetail};

/// One machine a phase runs on
#[derive(Debug, Clone)]
pub struct HostSpec<'a> {
    /// Name used in results: server name, host name or `localhost`
    pub label: String,
    /// `None` runs on this machine
    pub connection: Option<&'a ConnectionSpec>,
    pub work_dir: String,
    /// The work dir is the local source checkout itself
    pub in_place: bool,
    pub gpu_config: &'a GpuConfig,
    pub num_processes: u32,
    /// Install the toolchain during init
    pub bootstrap: bool,
}

pub(crate) fn check_cancelled(ctx: &OrchestratorContext, phase: Phase) -> JasmineResult<()> {
    if ctx.cancel.is_cancelled() {
        return Err(JasmineError::Cancelled {
            phase: phase.to_string(),
        });
    }
    Ok(())
}

pub(crate) async fn open_executor(
    ctx: &OrchestratorContext,
    connection: Option<&ConnectionSpec>,
) -> JasmineResult<Box<dyn CommandExecutor>> {
    match connection {
        Some(spec) => ctx.connector.connect(spec).await,
        None => Ok(ctx.connector.local()),
    }
}

pub(crate) async fn release(exec: Box<dyn CommandExecutor>, label: &str) {
    if let Err(e) = exec.close().await {
        warn!(host = %label, error = %e, "Failed to release control channel");
    }
}

/// Open the host's executor, run the phase, release the channel
pub(crate) async fn run_on_host(
    ctx: &OrchestratorContext,
    target: &Target,
    host: &HostSpec<'_>,
    phase: Phase,
    state: Option<&SyncState>,
) -> Result<PhaseDetail, HostError> {
    check_cancelled(ctx, phase)?;
    let exec = open_executor(ctx, host.connection).await?;
    let result = execute(ctx, target, host, exec.as_ref(), phase, state).await;
    release(exec, &host.label).await;
    result
}

async fn execute(
    ctx: &OrchestratorContext,
    target: &Target,
    host: &HostSpec<'_>,
    exec: &dyn CommandExecutor,
    phase: Phase,
    state: Option<&SyncState>,
) -> Result<PhaseDetail, HostError> {
    match phase {
        Phase::Init => Ok(init(ctx, target, host, exec).await?),
        Phase::Sync => Ok(sync(ctx, target, host, exec, require_state(state)?).await?),
        Phase::Start => {
            let sessions = start(ctx, target, host, exec).await?;
            Ok(PhaseDetail::Started { sessions })
        }
        Phase::Status => Ok(status(ctx, target, host, exec).await?),
        Phase::Check => Ok(check(host, exec).await?),
        Phase::Up => {
            init(ctx, target, host, exec).await?;
            let branch = match sync(ctx, target, host, exec, require_state(state)?).await? {
                PhaseDetail::Synced { branch } => branch,
                _ => String::new(),
            };
            let sessions = start(ctx, target, host, exec).await?;
            Ok(PhaseDetail::Up { branch, sessions })
        }
    }
}

pub(crate) fn require_state(state: Option<&SyncState>) -> JasmineResult<&SyncState> {
    state.ok_or_else(|| {
        JasmineError::ConfigurationInconsistent("sync requested without a validated source".to_string())
    })
}

pub(crate) async fn work_dir_present(exec: &dyn CommandExecutor, work_dir: &str) -> JasmineResult<bool> {
    let probe = exec
        .run(&format!("test -d {}", shell::quote_dir(work_dir)), None)
        .await?;
    Ok(probe.success())
}

/// Clone when the work dir is absent, otherwise offer the update pass
pub(crate) async fn init(
    ctx: &OrchestratorContext,
    target: &Target,
    host: &HostSpec<'_>,
    exec: &dyn CommandExecutor,
) -> JasmineResult<PhaseDetail> {
    if host.bootstrap {
        for command in target.effective_bootstrap_commands() {
            check_cancelled(ctx, Phase::Init)?;
            exec.run_checked(&command, None).await?;
        }
    }

    check_cancelled(ctx, Phase::Init)?;
    if !work_dir_present(exec, &host.work_dir).await? {
        let repo = target.repo_url.as_deref().ok_or_else(|| {
            JasmineError::ConfigurationInconsistent(format!(
                "target '{}': {} does not exist on {} and no repo_url is configured",
                target.name, host.work_dir, host.label
            ))
        })?;
        info!(host = %host.label, work_dir = %host.work_dir, "Cloning repository");
        exec.run_checked(
            &format!("git clone {} {}", shell::quote(repo), shell::quote_dir(&host.work_dir)),
            None,
        )
        .await?;
        for command in target.effective_setup_commands() {
            check_cancelled(ctx, Phase::Init)?;
            exec.run_checked(&command, Some(&host.work_dir)).await?;
        }
        return Ok(PhaseDetail::Initialized {
            cloned: true,
            updated: false,
        });
    }

    let prompt = format!(
        "{} already exists on {}. Run the update commands?",
        host.work_dir, host.label
    );
    if !ctx.confirm.confirm(&prompt).await {
        debug!(host = %host.label, "Update pass declined");
        return Ok(PhaseDetail::Initialized {
            cloned: false,
            updated: false,
        });
    }

    for command in target.effective_update_commands() {
        check_cancelled(ctx, Phase::Init)?;
        exec.run_checked(&command, Some(&host.work_dir)).await?;
    }
    Ok(PhaseDetail::Initialized {
        cloned: false,
        updated: true,
    })
}

pub(crate) async fn sync(
    ctx: &OrchestratorContext,
    target: &Target,
    host: &HostSpec<'_>,
    exec: &dyn CommandExecutor,
    state: &SyncState,
) -> JasmineResult<PhaseDetail> {
    let local = ctx.connector.local();
    let mut engine = SyncEngine::validated(target, ctx.src_dir.clone(), state.clone(), ctx.cancel.clone());
    let dest = SyncDestination {
        exec,
        work_dir: &host.work_dir,
        connection: host.connection,
        in_place: host.in_place,
    };
    let synced = engine.apply(local.as_ref(), &dest).await?;
    Ok(PhaseDetail::Synced {
        branch: synced.current_branch,
    })
}

/// Launch one session per allocation
///
/// Cancellation is honored only before the first session exists. A failure
/// part way through reports the sessions already running.
pub(crate) async fn start(
    ctx: &OrchestratorContext,
    target: &Target,
    host: &HostSpec<'_>,
    exec: &dyn CommandExecutor,
) -> Result<Vec<jasmine_core::Session>, HostError> {
    let launch = ctx.launch.as_ref().ok_or_else(|| {
        JasmineError::ConfigurationInconsistent(format!(
            "target '{}': no agent command to start",
            target.name
        ))
    })?;

    let gpus = resolve_gpus(exec, host.gpu_config).await?;
    let allocations = plan(&gpus, host.num_processes);
    let command = with_runner(target.command_runner.as_deref(), &launch.command);
    let mut extra_env = target.env.clone();
    extra_env.extend(launch.env.clone());
    let session_launch = Launch {
        command: &command,
        extra_env: &extra_env,
        cwd: Some(&host.work_dir),
    };

    check_cancelled(ctx, Phase::Start)?;
    let mut sessions = Vec::with_capacity(allocations.len());
    for allocation in &allocations {
        match ctx
            .supervisor
            .start(exec, &target.name, allocation, &session_launch)
            .await
        {
            Ok(session) => sessions.push(session),
            Err(error) => {
                return Err(HostError {
                    error,
                    live_sessions: sessions,
                })
            }
        }
    }
    Ok(sessions)
}

pub(crate) async fn status(
    ctx: &OrchestratorContext,
    target: &Target,
    host: &HostSpec<'_>,
    exec: &dyn CommandExecutor,
) -> JasmineResult<PhaseDetail> {
    let mut sessions = Vec::with_capacity(host.num_processes as usize);
    for index in 0..host.num_processes {
        sessions.push(ctx.supervisor.status(exec, &target.name, index).await?);
    }
    Ok(PhaseDetail::Status { sessions })
}

pub(crate) async fn check(host: &HostSpec<'_>, exec: &dyn CommandExecutor) -> JasmineResult<PhaseDetail> {
    let present = work_dir_present(exec, &host.work_dir).await?;
    if !present {
        warn!(host = %host.label, work_dir = %host.work_dir, "Work dir is missing");
    }
    Ok(PhaseDetail::Checked {
        work_dir_present: present,
    })
}
