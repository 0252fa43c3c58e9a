//! Batch-scheduler targets
//!
//! Commands run on the submission host: the configured login node, or this
//! machine when the target has no host. Workers are not wrapped in tmux since
//! the scheduler keeps them alive.

use async_trait::async_trait;
use jasmine_core::{JasmineError, JasmineResult, Mode, Target};
use jasmine_runtime::local::LOCAL_HOST;
use jasmine_runtime::CommandExecutor;
use jasmine_scheduler::slurm::{parse_job_id, parse_squeue, squeue_command};
use jasmine_scheduler::{plan, SlurmBatch};
use jasmine_sync::repo::with_runner;
use jasmine_sync::SyncState;
use tracing::{info, warn};

use super::host::{self, check_cancelled, require_state, work_dir_present, HostSpec};
use super::{validate_source, ModeStrategy};
use crate::context::OrchestratorContext;
use crate::result::{Phase, PhaseDetail, PhaseResult};

const SBATCH_PROBE: &str = "command -v sbatch";

#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmStrategy;

impl SlurmStrategy {
    fn submission_host<'a>(ctx: &OrchestratorContext, target: &'a Target) -> HostSpec<'a> {
        let connection = target.connection.as_ref();
        HostSpec {
            label: connection
                .map(|c| c.host.clone())
                .unwrap_or_else(|| LOCAL_HOST.to_string()),
            connection,
            work_dir: target
                .work_dir
                .clone()
                .unwrap_or_else(|| ctx.src_dir.display().to_string()),
            in_place: connection.is_none() && target.work_dir.is_none(),
            gpu_config: &target.gpu_config,
            num_processes: target.num_processes,
            bootstrap: false,
        }
    }

    async fn ensure_sbatch(exec: &dyn CommandExecutor) -> JasmineResult<()> {
        if exec.run(SBATCH_PROBE, None).await?.success() {
            Ok(())
        } else {
            warn!(host = exec.host(), "sbatch is not installed");
            Err(JasmineError::missing_tool(exec.host(), "sbatch"))
        }
    }

    async fn init(
        ctx: &OrchestratorContext,
        target: &Target,
        host: &HostSpec<'_>,
        exec: &dyn CommandExecutor,
    ) -> JasmineResult<PhaseDetail> {
        Self::ensure_sbatch(exec).await?;
        if host.in_place {
            return Ok(PhaseDetail::Initialized {
                cloned: false,
                updated: false,
            });
        }
        host::init(ctx, target, host, exec).await
    }

    async fn submit(
        ctx: &OrchestratorContext,
        target: &Target,
        host: &HostSpec<'_>,
        exec: &dyn CommandExecutor,
    ) -> JasmineResult<PhaseDetail> {
        let launch = ctx.launch.as_ref().ok_or_else(|| {
            JasmineError::ConfigurationInconsistent(format!(
                "target '{}': no agent command to start",
                target.name
            ))
        })?;

        // GPUs inside a job come from the allocation, not from the login node
        let gpus = host.gpu_config.ids().map(<[String]>::to_vec).unwrap_or_default();
        let mut extra_env = target.env.clone();
        extra_env.extend(launch.env.clone());
        let batch = SlurmBatch {
            job_name: SlurmBatch::job_name_for(&target.name, &target.slurm_config),
            directives: target.slurm_config.clone(),
            work_dir: Some(host.work_dir.clone()),
            command: with_runner(target.command_runner.as_deref(), &launch.command),
            allocations: plan(&gpus, host.num_processes),
            extra_env,
        };

        check_cancelled(ctx, Phase::Start)?;
        let output = exec.run_checked(&batch.submit_command(), None).await?;
        let job_id = parse_job_id(&output.stdout)?;
        info!(
            target = %target.name,
            host = exec.host(),
            job_id = %job_id,
            job_name = %batch.job_name,
            "Submitted batch job"
        );
        Ok(PhaseDetail::Submitted {
            job_id,
            job_name: batch.job_name,
        })
    }

    async fn execute(
        ctx: &OrchestratorContext,
        target: &Target,
        host: &HostSpec<'_>,
        exec: &dyn CommandExecutor,
        phase: Phase,
        state: Option<&SyncState>,
    ) -> JasmineResult<PhaseDetail> {
        match phase {
            Phase::Init => Self::init(ctx, target, host, exec).await,
            Phase::Sync => host::sync(ctx, target, host, exec, require_state(state)?).await,
            Phase::Start => Self::submit(ctx, target, host, exec).await,
            Phase::Status => {
                let job_name = SlurmBatch::job_name_for(&target.name, &target.slurm_config);
                let output = exec.run_checked(&squeue_command(&job_name), None).await?;
                Ok(PhaseDetail::Jobs {
                    jobs: parse_squeue(&output.stdout),
                    job_name,
                })
            }
            Phase::Check => {
                Self::ensure_sbatch(exec).await?;
                Ok(PhaseDetail::Checked {
                    work_dir_present: work_dir_present(exec, &host.work_dir).await?,
                })
            }
            Phase::Up => {
                Self::init(ctx, target, host, exec).await?;
                host::sync(ctx, target, host, exec, require_state(state)?).await?;
                Self::submit(ctx, target, host, exec).await
            }
        }
    }
}

#[async_trait]
impl ModeStrategy for SlurmStrategy {
    fn mode(&self) -> Mode {
        Mode::Slurm
    }

    async fn run_phase(
        &self,
        ctx: &OrchestratorContext,
        target: &Target,
        phase: Phase,
    ) -> PhaseResult {
        let mut result = PhaseResult::new(target, phase);
        let host = Self::submission_host(ctx, target);

        let state = if phase.validates_source() {
            match validate_source(ctx, target).await {
                Ok(state) => Some(state),
                Err(err) => {
                    result.record_failure(host.label.clone(), &err);
                    return result;
                }
            }
        } else {
            None
        };

        let outcome = match check_cancelled(ctx, phase) {
            Err(err) => Err(err),
            Ok(()) => match host::open_executor(ctx, host.connection).await {
                Ok(exec) => {
                    let outcome =
                        Self::execute(ctx, target, &host, exec.as_ref(), phase, state.as_ref()).await;
                    host::release(exec, &host.label).await;
                    outcome
                }
                Err(err) => Err(err),
            },
        };
        result.record(host.label.clone(), outcome);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LaunchSpec;
    use jasmine_core::{ConnectionSpec, ErrorKind, GpuConfig};
    use jasmine_runtime::mock::{MockConnector, MockResponse};
    use std::sync::Arc;

    fn cluster() -> Target {
        let mut target = Target::new("cluster", Mode::Slurm);
        target.connection = Some(ConnectionSpec::new("login1"));
        target.work_dir = Some("~/project".to_string());
        target.repo_url = Some("git@github.com:org/project.git".to_string());
        target.slurm_config.insert("partition".to_string(), "gpu".to_string());
        target.num_processes = 2;
        target
    }

    fn context(connector: &MockConnector) -> OrchestratorContext {
        OrchestratorContext::new(Arc::new(connector.clone()), "/src/project").with_launch(
            LaunchSpec {
                command: "wandb agent org/proj/abc".to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_start_submits_batch() {
        let connector = MockConnector::new();
        let login = connector.executor("login1");
        login.respond("sbatch --parsable", MockResponse::ok("4242\n"));
        let mut target = cluster();
        target.gpu_config = GpuConfig::parse("0,1");

        let result = SlurmStrategy.start(&context(&connector), &target).await;
        assert!(result.is_success());
        assert_eq!(
            result.succeeded[0].detail,
            PhaseDetail::Submitted {
                job_id: "4242".to_string(),
                job_name: "jasmine-cluster".to_string(),
            }
        );
        let submitted = login.commands_matching("sbatch --parsable");
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].contains("#SBATCH --partition=gpu"));
        assert!(submitted[0].contains("cd ~/project || exit 1"));
        assert!(submitted[0].contains("export CUDA_VISIBLE_DEVICES=1"));
        assert!(login.commands_matching("tmux").is_empty());
    }

    #[tokio::test]
    async fn test_auto_gpus_leave_visibility_to_scheduler() {
        let connector = MockConnector::new();
        let login = connector.executor("login1");
        login.respond("sbatch --parsable", MockResponse::ok("7;cluster\n"));

        let result = SlurmStrategy.start(&context(&connector), &cluster()).await;
        assert!(result.is_success());
        let submitted = login.commands_matching("sbatch --parsable");
        assert!(!submitted[0].contains("CUDA_VISIBLE_DEVICES"));
        assert!(login.commands_matching("nvidia-smi").is_empty());
    }

    #[tokio::test]
    async fn test_init_without_sbatch() {
        let connector = MockConnector::new();
        let login = connector.executor("login1");
        login.respond(SBATCH_PROBE, MockResponse::fail(1, ""));

        let result = SlurmStrategy.init(&context(&connector), &cluster()).await;
        assert!(result.is_fatal());
        assert_eq!(result.failed[0].kind, ErrorKind::EnvironmentMissing);
        assert_eq!(login.commands(), vec![SBATCH_PROBE]);
    }

    #[tokio::test]
    async fn test_status_lists_jobs() {
        let connector = MockConnector::new();
        let login = connector.executor("login1");
        login.respond("squeue", MockResponse::ok("4242 RUNNING\n4243 PENDING\n"));

        let result = SlurmStrategy.status(&context(&connector), &cluster()).await;
        match &result.succeeded[0].detail {
            PhaseDetail::Jobs { job_name, jobs } => {
                assert_eq!(job_name, "jasmine-cluster");
                assert_eq!(jobs.len(), 2);
                assert_eq!(jobs[1].state, "PENDING");
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_submission_without_host() {
        let connector = MockConnector::new();
        let local = connector.local_executor();
        local.respond("sbatch --parsable", MockResponse::ok("11\n"));
        let mut target = Target::new("cluster", Mode::Slurm);
        target.num_processes = 1;

        let result = SlurmStrategy.start(&context(&connector), &target).await;
        assert_eq!(result.succeeded_hosts(), vec![LOCAL_HOST]);
        assert!(connector.connect_attempts().is_empty());
        assert!(local.commands_matching("cd /src/project").len() == 1);
    }
}
