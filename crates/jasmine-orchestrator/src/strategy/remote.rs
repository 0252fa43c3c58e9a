use async_trait::async_trait;
use jasmine_core::{JasmineError, Mode, Target};

use super::{drive_hosts, HostSpec, ModeStrategy};
use crate::context::OrchestratorContext;
use crate::result::{Phase, PhaseResult};

/// One remote host reached over SSH
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteStrategy;

#[async_trait]
impl ModeStrategy for RemoteStrategy {
    fn mode(&self) -> Mode {
        Mode::RemoteSsh
    }

    async fn run_phase(
        &self,
        ctx: &OrchestratorContext,
        target: &Target,
        phase: Phase,
    ) -> PhaseResult {
        let (Some(connection), Some(work_dir)) = (target.connection.as_ref(), target.work_dir.as_ref())
        else {
            let mut result = PhaseResult::new(target, phase);
            result.record_failure(
                target.name.clone(),
                &JasmineError::ConfigurationInconsistent(format!(
                    "target '{}': remote_ssh requires host and work_dir",
                    target.name
                )),
            );
            return result;
        };

        let hosts = [HostSpec {
            label: connection.host.clone(),
            connection: Some(connection),
            work_dir: work_dir.clone(),
            in_place: false,
            gpu_config: &target.gpu_config,
            num_processes: target.num_processes,
            bootstrap: true,
        }];
        drive_hosts(ctx, target, &hosts, phase, 1).await
    }
}
