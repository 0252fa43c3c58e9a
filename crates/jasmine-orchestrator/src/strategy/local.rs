use async_trait::async_trait;
use jasmine_core::{Mode, Target};
use jasmine_runtime::local::LOCAL_HOST;

use super::{drive_hosts, HostSpec, ModeStrategy};
use crate::context::OrchestratorContext;
use crate::result::{Phase, PhaseResult};

/// Sessions on this machine
///
/// Without a `work_dir` the source checkout is used in place and sync only
/// validates it and wires the data cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStrategy;

impl LocalStrategy {
    fn host<'a>(ctx: &OrchestratorContext, target: &'a Target) -> HostSpec<'a> {
        HostSpec {
            label: LOCAL_HOST.to_string(),
            connection: None,
            work_dir: target
                .work_dir
                .clone()
                .unwrap_or_else(|| ctx.src_dir.display().to_string()),
            in_place: target.work_dir.is_none(),
            gpu_config: &target.gpu_config,
            num_processes: target.num_processes,
            bootstrap: false,
        }
    }
}

#[async_trait]
impl ModeStrategy for LocalStrategy {
    fn mode(&self) -> Mode {
        Mode::Local
    }

    async fn run_phase(
        &self,
        ctx: &OrchestratorContext,
        target: &Target,
        phase: Phase,
    ) -> PhaseResult {
        let hosts = [Self::host(ctx, target)];
        drive_hosts(ctx, target, &hosts, phase, 1).await
    }
}
