use async_trait::async_trait;
use jasmine_core::{Mode, Target};

use super::{drive_hosts, HostSpec, ModeStrategy};
use crate::context::OrchestratorContext;
use crate::result::{Phase, PhaseResult};

/// Several GPU servers, each handled independently
///
/// A server that cannot be reached or lacks a tool is recorded as failed
/// and the others carry on. Results follow the configured server order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetStrategy;

#[async_trait]
impl ModeStrategy for FleetStrategy {
    fn mode(&self) -> Mode {
        Mode::RemoteGpuFleet
    }

    async fn run_phase(
        &self,
        ctx: &OrchestratorContext,
        target: &Target,
        phase: Phase,
    ) -> PhaseResult {
        let hosts: Vec<HostSpec<'_>> = target
            .servers
            .iter()
            .map(|server| HostSpec {
                label: server.name.clone(),
                connection: Some(&server.connection),
                work_dir: server.work_dir.clone(),
                in_place: false,
                gpu_config: &server.gpu_config,
                num_processes: server.num_processes,
                bootstrap: true,
            })
            .collect();
        drive_hosts(ctx, target, &hosts, phase, ctx.max_parallel_servers).await
    }
}
