//! Per-mode lifecycle strategies
//!
//! Each execution mode implements `ModeStrategy`. The coordinator picks one
//! with `strategy_for` and never branches on the mode itself.

mod fleet;
mod host;
mod local;
mod remote;
mod slurm;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use jasmine_core::{JasmineResult, Mode, Target};
use jasmine_sync::{SyncEngine, SyncState};
use tracing::debug;

use crate::context::OrchestratorContext;
use crate::result::{HostError, Phase, PhaseDetail, PhaseResult};

pub use fleet::FleetStrategy;
pub use host::HostSpec;
pub use local::LocalStrategy;
pub use remote::RemoteStrategy;
pub use slurm::SlurmStrategy;

/// Lifecycle operations for one execution mode
#[async_trait]
pub trait ModeStrategy: Send + Sync {
    fn mode(&self) -> Mode;

    /// Run `phase` on every host the target names
    async fn run_phase(
        &self,
        ctx: &OrchestratorContext,
        target: &Target,
        phase: Phase,
    ) -> PhaseResult;

    async fn init(&self, ctx: &OrchestratorContext, target: &Target) -> PhaseResult {
        self.run_phase(ctx, target, Phase::Init).await
    }

    async fn sync(&self, ctx: &OrchestratorContext, target: &Target) -> PhaseResult {
        self.run_phase(ctx, target, Phase::Sync).await
    }

    async fn start(&self, ctx: &OrchestratorContext, target: &Target) -> PhaseResult {
        self.run_phase(ctx, target, Phase::Start).await
    }

    async fn status(&self, ctx: &OrchestratorContext, target: &Target) -> PhaseResult {
        self.run_phase(ctx, target, Phase::Status).await
    }

    async fn check(&self, ctx: &OrchestratorContext, target: &Target) -> PhaseResult {
        self.run_phase(ctx, target, Phase::Check).await
    }

    async fn up(&self, ctx: &OrchestratorContext, target: &Target) -> PhaseResult {
        self.run_phase(ctx, target, Phase::Up).await
    }
}

/// Strategy implementing `mode`
pub fn strategy_for(mode: Mode) -> Box<dyn ModeStrategy> {
    match mode {
        Mode::Local => Box::new(LocalStrategy),
        Mode::RemoteSsh => Box::new(RemoteStrategy),
        Mode::Slurm => Box::new(SlurmStrategy),
        Mode::RemoteGpuFleet => Box::new(FleetStrategy),
    }
}

/// Validate the local repository once for the whole target
pub(crate) async fn validate_source(
    ctx: &OrchestratorContext,
    target: &Target,
) -> JasmineResult<SyncState> {
    let local = ctx.connector.local();
    let mut engine = SyncEngine::new(target, ctx.src_dir.clone(), ctx.cancel.clone());
    engine.validate(local.as_ref()).await
}

/// Run `phase` on each host, at most `parallelism` at a time
///
/// Results keep the order of `hosts`. A host failure is recorded and the
/// remaining hosts still run. When the phase needs a validated source and
/// validation fails, every host is marked failed without being contacted.
pub(crate) async fn drive_hosts(
    ctx: &OrchestratorContext,
    target: &Target,
    hosts: &[HostSpec<'_>],
    phase: Phase,
    parallelism: usize,
) -> PhaseResult {
    let mut result = PhaseResult::new(target, phase);

    let state = if phase.validates_source() {
        match validate_source(ctx, target).await {
            Ok(state) => Some(state),
            Err(err) => {
                for host in hosts {
                    result.record_failure(host.label.clone(), &err);
                }
                return result;
            }
        }
    } else {
        None
    };
    let state = state.as_ref();

    debug!(
        target = %target.name,
        phase = %phase,
        hosts = hosts.len(),
        parallelism = parallelism,
        "Dispatching phase"
    );
    let pending: Vec<_> = hosts
        .iter()
        .map(|spec| labeled(ctx, target, spec, phase, state))
        .collect();
    let outcomes: Vec<_> = stream::iter(pending)
        .buffered(parallelism.max(1))
        .collect()
        .await;

    for (label, outcome) in outcomes {
        result.record(label, outcome);
    }
    result
}

async fn labeled(
    ctx: &OrchestratorContext,
    target: &Target,
    spec: &HostSpec<'_>,
    phase: Phase,
    state: Option<&SyncState>,
) -> (String, Result<PhaseDetail, HostError>) {
    let outcome = host::run_on_host(ctx, target, spec, phase, state).await;
    (spec.label.clone(), outcome)
}
