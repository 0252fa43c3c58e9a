//! Target coordinator

use jasmine_core::Target;
use tracing::{error, info, warn};

use crate::context::OrchestratorContext;
use crate::result::{Phase, PhaseResult};
use crate::strategy::strategy_for;

/// Runs lifecycle phases against configured targets
pub struct Coordinator {
    ctx: OrchestratorContext,
}

impl Coordinator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self { ctx }
    }

    /// Run `phase` on `target`
    ///
    /// An inconsistent target is reported as a failure before any host is
    /// contacted.
    pub async fn run(&self, target: &Target, phase: Phase) -> PhaseResult {
        if let Err(err) = target.validate() {
            let mut result = PhaseResult::new(target, phase);
            result.record_failure(target.name.clone(), &err);
            return result;
        }

        let strategy = strategy_for(target.mode);
        info!(
            target = %target.name,
            mode = %strategy.mode(),
            phase = %phase,
            "Running phase"
        );
        let result = strategy.run_phase(&self.ctx, target, phase).await;

        if result.is_success() {
            info!(
                target = %target.name,
                phase = %phase,
                hosts = result.succeeded.len(),
                "Phase complete"
            );
        } else if result.is_fatal() {
            error!(
                target = %target.name,
                phase = %phase,
                failed = ?result.failed_hosts(),
                "Phase failed on every host"
            );
        } else {
            warn!(
                target = %target.name,
                phase = %phase,
                succeeded = ?result.succeeded_hosts(),
                failed = ?result.failed_hosts(),
                "Phase partially complete"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jasmine_core::{ConnectionSpec, ErrorKind, Mode};
    use jasmine_runtime::mock::MockConnector;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_inconsistent_target_never_connects() {
        let connector = MockConnector::new();
        let coordinator = Coordinator::new(OrchestratorContext::new(
            Arc::new(connector.clone()),
            "/src/project",
        ));
        let target = Target::new("broken", Mode::RemoteSsh);

        let result = coordinator.run(&target, Phase::Init).await;
        assert!(result.is_fatal());
        assert_eq!(result.failed[0].kind, ErrorKind::ConfigurationInconsistent);
        assert!(connector.connect_attempts().is_empty());
        assert!(connector.local_executor().commands().is_empty());
    }

    #[tokio::test]
    async fn test_slurm_login_host_without_work_dir_is_rejected() {
        let connector = MockConnector::new();
        let coordinator = Coordinator::new(OrchestratorContext::new(
            Arc::new(connector.clone()),
            "/home/alice/laptop-checkout",
        ));
        let mut target = Target::new("cluster", Mode::Slurm);
        target.connection = Some(ConnectionSpec::new("login1"));

        let result = coordinator.run(&target, Phase::Start).await;
        assert!(result.is_fatal());
        assert_eq!(result.failed[0].kind, ErrorKind::ConfigurationInconsistent);
        assert!(connector.connect_attempts().is_empty());
    }
}
