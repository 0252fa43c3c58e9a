//! Capabilities and settings shared by every strategy

use async_trait::async_trait;
use jasmine_runtime::Connector;
use jasmine_session::SessionSupervisor;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Yes/no question asked before optional work (the init update pass)
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every question the same way
#[derive(Debug, Clone, Copy)]
pub struct AlwaysConfirm(pub bool);

#[async_trait]
impl Confirm for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// The agent to launch, as supplied by the experiment-tracking side
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Opaque agent command, e.g. `wandb agent org/project/sweep`
    pub command: String,
    /// Variables exported into every session after the target's own env
    pub env: BTreeMap<String, String>,
}

/// Everything a strategy needs besides the target itself
#[derive(Clone)]
pub struct OrchestratorContext {
    pub connector: Arc<dyn Connector>,
    pub supervisor: SessionSupervisor,
    pub confirm: Arc<dyn Confirm>,
    pub cancel: CancellationToken,
    /// Local source repository
    pub src_dir: PathBuf,
    pub launch: Option<LaunchSpec>,
    /// Fleet servers processed at once
    pub max_parallel_servers: usize,
}

impl OrchestratorContext {
    pub fn new(connector: Arc<dyn Connector>, src_dir: impl Into<PathBuf>) -> Self {
        Self {
            connector,
            supervisor: SessionSupervisor::default(),
            confirm: Arc::new(AlwaysConfirm(false)),
            cancel: CancellationToken::new(),
            src_dir: src_dir.into(),
            launch: None,
            max_parallel_servers: 4,
        }
    }

    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_launch(mut self, launch: LaunchSpec) -> Self {
        self.launch = Some(launch);
        self
    }

    pub fn with_max_parallel_servers(mut self, max: usize) -> Self {
        self.max_parallel_servers = max.max(1);
        self
    }
}
