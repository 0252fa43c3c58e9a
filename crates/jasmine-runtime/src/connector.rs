//! Opening executors for hosts

use async_trait::async_trait;
use jasmine_core::{ConnectionSpec, JasmineResult};

use crate::local::LocalExecutor;
use crate::ssh::{SshExecutor, SshOptions};
use crate::traits::CommandExecutor;

/// Factory for command executors
///
/// Strategies receive a connector instead of opening channels themselves,
/// so tests can substitute recording executors for real hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open an exclusively owned control channel to a remote host
    async fn connect(&self, spec: &ConnectionSpec) -> JasmineResult<Box<dyn CommandExecutor>>;

    /// Executor for this machine
    fn local(&self) -> Box<dyn CommandExecutor>;
}

/// Production connector: OpenSSH for remote hosts, `sh` locally
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> JasmineResult<Box<dyn CommandExecutor>> {
        let executor = SshExecutor::connect(spec, self.options.clone()).await?;
        Ok(Box::new(executor))
    }

    fn local(&self) -> Box<dyn CommandExecutor> {
        Box::new(LocalExecutor::new().with_timeout(self.options.command_timeout))
    }
}
