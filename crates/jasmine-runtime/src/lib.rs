//! jasmine-runtime: Command execution layer
//!
//! This crate provides the executors every other component runs commands through:
//! - Local process spawning (`sh -c`)
//! - SSH control channels multiplexed over one ControlMaster socket
//! - Recording test doubles for both

pub mod connector;
pub mod execution;
pub mod local;
pub mod mock;
pub mod shell;
pub mod ssh;
pub mod traits;

pub use connector::{Connector, SshConnector};
pub use execution::{CommandOutput, Execution, OutputChunk};
pub use local::LocalExecutor;
pub use ssh::{SshExecutor, SshOptions};
pub use traits::CommandExecutor;
