//! jasmine-session: Durable agent sessions
//!
//! Agents run inside tmux sessions named `jasmine-{target}-{index}` so they
//! outlive the control channel that started them. Sessions are only ever
//! killed when `start` replaces an exited session or the restart policy
//! asks for it.

pub mod supervisor;
pub mod tmux;

pub use supervisor::{Launch, SessionSupervisor};
