//! jasmine-orchestrator: Target orchestration
//!
//! This crate composes the executor, planner, sync engine and session
//! supervisor into per-mode lifecycles:
//! - Mode strategies for local, remote SSH, Slurm and GPU-fleet targets
//! - The coordinator that resolves a target's strategy and runs a phase
//! - Per-host phase results with fleet failover

pub mod context;
pub mod coordinator;
pub mod result;
pub mod strategy;

pub use context::{AlwaysConfirm, Confirm, LaunchSpec, OrchestratorContext};
pub use coordinator::Coordinator;
pub use result::{HostError, HostFailure, HostOutcome, Phase, PhaseDetail, PhaseResult};
pub use strategy::{strategy_for, ModeStrategy};
