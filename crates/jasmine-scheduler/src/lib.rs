//! jasmine-scheduler: Resource planning for sweep agents
//!
//! This crate decides where agent processes run:
//! - GPU allocation across worker processes
//! - GPU discovery on a host
//! - Slurm batch script rendering and queue parsing

pub mod detect;
pub mod planner;
pub mod slurm;

pub use detect::resolve_gpus;
pub use planner::{plan, Allocation, CUDA_VISIBLE_DEVICES, PROCESS_INDEX_VAR};
pub use slurm::{SlurmBatch, SlurmJob};
