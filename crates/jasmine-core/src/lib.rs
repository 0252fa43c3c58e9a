//! jasmine-core: Core types for the jasmine sweep orchestrator
//!
//! This crate provides the fundamental types used throughout jasmine:
//! - Target, server and connection descriptions
//! - Session identity and status
//! - Configuration types
//! - Error handling
//! - GPU selection parsing

pub mod config;
pub mod error;
pub mod gpu;
pub mod session;
pub mod target;

pub use config::*;
pub use error::*;
pub use gpu::*;
pub use session::*;
pub use target::*;
