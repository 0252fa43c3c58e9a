//! jasmine-sync: Bringing a target's source and data to a known state
//!
//! Validation runs against the local repository and short-circuits on the
//! first failure. Application runs on the target host, one command at a time,
//! checking for cancellation between commands.

pub mod engine;
pub mod repo;

pub use engine::{SyncDestination, SyncEngine, SyncPhase, SyncState};
pub use repo::{is_data_cache_clean, normalize_repo_url};
