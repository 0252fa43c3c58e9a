//! Error types for jasmine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the sync engine refused to touch a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Local `origin` does not point at the target's repository
    RemoteUrlMismatch { local: String, expected: String },
    /// The local repository has no `origin` remote at all
    MissingRemoteUrl,
    /// Staged or unstaged changes in the source tree
    DirtyWorkingTree,
    /// The data-cache tool reports untracked or modified data
    DirtyDataCache,
}

impl RejectReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::RemoteUrlMismatch { .. } => "remote-url-mismatch",
            RejectReason::MissingRemoteUrl => "missing-remote-url",
            RejectReason::DirtyWorkingTree => "dirty-working-tree",
            RejectReason::DirtyDataCache => "dirty-data-cache",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::RemoteUrlMismatch { local, expected } => write!(
                f,
                "{} (local origin '{}', target expects '{}')",
                self.code(),
                local,
                expected
            ),
            _ => write!(f, "{}", self.code()),
        }
    }
}

/// Coarse classification used when aggregating phase results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    ValidationRejected,
    CommandFailed,
    EnvironmentMissing,
    ConfigurationInconsistent,
    SessionConflict,
    Cancelled,
    Timeout,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::ValidationRejected => "validation-rejected",
            ErrorKind::CommandFailed => "command-failed",
            ErrorKind::EnvironmentMissing => "environment-missing",
            ErrorKind::ConfigurationInconsistent => "configuration-inconsistent",
            ErrorKind::SessionConflict => "session-conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Main error type for jasmine
#[derive(Error, Debug)]
pub enum JasmineError {
    /// Control channel could not be opened or was lost
    #[error("Connection error on {host}: {reason}")]
    Connection { host: String, reason: String },

    /// Repository state check refused the target
    #[error("Validation rejected: {reason}")]
    ValidationRejected { reason: RejectReason },

    /// An external tool returned a non-zero status
    #[error("Command failed with exit code {exit_code}: {command}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A required external tool is not installed on the host
    #[error("Required tool '{tool}' is missing on {host}")]
    EnvironmentMissing { host: String, tool: String },

    /// Mutually exclusive or missing target fields
    #[error("Inconsistent configuration: {0}")]
    ConfigurationInconsistent(String),

    /// A live session already holds the deterministic name
    #[error("Session '{session}' is already running")]
    SessionConflict { session: String },

    /// Cancellation was requested between two commands
    #[error("Cancelled during {phase}")]
    Cancelled { phase: String },

    /// A single command exceeded the configured timeout
    #[error("Command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" ({})", trimmed)
    }
}

/// Result type for jasmine operations
pub type JasmineResult<T> = Result<T, JasmineError>;

impl JasmineError {
    pub fn connection(host: impl Into<String>, reason: impl Into<String>) -> Self {
        JasmineError::Connection {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_tool(host: impl Into<String>, tool: impl Into<String>) -> Self {
        JasmineError::EnvironmentMissing {
            host: host.into(),
            tool: tool.into(),
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        JasmineError::ValidationRejected { reason }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JasmineError::Connection { .. } => ErrorKind::Connection,
            JasmineError::ValidationRejected { .. } => ErrorKind::ValidationRejected,
            JasmineError::CommandFailed { .. } => ErrorKind::CommandFailed,
            JasmineError::EnvironmentMissing { .. } => ErrorKind::EnvironmentMissing,
            JasmineError::ConfigurationInconsistent(_) | JasmineError::Config(_) => {
                ErrorKind::ConfigurationInconsistent
            }
            JasmineError::SessionConflict { .. } => ErrorKind::SessionConflict,
            JasmineError::Cancelled { .. } => ErrorKind::Cancelled,
            JasmineError::Timeout { .. } => ErrorKind::Timeout,
            JasmineError::Io(_) | JasmineError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Host-level failures that let a fleet move on to the next server
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            JasmineError::Connection { .. } | JasmineError::EnvironmentMissing { .. }
        )
    }
}

impl From<serde_json::Error> for JasmineError {
    fn from(err: serde_json::Error) -> Self {
        JasmineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for JasmineError {
    fn from(err: toml::de::Error) -> Self {
        JasmineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JasmineError::Config("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: JasmineError = io_err.into();
        assert!(matches!(err, JasmineError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_command_failed_display_includes_stderr() {
        let err = JasmineError::CommandFailed {
            command: "git fetch --all".to_string(),
            exit_code: 128,
            stderr: "fatal: not a git repository\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command failed with exit code 128: git fetch --all (fatal: not a git repository)"
        );

        let quiet = JasmineError::CommandFailed {
            command: "false".to_string(),
            exit_code: 1,
            stderr: String::new(),
        };
        assert_eq!(quiet.to_string(), "Command failed with exit code 1: false");
    }

    #[test]
    fn test_reject_reason_codes() {
        assert_eq!(RejectReason::DirtyWorkingTree.to_string(), "dirty-working-tree");
        assert_eq!(RejectReason::DirtyDataCache.code(), "dirty-data-cache");
        let mismatch = RejectReason::RemoteUrlMismatch {
            local: "github.com/a/b".to_string(),
            expected: "github.com/c/d".to_string(),
        };
        assert!(mismatch.to_string().starts_with("remote-url-mismatch"));
    }

    #[test]
    fn test_failover_eligibility() {
        assert!(JasmineError::connection("gpu1", "timeout").is_failover_eligible());
        assert!(JasmineError::missing_tool("gpu1", "tmux").is_failover_eligible());
        assert!(!JasmineError::rejected(RejectReason::DirtyWorkingTree).is_failover_eligible());
        assert!(!JasmineError::SessionConflict {
            session: "jasmine-a-0".to_string()
        }
        .is_failover_eligible());
    }
}
