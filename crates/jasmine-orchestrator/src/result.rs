//! Phase results aggregated per host

use jasmine_core::{ErrorKind, JasmineError, Mode, Session, Target};
use jasmine_scheduler::SlurmJob;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Lifecycle phase requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Sync,
    Start,
    Status,
    /// Connectivity and work-dir check
    Check,
    /// Init, sync and start in sequence
    Up,
}

impl Phase {
    /// Phases that validate the local repository before touching any host
    pub fn validates_source(&self) -> bool {
        matches!(self, Phase::Sync | Phase::Up)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Sync => "sync",
            Phase::Start => "start",
            Phase::Status => "status",
            Phase::Check => "check",
            Phase::Up => "up",
        };
        write!(f, "{}", s)
    }
}

/// What a successful phase produced on one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseDetail {
    Initialized { cloned: bool, updated: bool },
    Synced { branch: String },
    Started { sessions: Vec<Session> },
    Status { sessions: Vec<Session> },
    Checked { work_dir_present: bool },
    Up { branch: String, sessions: Vec<Session> },
    Submitted { job_id: String, job_name: String },
    Jobs { job_name: String, jobs: Vec<SlurmJob> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub host: String,
    pub detail: PhaseDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostFailure {
    pub host: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Failing external command, when one is known
    pub command: Option<String>,
    /// Host-level failure that a fleet skips past
    pub failover: bool,
    /// Sessions created before the failure, still running
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub live_sessions: Vec<Session>,
}

/// A failed host phase and the sessions it left running
#[derive(Debug)]
pub struct HostError {
    pub error: JasmineError,
    pub live_sessions: Vec<Session>,
}

impl From<JasmineError> for HostError {
    fn from(error: JasmineError) -> Self {
        Self {
            error,
            live_sessions: Vec::new(),
        }
    }
}

impl HostFailure {
    pub fn from_error(host: impl Into<String>, err: &JasmineError) -> Self {
        let command = match err {
            JasmineError::CommandFailed { command, .. } | JasmineError::Timeout { command, .. } => {
                Some(command.clone())
            }
            _ => None,
        };
        Self {
            host: host.into(),
            kind: err.kind(),
            message: err.to_string(),
            command,
            failover: err.is_failover_eligible(),
            live_sessions: Vec::new(),
        }
    }
}

/// Outcome of one phase on one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub target: String,
    pub mode: Mode,
    pub phase: Phase,
    pub succeeded: Vec<HostOutcome>,
    pub failed: Vec<HostFailure>,
}

impl PhaseResult {
    pub fn new(target: &Target, phase: Phase) -> Self {
        Self {
            target: target.name.clone(),
            mode: target.mode,
            phase,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Record one host's outcome
    pub fn record<E: Into<HostError>>(
        &mut self,
        host: impl Into<String>,
        outcome: Result<PhaseDetail, E>,
    ) {
        match outcome {
            Ok(detail) => self.succeeded.push(HostOutcome {
                host: host.into(),
                detail,
            }),
            Err(err) => {
                let HostError {
                    error,
                    live_sessions,
                } = err.into();
                let mut failure = HostFailure::from_error(host, &error);
                failure.live_sessions = live_sessions;
                self.push_failure(failure);
            }
        }
    }

    pub fn record_failure(&mut self, host: impl Into<String>, err: &JasmineError) {
        self.push_failure(HostFailure::from_error(host, err));
    }

    fn push_failure(&mut self, failure: HostFailure) {
        let live: Vec<&str> = failure.live_sessions.iter().map(|s| s.name.as_str()).collect();
        if failure.failover {
            warn!(
                target = %self.target,
                phase = %self.phase,
                host = %failure.host,
                error = %failure.message,
                "Host unavailable, continuing without it"
            );
        } else {
            error!(
                target = %self.target,
                phase = %self.phase,
                host = %failure.host,
                error = %failure.message,
                "Phase failed on host"
            );
        }
        if !live.is_empty() {
            warn!(
                target = %self.target,
                host = %failure.host,
                sessions = ?live,
                "Sessions left running after the failure"
            );
        }
        self.failed.push(failure);
    }

    /// Nothing failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Nothing succeeded
    pub fn is_fatal(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn succeeded_hosts(&self) -> Vec<&str> {
        self.succeeded.iter().map(|o| o.host.as_str()).collect()
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.host.as_str()).collect()
    }
}
