//! Durable session identity and status

use serde::{Deserialize, Serialize};

/// Prefix shared by every session the engine creates
pub const SESSION_PREFIX: &str = "jasmine";

/// Observed state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "exit_code")]
pub enum SessionStatus {
    NotFound,
    Running,
    Exited(i32),
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::NotFound => write!(f, "NotFound"),
            SessionStatus::Running => write!(f, "Running"),
            SessionStatus::Exited(code) => write!(f, "Exited({})", code),
        }
    }
}

/// What `start` does when the deterministic session name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Refuse to touch a running session
    #[default]
    Reject,
    /// Keep the running session and report it as started
    Reuse,
    /// Kill the running session and launch a fresh one
    Restart,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(ConflictPolicy::Reject),
            "reuse" => Ok(ConflictPolicy::Reuse),
            "restart" => Ok(ConflictPolicy::Restart),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

/// A named execution context keyed by (target, process index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub target: String,
    pub process_index: u32,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(target: &str, process_index: u32, status: SessionStatus) -> Self {
        Self {
            name: session_name(target, process_index),
            target: target.to_string(),
            process_index,
            status,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }
}

/// Deterministic session name: `jasmine-{target}-{index}`
///
/// tmux treats `.` and `:` as target separators, so they are replaced.
pub fn session_name(target: &str, process_index: u32) -> String {
    let safe: String = target
        .chars()
        .map(|c| match c {
            '.' | ':' | ' ' | '\'' | '"' => '_',
            other => other,
        })
        .collect();
    format!("{}-{}-{}", SESSION_PREFIX, safe, process_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name_is_deterministic() {
        assert_eq!(session_name("bunny", 0), "jasmine-bunny-0");
        assert_eq!(session_name("bunny", 0), session_name("bunny", 0));
        assert_ne!(session_name("bunny", 0), session_name("bunny", 1));
    }

    #[test]
    fn test_session_name_sanitizes_separators() {
        assert_eq!(session_name("gpu.lab:1", 2), "jasmine-gpu_lab_1-2");
    }

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("reuse".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Reuse);
        assert_eq!("RESTART".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Restart);
        assert!("clobber".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Reject);
    }

    #[test]
    fn test_session_status_display() {
        assert_eq!(SessionStatus::Exited(3).to_string(), "Exited(3)");
        let session = Session::new("bunny", 1, SessionStatus::Running);
        assert!(session.is_running());
        assert_eq!(session.name, "jasmine-bunny-1");
    }
}
