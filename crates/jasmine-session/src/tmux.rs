//! tmux command builder and output parser
//!
//! Builds command strings only; the caller runs them through an executor.

use jasmine_core::SessionStatus;
use jasmine_runtime::shell::{quote, quote_dir};

/// Exits 0 when tmux is installed
pub const PROBE: &str = "command -v tmux";

/// `tmux has-session -t =<name>` (exact match)
pub fn has_session(name: &str) -> String {
    format!("tmux has-session -t {}", quote(&format!("={}", name)))
}

/// Pane liveness and exit status for every pane of a session
pub fn pane_status(name: &str) -> String {
    format!(
        "tmux list-panes -s -t {} -F '#{{pane_dead}} #{{pane_dead_status}}'",
        quote(&format!("={}", name))
    )
}

/// Create a detached session that keeps its pane after the command exits,
/// then replace the pane's shell with `command`
pub fn create_session(name: &str, cwd: Option<&str>, command: &str) -> String {
    let mut new_session = format!("tmux new-session -d -s {}", quote(name));
    if let Some(dir) = cwd {
        new_session.push_str(&format!(" -c {}", quote_dir(dir)));
    }
    [
        new_session,
        format!("tmux set-option -t {} remain-on-exit on", quote(name)),
        format!("tmux respawn-pane -k -t {} {}", quote(name), quote(command)),
    ]
    .join(" && ")
}

/// `tmux kill-session -t =<name>`
pub fn kill_session(name: &str) -> String {
    format!("tmux kill-session -t {}", quote(&format!("={}", name)))
}

/// `tmux attach-session -t <name>`
pub fn attach_session(name: &str) -> String {
    format!("tmux attach-session -t {}", quote(name))
}

/// Interpret `pane_status` output
///
/// A live pane wins over dead ones. With only dead panes the first exit
/// status is reported. No panes means the session is gone.
pub fn parse_pane_status(output: &str) -> SessionStatus {
    let mut exited = None;
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("0") => return SessionStatus::Running,
            Some("1") => {
                if exited.is_none() {
                    let code = parts.next().and_then(|c| c.parse().ok()).unwrap_or(-1);
                    exited = Some(SessionStatus::Exited(code));
                }
            }
            _ => {}
        }
    }
    exited.unwrap_or(SessionStatus::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(has_session("jasmine-a-0"), "tmux has-session -t =jasmine-a-0");
        assert_eq!(kill_session("jasmine-a-0"), "tmux kill-session -t =jasmine-a-0");
        assert_eq!(attach_session("jasmine-a-0"), "tmux attach-session -t jasmine-a-0");
        assert_eq!(
            pane_status("jasmine-a-0"),
            "tmux list-panes -s -t =jasmine-a-0 -F '#{pane_dead} #{pane_dead_status}'"
        );
    }

    #[test]
    fn test_create_session() {
        let cmd = create_session("jasmine-a-0", Some("~/src/project"), "wandb agent x/y/z");
        assert_eq!(
            cmd,
            "tmux new-session -d -s jasmine-a-0 -c ~/src/project && \
             tmux set-option -t jasmine-a-0 remain-on-exit on && \
             tmux respawn-pane -k -t jasmine-a-0 'wandb agent x/y/z'"
        );
    }

    #[test]
    fn test_parse_pane_status() {
        assert_eq!(parse_pane_status("0 \n"), SessionStatus::Running);
        assert_eq!(parse_pane_status("1 2\n"), SessionStatus::Exited(2));
        assert_eq!(parse_pane_status("1 0\n0 \n"), SessionStatus::Running);
        assert_eq!(parse_pane_status(""), SessionStatus::NotFound);
    }
}
