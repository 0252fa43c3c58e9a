//! CLI commands implementation

use anyhow::{bail, Result};
use async_trait::async_trait;
use jasmine_core::{JasmineConfig, Target, TrackingConfig};
use jasmine_orchestrator::{Confirm, PhaseDetail, PhaseResult};
use jasmine_session::SessionSupervisor;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

/// Asks on the terminal, answering no when nobody replies in time
///
/// Lines are read on a plain thread so a pending read never holds up
/// runtime shutdown. Prompts are asked one at a time.
pub struct StdinConfirm {
    timeout: Duration,
    answers: Mutex<Answers>,
}

struct Answers {
    lines: mpsc::UnboundedReceiver<String>,
    /// The previous prompt gave up waiting
    timed_out: bool,
}

impl StdinConfirm {
    pub fn new(timeout: Duration) -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()), timeout)
    }

    fn from_reader<R: BufRead + Send + 'static>(reader: R, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            timeout,
            answers: Mutex::new(Answers {
                lines: rx,
                timed_out: false,
            }),
        }
    }
}

impl Default for StdinConfirm {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        let mut answers = self.answers.lock().await;
        // A reply typed after the last prompt gave up answers nothing
        if answers.timed_out {
            while answers.lines.try_recv().is_ok() {}
        }

        let mut stderr = tokio::io::stderr();
        let question = format!("{} [y/N] ", prompt);
        if stderr.write_all(question.as_bytes()).await.is_err() {
            return false;
        }
        let _ = stderr.flush().await;

        match tokio::time::timeout(self.timeout, answers.lines.recv()).await {
            Ok(Some(line)) => {
                answers.timed_out = false;
                is_yes(&line)
            }
            Ok(None) => false,
            Err(_) => {
                answers.timed_out = true;
                let _ = stderr.write_all(b"\n").await;
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Agent command from the flags, or from the sweep file
///
/// The sweep file may hold a full agent command or a bare sweep id.
pub fn resolve_agent_command(
    sweep_id: Option<&str>,
    command: Option<&str>,
    agent_command: &str,
    sweep_file: &Path,
) -> Result<String> {
    if let Some(command) = command {
        return Ok(command.to_string());
    }
    if let Some(id) = sweep_id {
        return Ok(format!("{} {}", agent_command, id.trim()));
    }

    let content = match std::fs::read_to_string(sweep_file) {
        Ok(content) => content,
        Err(e) => bail!(
            "pass --sweep-id or --command, or create {} ({})",
            sweep_file.display(),
            e
        ),
    };
    if let Some(line) = content.lines().find(|l| l.contains(agent_command)) {
        return Ok(line.trim().to_string());
    }
    match content.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(id) => Ok(format!("{} {}", agent_command, id)),
        None => bail!("{} is empty", sweep_file.display()),
    }
}

/// Variables the tracking service needs inside every session
pub fn tracking_env(tracking: &TrackingConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let key = tracking
        .api_key
        .clone()
        .or_else(|| std::env::var(&tracking.api_key_env).ok());
    if let Some(key) = key {
        env.insert(tracking.api_key_env.clone(), key);
    }
    if let Some(project) = &tracking.project {
        env.insert("WANDB_PROJECT".to_string(), project.clone());
    }
    if let Some(entity) = &tracking.entity {
        env.insert("WANDB_ENTITY".to_string(), entity.clone());
    }
    env
}

fn describe(detail: &PhaseDetail) -> String {
    match detail {
        PhaseDetail::Initialized { cloned: true, .. } => "cloned".to_string(),
        PhaseDetail::Initialized { updated: true, .. } => "updated".to_string(),
        PhaseDetail::Initialized { .. } => "ready".to_string(),
        PhaseDetail::Synced { branch } => format!("synced {}", branch),
        PhaseDetail::Started { sessions } => format!("{} session(s) started", sessions.len()),
        PhaseDetail::Status { sessions } => sessions
            .iter()
            .map(|s| format!("{}={}", s.name, s.status))
            .collect::<Vec<_>>()
            .join(", "),
        PhaseDetail::Checked { work_dir_present } => {
            if *work_dir_present {
                "reachable, work dir present".to_string()
            } else {
                "reachable, work dir missing".to_string()
            }
        }
        PhaseDetail::Up { branch, sessions } => {
            format!("synced {}, {} session(s) started", branch, sessions.len())
        }
        PhaseDetail::Submitted { job_id, job_name } => {
            format!("submitted job {} ({})", job_id, job_name)
        }
        PhaseDetail::Jobs { job_name, jobs } if jobs.is_empty() => {
            format!("no jobs named {}", job_name)
        }
        PhaseDetail::Jobs { jobs, .. } => jobs
            .iter()
            .map(|j| format!("{}={}", j.id, j.state))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Print a phase result as a table or JSON
pub fn render_result(result: &PhaseResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!(
        "{} {} ({}): {} succeeded, {} failed",
        result.phase,
        result.target,
        result.mode,
        result.succeeded.len(),
        result.failed.len()
    );
    println!("{:<20} {:<8} {}", "HOST", "STATUS", "DETAIL");
    println!("{}", "-".repeat(80));
    for outcome in &result.succeeded {
        println!("{:<20} {:<8} {}", outcome.host, "ok", describe(&outcome.detail));
    }
    for failure in &result.failed {
        println!(
            "{:<20} {:<8} {}",
            failure.host,
            failure.kind.to_string(),
            failure.message
        );
    }
    Ok(())
}

/// Print how to reattach to each started session
pub fn print_attach_hints(target: &Target, result: &PhaseResult) {
    for outcome in &result.succeeded {
        let sessions = match &outcome.detail {
            PhaseDetail::Started { sessions } | PhaseDetail::Up { sessions, .. } => sessions,
            _ => continue,
        };
        let connection = target
            .servers
            .iter()
            .find(|s| s.name == outcome.host)
            .map(|s| &s.connection)
            .or(target.connection.as_ref());
        if !sessions.is_empty() {
            println!("\nAttach on {}:", outcome.host);
        }
        for session in sessions {
            println!(
                "  {}",
                SessionSupervisor::attach_command(&target.name, session.process_index, connection)
            );
        }
    }
}

/// Print the resolved target list or one target
pub fn show_config(config: &JasmineConfig, target: Option<&str>, json: bool) -> Result<()> {
    let targets: Vec<&Target> = match target {
        Some(name) => vec![config.target(name)?],
        None => config.targets.iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    if targets.is_empty() {
        println!("No targets configured");
        return Ok(());
    }

    println!(
        "{:<20} {:<18} {:<24} {:<10} {}",
        "NAME", "MODE", "HOST", "PROCESSES", "WORK DIR"
    );
    println!("{}", "-".repeat(90));
    for t in targets {
        let host = if t.servers.is_empty() {
            t.connection
                .as_ref()
                .map(|c| c.destination())
                .unwrap_or_else(|| "localhost".to_string())
        } else {
            format!("{} servers", t.servers.len())
        };
        let processes = if t.servers.is_empty() {
            t.num_processes
        } else {
            t.servers.iter().map(|s| s.num_processes).sum()
        };
        println!(
            "{:<20} {:<18} {:<24} {:<10} {}",
            t.name,
            t.mode.to_string(),
            host,
            processes,
            t.work_dir.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_command_wins() {
        let cmd = resolve_agent_command(None, Some("python agent.py"), "wandb agent", Path::new("/nope"))
            .unwrap();
        assert_eq!(cmd, "python agent.py");
    }

    #[test]
    fn test_sweep_id_flag() {
        let cmd =
            resolve_agent_command(Some("org/proj/abc"), None, "wandb agent", Path::new("/nope")).unwrap();
        assert_eq!(cmd, "wandb agent org/proj/abc");
    }

    #[test]
    fn test_sweep_file_with_full_command() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Run sweep agent with:").unwrap();
        writeln!(file, "  wandb agent org/proj/xyz").unwrap();
        let cmd = resolve_agent_command(None, None, "wandb agent", file.path()).unwrap();
        assert_eq!(cmd, "wandb agent org/proj/xyz");
    }

    #[test]
    fn test_sweep_file_with_bare_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file).unwrap();
        writeln!(file, "org/proj/xyz").unwrap();
        let cmd = resolve_agent_command(None, None, "wandb agent", file.path()).unwrap();
        assert_eq!(cmd, "wandb agent org/proj/xyz");
    }

    #[test]
    fn test_missing_sweep_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_agent_command(None, None, "wandb agent", &dir.path().join("sweep_id"))
            .unwrap_err();
        assert!(err.to_string().contains("--sweep-id"));
    }

    #[test]
    fn test_tracking_env_from_config() {
        let tracking = TrackingConfig {
            api_key: Some("secret".to_string()),
            project: Some("proj".to_string()),
            ..Default::default()
        };
        let env = tracking_env(&tracking);
        assert_eq!(env["WANDB_API_KEY"], "secret");
        assert_eq!(env["WANDB_PROJECT"], "proj");
        assert!(!env.contains_key("WANDB_ENTITY"));
    }

    struct Stalled;

    impl std::io::Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_confirm_reads_answer() {
        let confirm = StdinConfirm::from_reader(std::io::Cursor::new("yes\n"), Duration::from_secs(5));
        assert!(confirm.confirm("Run the update commands?").await);
    }

    #[tokio::test]
    async fn test_confirm_closed_input_is_no() {
        let confirm = StdinConfirm::from_reader(std::io::empty(), Duration::from_secs(5));
        assert!(!confirm.confirm("Run the update commands?").await);
    }

    #[tokio::test]
    async fn test_confirm_times_out_without_blocking_runtime() {
        let confirm = StdinConfirm::from_reader(
            std::io::BufReader::new(Stalled),
            Duration::from_millis(50),
        );
        let answered = tokio::time::timeout(
            Duration::from_secs(5),
            confirm.confirm("Run the update commands?"),
        )
        .await;
        assert_eq!(answered.ok(), Some(false));
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }
}
