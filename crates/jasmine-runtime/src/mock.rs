//! Recording test doubles for executors and connectors
//!
//! `MockExecutor` records every (command, cwd) pair in call order and answers
//! from substring rules. The most recently added matching rule wins; rules
//! added with `respond_once` are consumed by their first match. Commands with
//! no matching rule succeed with empty output.

use async_trait::async_trait;
use jasmine_core::{ConnectionSpec, JasmineError, JasmineResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connector::Connector;
use crate::execution::Execution;
use crate::traits::CommandExecutor;

/// Canned answer for a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The control channel drops while running the command
    ConnectionLost,
    /// The named tool is not installed
    Missing(String),
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        MockResponse::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        MockResponse::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub command: String,
    pub cwd: Option<String>,
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    response: MockResponse,
    once: bool,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    rules: Vec<Rule>,
    closed: bool,
}

/// Executor that records commands instead of running them
#[derive(Debug, Clone)]
pub struct MockExecutor {
    host: String,
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Answer every command containing `pattern`
    pub fn respond(&self, pattern: &str, response: MockResponse) -> &Self {
        self.state().rules.push(Rule {
            pattern: pattern.to_string(),
            response,
            once: false,
        });
        self
    }

    /// Answer the next command containing `pattern`, then forget the rule
    pub fn respond_once(&self, pattern: &str, response: MockResponse) -> &Self {
        self.state().rules.push(Rule {
            pattern: pattern.to_string(),
            response,
            once: true,
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().calls.iter().map(|c| c.command.clone()).collect()
    }

    /// Recorded commands containing `needle`
    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    /// Index of the first recorded command containing `needle`
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(needle))
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn answer(&self, command: &str, cwd: Option<&str>) -> MockResponse {
        let mut state = self.state();
        state.calls.push(RecordedCall {
            command: command.to_string(),
            cwd: cwd.map(str::to_string),
        });
        let found = state
            .rules
            .iter()
            .rposition(|rule| command.contains(&rule.pattern));
        match found {
            Some(idx) if state.rules[idx].once => state.rules.remove(idx).response,
            Some(idx) => state.rules[idx].response.clone(),
            None => MockResponse::ok(""),
        }
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn spawn(&self, command: &str, cwd: Option<&str>) -> JasmineResult<Execution> {
        match self.answer(command, cwd) {
            MockResponse::Exit {
                code,
                stdout,
                stderr,
            } => Ok(Execution::completed(command, code, &stdout, &stderr)),
            MockResponse::ConnectionLost => Ok(Execution::failed(
                command,
                JasmineError::connection(&self.host, "control channel lost"),
            )),
            MockResponse::Missing(tool) => Err(JasmineError::missing_tool(&self.host, tool)),
        }
    }

    async fn close(&self) -> JasmineResult<()> {
        self.state().closed = true;
        Ok(())
    }
}

/// Connector handing out `MockExecutor`s keyed by host
#[derive(Debug, Clone)]
pub struct MockConnector {
    local: MockExecutor,
    hosts: Arc<Mutex<HashMap<String, MockExecutor>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            local: MockExecutor::new("localhost"),
            hosts: Arc::new(Mutex::new(HashMap::new())),
            unreachable: Arc::new(Mutex::new(HashSet::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The executor returned by `local()`
    pub fn local_executor(&self) -> MockExecutor {
        self.local.clone()
    }

    /// The executor returned for `host`, created on first use
    pub fn executor(&self, host: &str) -> MockExecutor {
        let mut hosts = lock(&self.hosts);
        hosts
            .entry(host.to_string())
            .or_insert_with(|| MockExecutor::new(host))
            .clone()
    }

    /// Make connection attempts to `host` fail
    pub fn set_unreachable(&self, host: &str) {
        lock(&self.unreachable).insert(host.to_string());
    }

    /// Hosts `connect` was called with, in order
    pub fn connect_attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> JasmineResult<Box<dyn CommandExecutor>> {
        lock(&self.attempts).push(spec.host.clone());
        if lock(&self.unreachable).contains(&spec.host) {
            return Err(JasmineError::connection(&spec.host, "connection refused"));
        }
        Ok(Box::new(self.executor(&spec.host)))
    }

    fn local(&self) -> Box<dyn CommandExecutor> {
        Box::new(self.local.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_commands_in_order() {
        let exec = MockExecutor::new("gpu1");
        exec.run("git status", Some("/src")).await.unwrap();
        exec.run("git fetch", None).await.unwrap();
        let calls = exec.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].command, "git status");
        assert_eq!(calls[0].cwd.as_deref(), Some("/src"));
        assert_eq!(exec.position("git fetch"), Some(1));
    }

    #[tokio::test]
    async fn test_latest_rule_wins_and_once_is_consumed() {
        let exec = MockExecutor::new("gpu1");
        exec.respond("git", MockResponse::ok("general"));
        exec.respond_once("git", MockResponse::fail(1, "first"));

        let first = exec.run("git pull", None).await.unwrap();
        assert_eq!(first.exit_code, 1);
        let second = exec.run("git pull", None).await.unwrap();
        assert_eq!(second.stdout, "general\n");
    }

    #[tokio::test]
    async fn test_connection_lost_and_missing() {
        let exec = MockExecutor::new("gpu1");
        exec.respond("tmux", MockResponse::Missing("tmux".to_string()));
        exec.respond("flaky", MockResponse::ConnectionLost);

        assert!(matches!(
            exec.run("tmux ls", None).await,
            Err(JasmineError::EnvironmentMissing { .. })
        ));
        assert!(matches!(
            exec.run("flaky", None).await,
            Err(JasmineError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_connector_unreachable() {
        let connector = MockConnector::new();
        connector.set_unreachable("down");
        assert!(connector
            .connect(&ConnectionSpec::new("down"))
            .await
            .is_err());
        let exec = connector.connect(&ConnectionSpec::new("up")).await.unwrap();
        exec.run("echo", None).await.unwrap();
        assert_eq!(connector.executor("up").commands(), vec!["echo"]);
        assert_eq!(connector.connect_attempts(), vec!["down", "up"]);
    }
}
