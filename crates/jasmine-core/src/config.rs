//! Configuration types for jasmine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ConflictPolicy, JasmineError, JasmineResult, Target};

/// Default location of the project configuration
pub const DEFAULT_CONFIG_PATH: &str = ".jasmine/config.toml";

/// Project configuration: global settings plus every target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JasmineConfig {
    /// Local source repository (defaults to the working directory)
    #[serde(default)]
    pub src_dir: Option<PathBuf>,
    /// File holding the sweep id or agent command
    #[serde(default = "default_sweep_file")]
    pub sweep_file: PathBuf,
    /// Experiment-tracking settings
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Execution tuning
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Configured targets
    #[serde(default)]
    pub targets: Vec<Target>,
}

fn default_sweep_file() -> PathBuf {
    PathBuf::from(".jasmine/sweep_id")
}

impl Default for JasmineConfig {
    fn default() -> Self {
        Self {
            src_dir: None,
            sweep_file: default_sweep_file(),
            tracking: TrackingConfig::default(),
            logging: LoggingConfig::default(),
            execution: ExecutionConfig::default(),
            targets: Vec::new(),
        }
    }
}

impl JasmineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> JasmineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JasmineError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> JasmineResult<Self> {
        toml::from_str(content)
            .map_err(|e| JasmineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Look up a target by name
    pub fn target(&self, name: &str) -> JasmineResult<&Target> {
        self.targets.iter().find(|t| t.name == name).ok_or_else(|| {
            JasmineError::Config(format!(
                "Target '{}' not found, available targets: [{}]",
                name,
                self.target_names().join(", ")
            ))
        })
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    /// Source directory, falling back to the process working directory
    pub fn resolved_src_dir(&self) -> JasmineResult<PathBuf> {
        match &self.src_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

/// Experiment-tracking collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// API key exported into agent sessions
    #[serde(default)]
    pub api_key: Option<String>,
    /// Variable the API key is exported as
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Agent invocation the sweep id is appended to
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
}

fn default_api_key_env() -> String {
    "WANDB_API_KEY".to_string()
}

fn default_agent_command() -> String {
    "wandb agent".to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            agent_command: default_agent_command(),
            project: None,
            entity: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Execution tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-command timeout in seconds, 0 disables it
    pub command_timeout_secs: u64,
    /// Fleet servers processed concurrently
    pub max_parallel_servers: usize,
    /// Policy for already-running sessions on `start`
    pub conflict_policy: ConflictPolicy,
    /// SSH connect timeout in seconds
    pub ssh_connect_timeout_secs: u64,
    /// Directories prepended to PATH for remote commands
    pub remote_path: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 600,
            max_parallel_servers: 4,
            conflict_policy: ConflictPolicy::Reject,
            ssh_connect_timeout_secs: 10,
            remote_path: vec![
                "$HOME/.local/bin".to_string(),
                "$HOME/.cargo/bin".to_string(),
            ],
        }
    }
}
