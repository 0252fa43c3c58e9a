//! Target, server and connection type definitions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::{GpuConfig, JasmineError, JasmineResult};

/// Git operations used when a target does not configure its own
pub const DEFAULT_GIT_OPERATIONS: &[&str] = &[
    "git fetch --all",
    "git checkout {branch} || git checkout -b {branch} origin/{branch}",
    "git reset --hard origin/{branch}",
];

/// Toolchain bootstrap run by `init` on remote hosts
pub const DEFAULT_BOOTSTRAP_COMMANDS: &[&str] =
    &["command -v uv >/dev/null 2>&1 || curl -LsSf https://astral.sh/uv/install.sh | sh"];

/// Dependency setup run inside the work dir after a fresh clone
pub const DEFAULT_SETUP_COMMANDS: &[&str] = &["uv sync"];

/// Update pass offered when the work dir already exists
pub const DEFAULT_UPDATE_COMMANDS: &[&str] = &["git pull --ff-only", "uv sync"];

/// Execution strategy of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// This machine, sessions in the local multiplexer
    Local,
    /// One remote host over SSH
    #[serde(alias = "remote", alias = "ssh")]
    RemoteSsh,
    /// A batch-scheduler partition
    Slurm,
    /// Several remote GPU hosts with failover
    #[serde(alias = "remote_gpu")]
    RemoteGpuFleet,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::RemoteSsh => write!(f, "remote_ssh"),
            Mode::Slurm => write!(f, "slurm"),
            Mode::RemoteGpuFleet => write!(f, "remote_gpu_fleet"),
        }
    }
}

/// How source code reaches the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    #[default]
    Git,
    Rsync,
}

/// Jump host used to reach a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl ProxySpec {
    /// `user@host:port` as accepted by `ssh -J`
    pub fn jump_spec(&self) -> String {
        let mut spec = match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        };
        if let Some(port) = self.port {
            spec.push_str(&format!(":{}", port));
        }
        spec
    }
}

/// How to open a control channel to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub proxy: Option<ProxySpec>,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl ConnectionSpec {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            proxy: None,
            identity_file: None,
        }
    }

    /// `user@host` destination for ssh/rsync
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Connection options shared by every ssh invocation (port, jump, identity)
    pub fn ssh_options(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(proxy) = &self.proxy {
            args.push("-J".to_string());
            args.push(proxy.jump_spec());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }
}

/// One member of a GPU fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    #[serde(flatten)]
    pub connection: ConnectionSpec,
    pub work_dir: String,
    #[serde(default)]
    pub gpu_config: GpuConfig,
    #[serde(default = "default_num_processes")]
    pub num_processes: u32,
}

fn default_num_processes() -> u32 {
    1
}

/// A named, independently configured execution destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub mode: Mode,
    #[serde(default)]
    pub gpu_config: GpuConfig,
    #[serde(default = "default_num_processes")]
    pub num_processes: u32,
    /// Single-host connection (RemoteSsh, optionally Slurm login node)
    #[serde(flatten)]
    pub connection: Option<ConnectionSpec>,
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default, alias = "github_url")]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub sync_method: SyncMethod,
    #[serde(default)]
    pub git_operations: Vec<String>,
    #[serde(default)]
    pub sync_exclude: Vec<String>,
    #[serde(default)]
    pub dvc_cache: Option<String>,
    #[serde(default)]
    pub dvc_remote: Option<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub slurm_config: BTreeMap<String, String>,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    /// Prefix for data-cache and agent commands, e.g. `uv run`
    #[serde(default)]
    pub command_runner: Option<String>,
    /// Extra environment exported into every launched agent
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub bootstrap_commands: Option<Vec<String>>,
    #[serde(default)]
    pub setup_commands: Option<Vec<String>>,
    #[serde(default)]
    pub update_commands: Option<Vec<String>>,
}

impl Target {
    /// Create a target with defaults for every optional field
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            gpu_config: GpuConfig::none(),
            num_processes: 1,
            connection: None,
            work_dir: None,
            repo_url: None,
            sync_method: SyncMethod::Git,
            git_operations: Vec::new(),
            sync_exclude: Vec::new(),
            dvc_cache: None,
            dvc_remote: None,
            slurm_config: BTreeMap::new(),
            servers: Vec::new(),
            command_runner: None,
            env: BTreeMap::new(),
            bootstrap_commands: None,
            setup_commands: None,
            update_commands: None,
        }
    }

    /// Configured git operations, or the fetch/checkout/reset default
    pub fn effective_git_operations(&self) -> Vec<String> {
        if self.git_operations.is_empty() {
            DEFAULT_GIT_OPERATIONS.iter().map(|s| s.to_string()).collect()
        } else {
            self.git_operations.clone()
        }
    }

    pub fn effective_bootstrap_commands(&self) -> Vec<String> {
        or_default(&self.bootstrap_commands, DEFAULT_BOOTSTRAP_COMMANDS)
    }

    pub fn effective_setup_commands(&self) -> Vec<String> {
        or_default(&self.setup_commands, DEFAULT_SETUP_COMMANDS)
    }

    pub fn effective_update_commands(&self) -> Vec<String> {
        or_default(&self.update_commands, DEFAULT_UPDATE_COMMANDS)
    }

    /// Whether the data-cache tool takes part in sync
    pub fn uses_data_cache(&self) -> bool {
        self.dvc_cache.is_some() || self.dvc_remote.is_some()
    }

    /// Check that exactly the fields required by `mode` are populated
    pub fn validate(&self) -> JasmineResult<()> {
        let fail = |msg: String| {
            Err(JasmineError::ConfigurationInconsistent(format!(
                "target '{}': {}",
                self.name, msg
            )))
        };

        if self.name.trim().is_empty() {
            return fail("name must not be empty".to_string());
        }
        if self.num_processes == 0 && self.mode != Mode::RemoteGpuFleet {
            return fail("num_processes must be at least 1".to_string());
        }

        match self.mode {
            Mode::RemoteGpuFleet => {
                if self.servers.is_empty() {
                    return fail("remote_gpu_fleet requires at least one server".to_string());
                }
                if self.connection.is_some() {
                    return fail(
                        "remote_gpu_fleet takes per-server connections, not a target host"
                            .to_string(),
                    );
                }
                if self.repo_url.is_none() {
                    return fail("remote_gpu_fleet requires repo_url".to_string());
                }
                let mut seen = HashSet::new();
                for server in &self.servers {
                    if !seen.insert(server.name.as_str()) {
                        return fail(format!("duplicate server name '{}'", server.name));
                    }
                    if server.num_processes == 0 {
                        return fail(format!(
                            "server '{}' needs at least one process",
                            server.name
                        ));
                    }
                    if server.work_dir.trim().is_empty() {
                        return fail(format!("server '{}' has an empty work_dir", server.name));
                    }
                }
            }
            Mode::RemoteSsh => {
                if !self.servers.is_empty() {
                    return fail("servers are only valid for remote_gpu_fleet".to_string());
                }
                if self.connection.is_none() {
                    return fail("remote_ssh requires host".to_string());
                }
                if self.work_dir.is_none() {
                    return fail("remote_ssh requires work_dir".to_string());
                }
                if self.repo_url.is_none() {
                    return fail("remote_ssh requires repo_url".to_string());
                }
            }
            Mode::Local => {
                if !self.servers.is_empty() {
                    return fail("servers are only valid for remote_gpu_fleet".to_string());
                }
                if self.connection.is_some() {
                    return fail("local targets cannot have a host".to_string());
                }
            }
            Mode::Slurm => {
                if !self.servers.is_empty() {
                    return fail("servers are only valid for remote_gpu_fleet".to_string());
                }
                if self.connection.is_some() && self.work_dir.is_none() {
                    return fail("slurm with a login host requires work_dir".to_string());
                }
            }
        }

        for op in &self.git_operations {
            if let Some(placeholder) = unknown_placeholder(op) {
                return fail(format!(
                    "git operation '{}' uses unknown placeholder '{{{}}}'",
                    op, placeholder
                ));
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

/// Accept `nodes = 1` as well as `nodes = "1"` for scheduler directives
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Scalar::Text(s) => s,
                Scalar::Integer(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Boolean(b) => b.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn or_default(configured: &Option<Vec<String>>, fallback: &[&str]) -> Vec<String> {
    match configured {
        Some(commands) => commands.clone(),
        None => fallback.iter().map(|s| s.to_string()).collect(),
    }
}

/// First `{name}` placeholder other than `{branch}`
fn unknown_placeholder(template: &str) -> Option<String> {
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        let name = &after[..end];
        let is_identifier =
            !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
        if is_identifier && name != "branch" {
            return Some(name.to_string());
        }
        rest = &after[end + 1..];
    }
    None
}

/// Substitute `{branch}` in a git operation template
pub fn render_git_operation(template: &str, branch: &str) -> String {
    template.replace("{branch}", branch)
}
