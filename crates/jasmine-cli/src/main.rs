//! jasmine CLI
//!
//! Command-line interface for running sweep agents on configured targets.

mod commands;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use jasmine_core::{ConflictPolicy, JasmineConfig, DEFAULT_CONFIG_PATH};
use jasmine_orchestrator::{Coordinator, LaunchSpec, OrchestratorContext, Phase};
use jasmine_runtime::{SshConnector, SshOptions};
use jasmine_session::SessionSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// jasmine - run hyperparameter-sweep agents on local, SSH, Slurm and GPU-fleet targets
#[derive(Parser, Debug)]
#[command(name = "jasmine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How to build the agent command
#[derive(Args, Debug, Clone, Default)]
struct LaunchArgs {
    /// Sweep id appended to the tracking agent command
    #[arg(long, conflicts_with = "command")]
    sweep_id: Option<String>,

    /// Literal agent command
    #[arg(long)]
    command: Option<String>,

    /// What to do with an already running session (reject, reuse, restart)
    #[arg(long)]
    policy: Option<ConflictPolicy>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare the work directory on the target
    Init {
        /// Target name
        target: String,
    },

    /// Push the current branch to the target
    Sync {
        /// Target name
        target: String,
    },

    /// Launch sweep agents
    Start {
        /// Target name
        target: String,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Show agent sessions or batch jobs
    Status {
        /// Target name
        target: String,
    },

    /// Verify connectivity and the work directory
    Check {
        /// Target name
        target: String,
    },

    /// Init, sync and start in one go
    Up {
        /// Target name
        target: String,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Show configured targets
    Config {
        /// Target name (optional, shows all if not provided)
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        JasmineConfig::from_file(&cli.config)?
    } else {
        JasmineConfig::default()
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let (target_name, phase, launch_args) = match cli.command {
        Commands::Config { target } => {
            commands::show_config(&config, target.as_deref(), cli.json)?;
            return Ok(());
        }
        Commands::Init { target } => (target, Phase::Init, None),
        Commands::Sync { target } => (target, Phase::Sync, None),
        Commands::Start { target, launch } => (target, Phase::Start, Some(launch)),
        Commands::Status { target } => (target, Phase::Status, None),
        Commands::Check { target } => (target, Phase::Check, None),
        Commands::Up { target, launch } => (target, Phase::Up, Some(launch)),
    };
    let target = config.target(&target_name)?;
    let src_dir = config.resolved_src_dir()?;

    let execution = &config.execution;
    let command_timeout =
        (execution.command_timeout_secs > 0).then(|| Duration::from_secs(execution.command_timeout_secs));
    let connector = SshConnector::new(SshOptions {
        connect_timeout_secs: execution.ssh_connect_timeout_secs,
        extra_path: execution.remote_path.clone(),
        command_timeout,
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current command");
            on_interrupt.cancel();
        }
    });

    let policy = launch_args
        .as_ref()
        .and_then(|args| args.policy)
        .unwrap_or(execution.conflict_policy);
    let mut ctx = OrchestratorContext::new(Arc::new(connector), src_dir.clone())
        .with_supervisor(SessionSupervisor::new(policy))
        .with_cancel(cancel)
        .with_max_parallel_servers(execution.max_parallel_servers);
    // Only init asks before updating an existing work dir
    if matches!(phase, Phase::Init | Phase::Up) {
        ctx = ctx.with_confirm(Arc::new(commands::StdinConfirm::default()));
    }

    if let Some(args) = launch_args {
        let command = commands::resolve_agent_command(
            args.sweep_id.as_deref(),
            args.command.as_deref(),
            &config.tracking.agent_command,
            &src_dir.join(&config.sweep_file),
        )
        .context("No agent command to start")?;
        ctx = ctx.with_launch(LaunchSpec {
            command,
            env: commands::tracking_env(&config.tracking),
        });
    }

    let result = Coordinator::new(ctx).run(target, phase).await;
    commands::render_result(&result, cli.json)?;
    if !cli.json && matches!(phase, Phase::Start | Phase::Up) {
        commands::print_attach_hints(target, &result);
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
