mod actions;
mod commands;
mod dashboard;
mod map;
mod snapshot;
mod ui;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lookout_client::HttpBackend;
use lookout_ops::{init_file_tracing, init_tracing};
use lookout_types::{
    config::{
        BackendConfig, DetectionRefresh, LookoutConfig, OpsConfig, PushConfig, ViewerConfig,
    },
    instance::InstanceAction,
};
use tracing::{info, warn};

use crate::commands::InstanceArgs;

#[derive(Debug, Parser)]
#[command(name = "lookout", version, about = "Control panel for a Lookout camera fleet")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "LOOKOUT_CONFIG")]
    config: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive dashboard (default).
    Dashboard,
    /// Print the instance table.
    List,
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Delete {
        name: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    Add {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        fields: InstanceArgs,
    },
    Edit {
        name: String,
        #[command(flatten)]
        fields: InstanceArgs,
    },
    /// Print the latest images joined with their detections as JSON.
    Images,
    /// Print the next system statistics broadcast.
    Stats,
    /// Save the latest frame of an instance with detection boxes drawn.
    Snapshot {
        key: String,
        #[arg(short, long, default_value = "snapshot.png")]
        output: PathBuf,
    },
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone()).with_env_overrides();
    let command = cli.command.unwrap_or(Command::Dashboard);

    if matches!(command, Command::Dashboard) {
        let path = init_file_tracing(&config.ops)?;
        eprintln!("Logging to {}", path.display());
    } else {
        init_tracing(&config.ops)?;
    }

    let backend = HttpBackend::new(&config.backend)?;
    if !matches!(command, Command::Stats | Command::Logout) {
        authenticate(&backend, &config).await?;
    }

    match command {
        Command::Dashboard => dashboard::run(backend, &config).await,
        Command::List => commands::list(&backend).await,
        Command::Start { name } => commands::action(&backend, &name, InstanceAction::Start).await,
        Command::Stop { name } => commands::action(&backend, &name, InstanceAction::Stop).await,
        Command::Delete { name, yes } => commands::delete(&backend, &name, yes).await,
        Command::Add { name, fields } => commands::add(&backend, &name, &fields).await,
        Command::Edit { name, fields } => commands::edit(&backend, &name, &fields).await,
        Command::Images => commands::images(backend, &config).await,
        Command::Stats => commands::stats(&config).await,
        Command::Snapshot { key, output } => {
            commands::snapshot(backend, &config, &key, &output).await
        }
        Command::Logout => commands::logout(&backend).await,
    }
}

/// Log in when a password is configured, then confirm the session is accepted.
async fn authenticate(backend: &HttpBackend, config: &LookoutConfig) -> Result<()> {
    if let Some(password) = config.backend.password.as_deref() {
        if let Err(err) = backend.login(password).await {
            bail!("login failed: {}", err.user_message());
        }
        info!("Logged in to {}", backend.base_url());
    }
    if !backend.check_auth().await? {
        warn!("Backend rejected the session");
        bail!("not authenticated; set backend.password or LOOKOUT_PASSWORD");
    }
    Ok(())
}

fn load_config(from_args: Option<String>) -> LookoutConfig {
    let path = from_args.unwrap_or_else(|| "configs/dev.toml".into());
    match LookoutConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                default_config()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            default_config()
        }
    }
}

fn default_config() -> LookoutConfig {
    let config = LookoutConfig {
        backend: BackendConfig {
            base_url: "http://127.0.0.1:5000".into(),
            password: None,
            request_timeout_ms: 10_000,
        },
        viewer: ViewerConfig {
            poll_interval_secs: 10,
            detection_refresh: DetectionRefresh::OnChange,
        },
        push: PushConfig {
            enabled: true,
            path: "/socket.io/".into(),
        },
        ops: OpsConfig {
            log_level: "info".into(),
            log_dir: "logs".into(),
        },
    };
    debug_assert!(config.validate().is_ok());
    config
}
