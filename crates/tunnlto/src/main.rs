//! tunnlto: WireGuard tunnel configuration manager
//!
//! Command-line front end over the tunnel store. Loads the CLI config, sets
//! up logging, opens the file-backed store and runs one command.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use tunnlto_store::{
    FileStore, LogLevel, StoreError, TunnelManager, TunnelStore, derive_public_key,
    generate_key_pair, render_wiresock_config,
};

use crate::config::{CliConfig, DEFAULT_LOG_FILTER};

#[derive(Parser, Debug)]
#[command(name = "tunnlto")]
#[command(version)]
#[command(about = "Manage WireGuard tunnel configurations for WireSock")]
struct Args {
    /// Config file (default: <config dir>/tunnlto/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the tunnel store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tunnels; the selected one is marked with '*'
    List,

    /// Print one tunnel as JSON
    Show { id: String },

    /// Import a WireGuard profile
    Import {
        file: PathBuf,

        /// Select the tunnel after importing it
        #[arg(long)]
        select: bool,
    },

    /// Delete a tunnel
    Remove { id: String },

    /// Select a tunnel
    Select { id: String },

    /// Print a tunnel as WireSock config
    Export { id: String },

    /// Generate a key pair
    Genkey,

    /// Derive the public key of a base64 private key
    Pubkey { private_key: String },

    /// Show settings, or update the given fields
    Settings {
        /// Tunnel to enable on startup ("" to disable)
        #[arg(long)]
        auto_connect: Option<String>,

        #[arg(long)]
        log_level: Option<LogLevel>,

        #[arg(long)]
        auto_start: Option<bool>,

        #[arg(long)]
        start_minimized: Option<bool>,

        #[arg(long)]
        minimize_to_tray: Option<bool>,

        #[arg(long)]
        log_limit: Option<u32>,
    },

    /// Run schema migrations and report what changed
    Migrate,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(CliConfig::default_path);
    let (config, config_error) = match config_path.as_deref().map(CliConfig::load) {
        Some(Ok(config)) => (config, None),
        Some(Err(e)) => (CliConfig::default(), Some(e)),
        None => (CliConfig::default(), None),
    };

    init_logging(args.verbose, &config.log_filter);
    if let Some(e) = config_error {
        warn!("{:#}, using defaults", e);
    }

    let data_dir = config.resolve_data_dir(args.data_dir.as_deref())?;
    debug!("Using data directory {}", data_dir.display());

    run(args.command, &data_dir)
}

/// Filter precedence: `RUST_LOG`, `--verbose`, config file, default
fn init_logging(verbose: bool, config_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_new(config_filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn open_store(data_dir: &Path) -> Result<FileStore> {
    FileStore::open(data_dir)
        .with_context(|| format!("Failed to open tunnel store in {}", data_dir.display()))
}

fn run(command: Command, data_dir: &Path) -> Result<ExitCode> {
    match &command {
        Command::Genkey => {
            let pair = generate_key_pair();
            println!("PrivateKey = {}", pair.private_key);
            println!("PublicKey = {}", pair.public_key);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Pubkey { private_key } => {
            let public_key = derive_public_key(private_key);
            if public_key.is_empty() {
                eprintln!("Not a valid private key");
                return Ok(ExitCode::FAILURE);
            }
            println!("{}", public_key);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Migrate => {
            let store = TunnelStore::open(open_store(data_dir)?)?;
            println!("{}", store.migration_report());
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let mut manager = TunnelManager::load(open_store(data_dir)?)?;

    match command {
        Command::List => {
            if manager.is_empty() {
                println!("No tunnels");
            }
            let selected = manager.selected_tunnel_id().map(str::to_string);
            for tunnel in manager.tunnels() {
                let is_selected = selected.as_deref() == Some(tunnel.id.as_str());
                let marker = if is_selected { '*' } else { ' ' };
                println!("{} {}  {}", marker, tunnel.id, tunnel.name);
            }
        }
        Command::Show { id } => {
            let tunnel = manager
                .get_tunnel(&id)
                .ok_or_else(|| StoreError::UnknownTunnel(id.clone()))?;
            println!("{}", serde_json::to_string_pretty(tunnel)?);
        }
        Command::Import { file, select } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read profile {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let tunnel = manager.import_profile(&file_name, &text)?;
            let id = tunnel.id.clone();
            let name = tunnel.name.clone();
            manager
                .save_tunnel(tunnel)
                .with_context(|| format!("Cannot import {}", file.display()))?;
            if select {
                manager.select_tunnel(&id)?;
            }

            info!("Imported {:?} as {}", name, id);
            println!("{}", id);
        }
        Command::Remove { id } => {
            if manager.get_tunnel(&id).is_none() {
                warn!("No tunnel with id {}", id);
            }
            manager.remove_tunnel(&id)?;
        }
        Command::Select { id } => manager.select_tunnel(&id)?,
        Command::Export { id } => {
            let tunnel = manager
                .get_tunnel(&id)
                .ok_or_else(|| StoreError::UnknownTunnel(id.clone()))?;
            print!("{}", render_wiresock_config(tunnel));
        }
        Command::Settings {
            auto_connect,
            log_level,
            auto_start,
            start_minimized,
            minimize_to_tray,
            log_limit,
        } => {
            let mut settings = manager.settings().clone();
            let before = settings.clone();

            if let Some(id) = auto_connect {
                settings.auto_connect_tunnel_id = id;
            }
            if let Some(level) = log_level {
                settings.log_level = level;
            }
            if let Some(v) = auto_start {
                settings.auto_start = v;
            }
            if let Some(v) = start_minimized {
                settings.start_minimized = v;
            }
            if let Some(v) = minimize_to_tray {
                settings.minimize_to_tray = v;
            }
            if let Some(v) = log_limit {
                settings.log_limit = v;
            }

            if settings != before {
                manager.update_settings(settings)?;
            }
            println!("{}", serde_json::to_string_pretty(manager.settings())?);
        }
        Command::Genkey | Command::Pubkey { .. } | Command::Migrate => {}
    }

    Ok(ExitCode::SUCCESS)
}
