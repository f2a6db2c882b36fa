//! # agora
//!
//! Debate session binary: `serve` runs the reference server, `chat` joins a
//! session from the terminal through the synchronization core.

#![deny(unsafe_code)]

mod chat;

use std::path::PathBuf;
use std::sync::Arc;

use agora_core::SessionStore;
use agora_server::ServerConfig;
use agora_settings::{AgoraSettings, agora_home, load_settings, load_settings_from_path};
use agora_store::{MemorySessionStore, SqliteSessionStore};
use agora_telemetry::{TelemetryConfig, init_telemetry};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info};

/// Multi-party debate sessions with simulated experts.
#[derive(Parser, Debug)]
#[command(name = "agora", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.agora/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reference WebSocket server.
    Serve(ServeArgs),
    /// Join a session from the terminal.
    Chat(chat::ChatArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database path (overrides settings).
    #[arg(long, conflicts_with = "memory")]
    db_path: Option<PathBuf>,

    /// Keep sessions in memory only.
    #[arg(long)]
    memory: bool,
}

fn load(cli: &Cli) -> Result<AgoraSettings> {
    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    settings.validate().context("invalid settings")?;
    if agora_settings::init_settings(settings.clone()).is_err() {
        tracing::debug!("global settings already initialized");
    }
    Ok(settings)
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_store(settings: &AgoraSettings, args: &ServeArgs) -> Result<Arc<dyn SessionStore>> {
    let path = match (&args.db_path, &settings.store.db_path) {
        _ if args.memory => None,
        (Some(path), _) => Some(path.clone()),
        (None, Some(relative)) => Some(agora_home().join(relative)),
        (None, None) => None,
    };
    let Some(path) = path else {
        info!("using in-memory session store");
        return Ok(Arc::new(MemorySessionStore::new()));
    };
    ensure_parent_dir(&path)?;
    let store = SqliteSessionStore::open(&path)
        .with_context(|| format!("failed to open database: {}", path.display()))?;
    info!(path = %path.display(), "session store opened");
    Ok(Arc::new(store))
}

async fn serve(settings: AgoraSettings, args: ServeArgs) -> Result<()> {
    let _ = init_telemetry(&TelemetryConfig::from_settings(&settings.logging));

    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let store = open_store(&settings, &args)?;
    let replies = agora_providers::reply_generator_from_settings(&settings.providers);
    let handle = agora_server::start(config, store, replies)
        .await
        .context("failed to start server")?;
    info!(addr = %handle.addr(), "agora server ready");

    let stopped = handle.shutdown_token();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutting down");
        }
        () = stopped.cancelled() => {}
    }
    handle.shutdown(None).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    match cli.command {
        Command::Serve(args) => serve(settings, args).await,
        Command::Chat(args) => {
            let level = if args.verbose { Level::DEBUG } else { Level::WARN };
            let telemetry = TelemetryConfig {
                log_level: level,
                ..TelemetryConfig::from_settings(&settings.logging)
            };
            let _ = init_telemetry(&telemetry);
            chat::run(settings, args).await
        }
    }
}
