//! # arena-agent
//!
//! Arena coordination server binary: loads settings, wires the store into
//! the server and serves until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arena_core::store::{ArenaStore, MemoryStore, SeedData};
use arena_server::config::ServerConfig;
use arena_server::server::ArenaServer;
use arena_settings::ArenaSettings;
use clap::Parser;

/// Arena coordination server.
#[derive(Parser, Debug)]
#[command(name = "arena-agent", about = "Lobby, match start and chat coordination server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.arena/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// JSON file with lobbies and conversations to preload.
    #[arg(long)]
    seed: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<ArenaSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(arena_settings::loader::settings_path);
        let mut settings = arena_settings::loader::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

fn load_seed(path: &Path) -> Result<SeedData> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid seed file: {}", path.display()))
}

fn build_store(seed: Option<&Path>) -> Result<Arc<MemoryStore>> {
    let store = match seed {
        Some(path) => MemoryStore::from_seed(load_seed(path)?),
        None => MemoryStore::new(),
    };
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    arena_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics_handle = match arena_server::metrics::install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed, /metrics will be empty");
            arena_server::metrics::detached_handle()
        }
    };

    let store = build_store(args.seed.as_deref())?;
    let config = ServerConfig::from_settings(&settings);
    let shutdown_timeout = config.shutdown_timeout();
    let server = ArenaServer::new(config, store as Arc<dyn ArenaStore>, metrics_handle);
    let method_count = server.registry().methods().len();

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(%addr, method_count, "Arena server listening");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], Some(shutdown_timeout)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
