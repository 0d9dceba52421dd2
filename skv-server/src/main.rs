//! `skv-server`: a minimal `tokio`-based host that binds a TCP listener,
//! wires it to a single `skv-core` connection actor, and drives the
//! periodic expiry sweep — the ambient event loop `skv-core` itself
//! deliberately stays out of (io_uring/TLS termination are this workspace's
//! stated non-goals for the core).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use skv_common::{Config, EvictionPolicy};
use skv_server::{Metrics, spawn_actor, spawn_sweeper};

/// Command-line overrides for the TOML-loaded configuration. Any flag here
/// wins over the config file, which in turn wins over `Config::default()`.
#[derive(Parser)]
#[command(name = "skv-server")]
#[command(about = "In-memory keyspace cache with TTL, eviction, and pub/sub", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `bind_addr` from the config file.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Overrides `max_memory_bytes` from the config file.
    #[arg(long)]
    max_memory_bytes: Option<u64>,

    /// Overrides `eviction_policy` from the config file.
    #[arg(long, value_enum)]
    eviction_policy: Option<CliEvictionPolicy>,

    /// Overrides `snapshot_path` from the config file.
    #[arg(long)]
    snapshot_path: Option<PathBuf>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliEvictionPolicy {
    None,
    AllkeysLru,
    AllkeysRandom,
}

impl From<CliEvictionPolicy> for EvictionPolicy {
    fn from(value: CliEvictionPolicy) -> Self {
        match value {
            CliEvictionPolicy::None => EvictionPolicy::None,
            CliEvictionPolicy::AllkeysLru => EvictionPolicy::AllKeysLru,
            CliEvictionPolicy::AllkeysRandom => EvictionPolicy::AllKeysRandom,
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Config::from_toml_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(bind_addr) = &cli.bind_addr {
        config.bind_addr = bind_addr.clone();
    }
    if let Some(max_memory_bytes) = cli.max_memory_bytes {
        config.max_memory_bytes = max_memory_bytes;
    }
    if let Some(eviction_policy) = cli.eviction_policy {
        config.eviction_policy = eviction_policy.into();
    }
    if let Some(snapshot_path) = &cli.snapshot_path {
        config.snapshot_path = Some(snapshot_path.clone());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("SKV_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    let metrics = Arc::new(Metrics::new());
    let actor = spawn_actor(&config, metrics);
    spawn_sweeper(actor.clone(), Duration::from_millis(config.sweep_interval_ms));

    skv_server::accept_loop(listener, actor).await?;
    Ok(())
}
