//! ==============================================================================
//! main.rs - sensor hub entry point
//! ==============================================================================
//!
//! purpose:
//!     one binary, two roles (picked by `cluster.role` or `--role`):
//!     - hub:  accepts readings over http, stores them in sqlite, answers
//!             the dashboard's snapshot and history queries
//!     - node: runs on each producer; reads its sensor every few seconds and
//!             pushes the reading to the hub, riding out network drops
//!
//! architecture:
//!
//!     ┌──────────────┐   POST /api/data   ┌──────────────────────────────┐
//!     │ node (agent) │ ─────────────────▶ │ hub                          │
//!     │  group_1..6  │                    │  ingest ──▶ store (sqlite)   │
//!     └──────────────┘                    │               ▲              │
//!                                         │  snapshot ────┘              │
//!     ┌──────────────┐  GET /api/...      │                              │
//!     │ dashboard    │ ◀───────────────── │                              │
//!     └──────────────┘                    └──────────────────────────────┘
//!
//! ==============================================================================

use anyhow::Result;
use clap::Parser;
use sensor_hub::config::{ConfigSource, HostConfig, Role};
use sensor_hub::{logging, shutdown, supervisor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sensor-hub", version, about = "Sensor telemetry hub and producer agent")]
struct Cli {
    /// config file (default: config/hub.toml, then ../config/hub.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// override cluster.role from the config file
    #[arg(short, long, value_enum)]
    role: Option<Role>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration
    let (mut config, source) = match &cli.config {
        Some(path) => (HostConfig::load(path)?, ConfigSource::File(path.clone())),
        None => HostConfig::load_or_default(),
    };
    if let Some(role) = cli.role {
        config.cluster.role = role;
    }

    // step 2: logging, then report what step 1 did
    logging::init(&config.logging.level);
    match &source {
        ConfigSource::File(path) => tracing::info!("[CONFIG] Loaded from {}", path.display()),
        ConfigSource::Defaults { rejected } => {
            for (path, reason) in rejected {
                tracing::warn!("[CONFIG] Warning: Failed to load {}: {}", path.display(), reason);
            }
            tracing::warn!("[CONFIG] Warning: No config file found - using defaults");
        }
    }
    config.validate()?;
    config.log_summary();

    // step 3: run the selected role until interrupted
    let shutdown = shutdown::listen();
    match config.cluster.role {
        Role::Hub => supervisor::run_hub(&config, shutdown).await,
        Role::Node => supervisor::run_node(&config, shutdown).await,
    }
}
