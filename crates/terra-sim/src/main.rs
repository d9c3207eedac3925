//! # Terra Sim
//!
//! Headless host for the Terra streaming engine. Walks a single viewer across
//! procedurally generated terrain and reports what the engine did.
//!
//! Usage:
//! - `terra-sim [config.toml]` runs the simulation
//! - `terra-sim --write-config [config.toml]` writes the default config

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod sim;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{SimConfig, CONFIG_FILE};

/// Main entry point.
fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("terra=info".parse()?))
        .init();

    info!("Terra simulation starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let first = args.next();
    if first.as_deref() == Some("--write-config") {
        let path = args.next().unwrap_or_else(|| CONFIG_FILE.to_string());
        SimConfig::default()
            .save_to(&path)
            .with_context(|| format!("failed to write {path}"))?;
        return Ok(());
    }
    let path = first.unwrap_or_else(|| CONFIG_FILE.to_string());
    let mut config = SimConfig::load_from(&path);
    config.validate();

    let summary = sim::run(&config).context("simulation failed")?;
    info!(
        ticks = summary.ticks,
        visualized = summary.stats.visualized,
        chunks = summary.stats.chunks,
        grid_slots = summary.stats.grid_slots,
        live_vertices = summary.live_vertices,
        "Simulation finished: {}",
        summary.stats
    );
    Ok(())
}
