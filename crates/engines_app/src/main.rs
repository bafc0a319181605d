//! # engines_app — Demo
//!
//! Wires an [`EnginesRoot`] to a [`TickScheduler`], registers the demo
//! engines, queues the demo entities and runs the tick loop.
//!
//! ## Startup Sequence
//!
//! 1. Load the optional JSON config, then apply command-line overrides.
//! 2. Create the root on a tick scheduler.
//! 3. Register engines and queue entities.
//! 4. Profiling mode: submit once, log timings, exit. Otherwise run the tick
//!    loop until the tick limit or Ctrl-C.

mod config;
mod demo;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use engines_root::{EnginesRoot, TickScheduler};
use tracing::{info, trace};
use tracing_subscriber::EnvFilter;

use config::AppConfig;

const DEFAULT_FILTER: &str = "engines_app=info,engines_root=info";

#[derive(Parser)]
#[command(name = "engines_app", about = "Engines root demo with deferred entity submission")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Submission ticks per second
    #[arg(long)]
    tick_rate: Option<f64>,

    /// Stop after this many ticks (0 = run until Ctrl-C)
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Build this many entities of each kind and time the build and submission
    #[arg(long)]
    profile: Option<u32>,
}

impl Args {
    /// Merge the config file with command-line overrides.
    fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(tick_rate) = self.tick_rate {
            config.tick.tick_rate = tick_rate;
        }
        if let Some(max_ticks) = self.max_ticks {
            config.tick.max_ticks = max_ticks;
        }
        if let Some(profile) = self.profile {
            config.profile_entities = profile;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let config = Args::parse().into_config()?;
    info!(?config, "engines demo starting");

    let scheduler = TickScheduler::new(config.tick.clone());
    let root = EnginesRoot::new(&scheduler);
    demo::populate(&root, &config)?;
    info!(pending = root.pending_commands(), "entities queued");

    if config.is_profiling() {
        let start = Instant::now();
        let report = scheduler.tick()?;
        info!(
            built = report.built,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "submission profiled"
        );
        return Ok(());
    }

    tokio::select! {
        result = scheduler.run_async(|tick| trace!(tick, "update")) => {
            let ticks = result?;
            info!(ticks, "tick loop finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    info!(?root, "engines demo shut down");
    Ok(())
}
