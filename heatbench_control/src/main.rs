//! # Heatbench
//!
//! Powers the boards under test, warms their heaters one by one and logs the
//! supply current until interrupted (Ctrl-C), `--max-ticks` is reached or a
//! fatal fault occurs. Heaters and supply outputs are always switched off
//! before exit.

use clap::Parser;
use heatbench_common::config::{BenchConfig, LogLevel, load_config};
use heatbench_common::consts::DEFAULT_CONFIG_PATH;
use heatbench_control::{BenchDrivers, ControlLoop, StartupError};
use heatbench_hal::{DriverRegistry, create_sink};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Heatbench - heater sequencing and power telemetry
#[derive(Parser, Debug)]
#[command(name = "heatbench")]
#[command(version)]
#[command(about = "Heater sequencing and power telemetry control loop")]
struct Args {
    /// Path to the run configuration TOML.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated power supply and boards regardless of configuration.
    #[arg(long)]
    simulate: bool,

    /// Stop after this many ticks.
    #[arg(long, value_name = "N")]
    max_ticks: Option<u64>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let loaded = load_config(&args.config);
    let level = loaded
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, level);

    info!("Heatbench v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = loaded
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Heatbench shutdown complete");
}

fn run(args: &Args, mut config: BenchConfig) -> Result<(), Box<dyn std::error::Error>> {
    if args.simulate {
        config.power.driver = "simulation".to_string();
        config.board_driver = "simulation".to_string();
    }
    info!(
        "Config OK: boards={:?}, power='{}', boards driver='{}', period={:?}",
        config.board_ids(),
        config.power.driver,
        config.board_driver,
        config.cycle.period()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let registry = DriverRegistry::with_builtin_drivers();

    let mut boards = Vec::with_capacity(config.boards.len());
    for (board, path) in config.boards.iter().zip(config.board_config_paths()) {
        let handle = registry
            .create_board(&config.board_driver, &board.id, &path)
            .map_err(|error| StartupError::Board {
                board_id: board.id.clone(),
                error,
            })?;
        info!("Board '{}' loaded from {}", board.id, path.display());
        boards.push(handle);
    }

    let sink = create_sink(&config.telemetry.sink).map_err(StartupError::from)?;
    let power = registry
        .create_power_supply(&config.power)
        .map_err(StartupError::from)?;
    info!("Power supply '{}' connected", power.name());

    let drivers = BenchDrivers { power, boards, sink };
    let mut control = match ControlLoop::start(&config, drivers, running) {
        Ok(control) => control,
        Err(StartupError::Interrupted) => {
            warn!("Interrupted during startup");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let summary = control.run(args.max_ticks)?;
    info!(
        "Run finished ({:?}): {} ticks, {} overruns, faults={:?}, safety trips={}, dropped points={}",
        summary.reason,
        summary.stats.tick_count,
        summary.stats.overruns,
        summary.faults,
        summary.safety_trips,
        summary.dropped_points
    );
    if !summary.shutdown.is_clean() {
        warn!(
            "{} shutdown step(s) failed",
            summary.shutdown.failures().len()
        );
    }
    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(directive.parse().unwrap_or_else(|_| tracing::Level::INFO.into()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
