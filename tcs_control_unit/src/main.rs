//! # TCS Control Unit
//!
//! Observatory control daemon. Loads the observatory TOML, opens the
//! hardware binding it names and one FIFO pair per command channel,
//! performs RT setup and runs the control loop until SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tcs_common::config::LogLevel;
use tcs_common::consts::{DEFAULT_CONFIG_PATH, DEFAULT_FIFO_DIR};
use tcs_common::time::Timestamp;
use tcs_control_unit::command::FifoTransport;
use tcs_control_unit::config::{LoadedConfig, load_config};
use tcs_control_unit::cycle::{CycleRunner, rt_setup};
use tcs_hal::BindingRegistry;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// TCS Control Unit: telescope, dome and instrument motion control
#[derive(Parser, Debug)]
#[command(name = "tcs_control_unit")]
#[command(version)]
#[command(about = "Real-time control loop for a robotic observatory")]
struct Args {
    /// Observatory configuration TOML.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run against the simulation binding whatever the config names.
    #[arg(long)]
    no_hardware: bool,

    /// Reset the hardware binding before initialising it.
    #[arg(long)]
    reset: bool,

    /// CPU core to pin the RT thread to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

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
        .map(|c| c.observatory.cycle.log_level)
        .unwrap_or_default();
    setup_tracing(&args, level);

    info!("TCS Control Unit v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = loaded
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("TCS Control Unit shutdown complete");
}

fn run(args: &Args, mut config: LoadedConfig) -> Result<(), Box<dyn std::error::Error>> {
    if args.no_hardware {
        config.observatory.hardware.driver = "simulation".to_string();
    }
    info!(
        "Config OK: {} (cycle={}ms, driver={}, mesh points={})",
        args.config.display(),
        config.observatory.cycle.cycle_time_ms,
        config.observatory.hardware.driver,
        config.mesh.len(),
    );

    let registry = BindingRegistry::with_builtin();
    let mut hw = registry.create(&config.observatory.hardware.driver, &config.observatory)?;
    if args.reset {
        warn!("resetting hardware binding '{}'", hw.name());
        hw.reset()?;
    }

    let fifo_dir = config
        .observatory
        .channels
        .fifo_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FIFO_DIR));
    let transport = FifoTransport::open(&fifo_dir)?;

    let mut runner = CycleRunner::new(config, hw, Box::new(transport), Timestamp::now())?;
    info!("CycleRunner initialized");

    rt_setup(args.cpu_core, args.rt_priority)?;
    info!(
        "RT setup complete (cpu_core={}, priority={})",
        args.cpu_core, args.rt_priority
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    runner.run(&running)?;
    Ok(())
}

/// Setup tracing subscriber. `RUST_LOG` wins over the configured level;
/// `--verbose` forces DEBUG.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

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
