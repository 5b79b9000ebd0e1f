//! # Arm HAL Binary
//!
//! Brings up the EtherCAT bus of a multi-joint servo arm, commissions every
//! CiA402 drive and runs the cyclic exchange until SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Run against the simulated bus with built-in defaults
//! arm_hal --simulate
//!
//! # Run with a config file and RT placement
//! arm_hal --config /etc/arm/arm.toml --master simulation --cpu-core 3 --rt-priority 80
//!
//! # Real hardware (binary built with `--features igh`)
//! arm_hal --config /etc/arm/arm.toml --master igh --cpu-core 3 --rt-priority 80
//!
//! # Verbose logging, JSON output
//! arm_hal -s -v --json
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use arm_common::config::{ArmConfig, ConfigError, ConfigLoader, LogLevel};
use arm_common::consts::DEFAULT_CONFIG_PATH;
use arm_common::joint::{JointCommand, JointStateMsg};
use arm_hal::drivers::simulation;
use arm_hal::{ArmCore, RtOptions};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Arm HAL - EtherCAT CiA402 arm interface
#[derive(Parser, Debug)]
#[command(name = "arm_hal")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "EtherCAT master lifecycle, CiA402 commissioning and cyclic exchange")]
#[command(long_about = None)]
struct Args {
    /// Path to the arm configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated bus (built-in defaults if the config file is missing)
    #[arg(short = 's', long)]
    simulate: bool,

    /// Master backend name
    #[arg(short, long, default_value = simulation::DRIVER_NAME)]
    master: String,

    /// Pin the loop thread to this CPU core
    #[arg(long, value_name = "CORE")]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority of the loop thread (with --cpu-core)
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("Arm HAL failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match ArmConfig::load(&args.config) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) if args.simulate => {
            setup_tracing(&args, LogLevel::default());
            warn!(
                "Config file {:?} not found, using built-in defaults",
                args.config
            );
            return start(&args, ArmConfig::default());
        }
        Err(e) => {
            setup_tracing(&args, LogLevel::default());
            return Err(format!("Failed to load {:?}: {}", args.config, e).into());
        }
    };
    setup_tracing(&args, config.shared.log_level);
    info!("Loaded config from {:?}", args.config);
    start(&args, config)
}

fn start(args: &Args, config: ArmConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Arm HAL v{} starting...", env!("CARGO_PKG_VERSION"));

    let master_name = if args.simulate {
        info!("Simulation mode enabled");
        simulation::DRIVER_NAME
    } else {
        args.master.as_str()
    };

    let mut core = ArmCore::new(config)?;
    if let Some(cpu_core) = args.cpu_core {
        core = core.with_rt(RtOptions {
            cpu_core,
            priority: args.rt_priority,
        });
    }

    let running = core.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    let exchange = core.start(master_name)?;

    // Upstream command source and downstream state consumer attach here.
    let (_command_tx, command_rx) = crossbeam_channel::bounded::<JointCommand>(16);
    let (state_tx, state_rx) = crossbeam_channel::bounded::<JointStateMsg>(16);

    let drain = std::thread::Builder::new()
        .name("arm_state_log".into())
        .spawn(move || {
            for msg in state_rx {
                debug!("State @{}: {:?} {:?}", msg.cycle, msg.names, msg.positions);
            }
        })?;

    core.run(exchange, command_rx, state_tx)?;
    if drain.join().is_err() {
        warn!("State log thread panicked");
    }

    info!("Arm HAL shutdown complete");
    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
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
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
