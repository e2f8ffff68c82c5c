//! PLC tick daemon entry point.
//!
//! Runs the built-in blink program on a periodic scheduler thread until a
//! signal, the run duration or the cycle limit ends it, then stops the
//! controller and logs a summary.

mod program;
mod signals;

use anyhow::{bail, Context, Result};
use clap::Parser;
use plc_common::config::{RearmPolicy, RuntimeConfig};
use plc_runtime::debug_image::DebugImage;
use plc_runtime::lifecycle::LifecycleController;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::program::BlinkProgram;
use crate::signals::{wait_for_shutdown, ShutdownReason};

/// How often the main thread logs progress.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// PLC tick daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "plc-daemon",
    about = "Periodic control-program runtime",
    version,
    long_about = None
)]
struct Args {
    /// Path to a runtime configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tick period, e.g. "10ms" (overrides config file).
    #[arg(long, short = 't', value_parser = humantime::parse_duration)]
    tick: Option<Duration>,

    /// Arm each deadline from the previous one instead of from cycle completion.
    #[arg(long)]
    fixed_rate: bool,

    /// Stop after this long, e.g. "30s".
    #[arg(long, value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,

    /// Maximum cycles to run (0 = infinite).
    #[arg(long, default_value = "0")]
    max_cycles: u64,

    /// Attach a thread that waits for every published debug snapshot.
    #[arg(long)]
    debug_consumer: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Arguments passed to the control program's init.
    #[arg(last = true)]
    program_args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting PLC tick daemon");

    let mut config = load_config(&args)?;
    if let Some(tick) = args.tick {
        config.tick_period = tick;
    }
    if args.fixed_rate {
        config.rearm = RearmPolicy::FixedRate;
    }
    info!(tick = ?config.tick_period, rearm = ?config.rearm, "Configuration loaded");

    run_daemon(config, &args)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("plc_daemon={level},plc_runtime={level},plc_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `PLC_CONFIG_PATH` environment variable
/// 3. `/etc/plc/tick.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<RuntimeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return RuntimeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("PLC_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from PLC_CONFIG_PATH");
            return RuntimeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from PLC_CONFIG_PATH={env_path:?}"));
        }
        warn!(path = %env_path, "PLC_CONFIG_PATH set but file does not exist, checking other locations");
    }

    for candidate in ["/etc/plc/tick.toml", "config/default.toml"] {
        let config_path = PathBuf::from(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return RuntimeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(RuntimeConfig::default())
}

fn run_daemon(config: RuntimeConfig, args: &Args) -> Result<()> {
    let mut controller = LifecycleController::new(BlinkProgram::default(), config);
    controller
        .start(&args.program_args)
        .context("Failed to start control program")?;

    let consumer = if args.debug_consumer {
        let image = controller
            .debug_image()
            .context("Debug image missing on a running controller")?;
        Some(spawn_debug_consumer(image)?)
    } else {
        None
    };

    let started = Instant::now();
    let mut last_status = Instant::now();
    let reason = wait_for_shutdown(args.run_for, || {
        if controller.loop_finished() {
            return Some(ShutdownReason::LoopExited);
        }
        let cycles = controller.cycle_count();
        if args.max_cycles > 0 && cycles >= args.max_cycles {
            return Some(ShutdownReason::CycleLimit);
        }
        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            info!(cycles, phase = %controller.scheduler_phase(), "Periodic status");
        }
        None
    })
    .context("Failed to wait for shutdown signals")?;

    info!(%reason, "Shutting down...");
    let report = controller.stop().context("Failed to stop control program")?;

    if let Some(consumer) = consumer {
        match consumer.join() {
            Ok(received) => info!(received, "Debug consumer finished"),
            Err(_) => warn!("Debug consumer thread panicked"),
        }
    }

    let snapshot = report.metrics.snapshot();
    info!(
        cycles = report.cycles,
        skipped = report.skipped,
        timer_failures = report.timer_failures,
        cycle_faults = report.cycle_faults,
        jitter_ns = snapshot.jitter_ns(),
        uptime_secs = started.elapsed().as_secs(),
        "Daemon shutdown complete"
    );
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(metrics = %json, "Cycle metrics"),
        Err(e) => warn!(error = %e, "Could not serialize cycle metrics"),
    }

    if !report.exit.is_clean() {
        bail!("Scheduler loop ended abnormally: {:?}", report.exit);
    }
    Ok(())
}

/// Drain snapshots until the controller closes the debug gate.
///
/// Returns the number of snapshots received.
fn spawn_debug_consumer(image: Arc<DebugImage>) -> Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("plc-debug".into())
        .spawn(move || {
            let mut received = 0u64;
            loop {
                match image.wait_debug_data() {
                    Ok(Some(snapshot)) => {
                        received += 1;
                        debug!(
                            tick = snapshot.tick,
                            image = %String::from_utf8_lossy(&snapshot.data),
                            "Debug snapshot"
                        );
                    }
                    Ok(None) => {}
                    Err(e) if e.is_shutdown() => break,
                    Err(e) => {
                        warn!(error = %e, "Debug wait failed");
                        break;
                    }
                }
            }
            received
        })
        .context("Failed to spawn debug consumer thread")
}
