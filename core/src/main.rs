//! UKF-TRACK: run the Unscented Kalman Filter against a simulated one-axis target.
//!
//! The filter is built from an optional configuration file (TOML/JSON/YAML) and driven by a fixed-period runner,
//! either on a simulated clock (as fast as possible, deterministic) or in real time. Every cycle is written to a CSV
//! file when `--output` is given.
use clap::Parser;
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use ukf::Estimator;
use ukf::config::FilterConfig;
use ukf::rt::{Clock, PeriodicRunner, SimulatedClock, SystemClock};
use ukf::sim::{TrackingRecord, TrackingScenario, TrackingTask, position_rms};

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "Track a simulated target with a generic Unscented Kalman Filter."
)]
struct Cli {
    /// Filter configuration file (TOML/JSON/YAML); a two-state filter with default tuning when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of filter cycles to run
    #[arg(long, default_value_t = 500)]
    cycles: u64,
    /// Cycle period in milliseconds
    #[arg(long, default_value_t = 10)]
    period_ms: u64,
    /// Seed for the simulated sensor noise
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Standard deviation of the position sensor noise in meters
    #[arg(long, default_value_t = 0.5)]
    noise_std: f64,
    /// Initial target velocity in m/s
    #[arg(long, default_value_t = 1.0)]
    velocity: f64,
    /// Commanded target acceleration in m/s^2
    #[arg(long, default_value_t = 0.2)]
    acceleration: f64,
    /// Process noise intensity (acceleration variance)
    #[arg(long, default_value_t = 0.01)]
    process_noise: f64,
    /// Pace cycles with the wall clock instead of a simulated clock
    #[arg(long)]
    realtime: bool,
    /// Write every cycle to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logger(log_level: &str) {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });
    env_logger::Builder::new().filter_level(level).init();
}

fn run<C: Clock>(clock: C, period: Duration, task: &mut TrackingTask, cycles: u64) -> Result<(), Box<dyn Error>> {
    let mut runner = PeriodicRunner::new(clock, period)?;
    runner.run(task, cycles);
    if runner.overruns() > 0 {
        log::warn!("{} of {} cycles overran", runner.overruns(), runner.cycles());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level);

    let config = match &cli.config {
        Some(path) => {
            info!("Loading filter configuration from {}", path.display());
            FilterConfig::from_file(path)?
        }
        None => FilterConfig {
            state_length: 2,
            initial_covariance: Some(vec![100.0, 10.0]),
            ..Default::default()
        },
    };
    let scenario = TrackingScenario::new(cli.velocity, cli.acceleration, cli.noise_std, cli.seed)?;
    let mut task = TrackingTask::new(&config, scenario, cli.process_noise)?;

    let period = Duration::from_millis(cli.period_ms);
    if cli.realtime {
        run(SystemClock::new(), period, &mut task, cli.cycles)?;
    } else {
        run(SimulatedClock::new(), period, &mut task, cli.cycles)?;
    }

    task.filter.print();
    if let Some((estimate, measurement)) = position_rms(&task.records) {
        info!(
            "Position RMS error: estimate {:.4} m, measurement {:.4} m",
            estimate, measurement
        );
    }
    if let Some(path) = &cli.output {
        TrackingRecord::to_csv(&task.records, path)?;
        info!("Wrote {} records to {}", task.records.len(), path.display());
    }
    Ok(())
}
