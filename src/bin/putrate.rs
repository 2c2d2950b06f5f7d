//! putrate command-line driver
//!
//! Feeds measured traces (JSON) into the model and prints flat JSON records
//! for report tooling.
//!
//! # Examples
//!
//! ```bash
//! # Predict S_max from a trace set
//! putrate predict --traces run1.json
//!
//! # Steady-state throughput for an arrival rate of 50k ops/s
//! putrate predict --traces run1.json --arrival-rate 50000
//!
//! # Compare against the measured throughput
//! putrate validate --traces run1.json --measured run1-throughput.json
//!
//! # Print the effective configuration
//! putrate --config putrate.toml config
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use putrate::aggregator::PutRateAggregator;
use putrate::report::FlatRecord;
use putrate::trace::{ThroughputTrace, TimeRange, TraceSet};
use putrate::{AccuracyEvaluator, ModelConfig};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// LSM put-rate prediction
#[derive(Parser, Debug)]
#[command(name = "putrate")]
#[command(version = putrate::VERSION)]
#[command(about = "Predict the sustainable put rate of an LSM storage engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model configuration file (TOML)
    #[arg(long, global = true, env = "PUTRATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "PUTRATE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Predict S_max from a trace set
    Predict(PredictArgs),

    /// Predict, then grade the prediction against measured throughput
    Validate(ValidateArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Trace set (JSON)
    #[arg(short, long)]
    traces: PathBuf,

    /// Arrival rate (ops/s); also reports S_steady
    #[arg(short, long)]
    arrival_rate: Option<f64>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Trace set (JSON)
    #[arg(short, long)]
    traces: PathBuf,

    /// Measured throughput trace (JSON); defaults to the trace set's own
    #[arg(short, long)]
    measured: Option<PathBuf>,

    /// Start of the comparison interval (seconds)
    #[arg(long, requires = "end")]
    start: Option<f64>,

    /// End of the comparison interval (seconds)
    #[arg(long, requires = "start")]
    end: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let config = ModelConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Predict(args) => predict_command(config, args),
        Commands::Validate(args) => validate_command(config, args),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Console logs go to stderr; stdout carries the JSON output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "putrate.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn predict_command(config: ModelConfig, args: PredictArgs) -> anyhow::Result<()> {
    let traces: TraceSet = read_json(&args.traces)?;
    let aggregator = PutRateAggregator::new(config);
    let prediction = aggregator.predict_from_traces(&traces)?;

    let mut map = prediction.to_flat_map();
    if let Some(lambda) = args.arrival_rate {
        let steady = prediction.s_steady(lambda);
        info!(lambda, steady, "Steady-state throughput");
        map.insert("arrival_rate".into(), lambda);
        map.insert("s_steady".into(), steady);
    }

    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

fn validate_command(config: ModelConfig, args: ValidateArgs) -> anyhow::Result<()> {
    let traces: TraceSet = read_json(&args.traces)?;
    let measured = match &args.measured {
        Some(path) => read_json::<ThroughputTrace>(path)?,
        None => traces.throughput.clone(),
    };
    let range = args.start.zip(args.end).map(|(s, e)| TimeRange::new(s, e));

    let evaluator = AccuracyEvaluator::new(config.accuracy.clone());
    let aggregator = PutRateAggregator::new(config);
    let prediction = aggregator.predict_from_traces(&traces)?;
    let record = evaluator
        .evaluate_prediction(&prediction, &measured, range)
        .context("no measured samples inside the comparison interval")?;

    info!(
        predicted = record.predicted,
        actual = record.actual,
        status = %record.status,
        "Validation complete"
    );
    println!("{}", record.to_json()?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}
