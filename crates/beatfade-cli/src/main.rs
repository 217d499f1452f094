//! beatfade CLI - The `beatfade` command.
//!
//! Drives the automation engine from a simulated host so fades and beat
//! programs can be watched without a live session.
//!
//! # Architecture
//!
//! - **beatfade-core**: Target registry, fade engine, program scheduler, session
//! - **simulate**: In-memory host (parameters, manual clock, beat events)

mod simulate;

use anyhow::{Context, Result};
use beatfade_core::{AutomationConfig, ProgramKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// beatfade - Beat-locked parameter automation
#[derive(Parser, Debug)]
#[command(name = "beatfade")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parameter fades and beat-quantized programs for control surfaces", long_about = None)]
struct Args {
    /// Log every step and tick
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulated host session
    Simulate(SimulateArgs),

    /// Print the effective configuration
    Config {
        /// Configuration file to read instead of the default location
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Write a commented default config file to the default location
        #[arg(long)]
        init: bool,
    },

    /// Show version information
    Version,
}

/// Arguments for the `simulate` subcommand
#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Host tempo in BPM
    #[arg(long, default_value_t = 120.0)]
    pub tempo: f64,

    /// Simulated wall-clock length in seconds
    #[arg(long, default_value_t = 16.0)]
    pub seconds: f64,

    /// Fade length in bars (defaults to the configured length)
    #[arg(long)]
    pub bars: Option<f64>,

    /// Program to arm on the beat-repeat device: buildup, next4 or next8
    #[arg(long, value_parser = parse_program)]
    pub program: Option<ProgramKind>,

    /// Configuration file to read instead of the default location
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

fn parse_program(name: &str) -> std::result::Result<ProgramKind, String> {
    ProgramKind::parse(&name.to_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = ProgramKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown program '{}' (expected one of: {})", name, known.join(", "))
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    match args.command {
        Commands::Simulate(sim) => {
            let config = load_config(sim.config.as_deref())?;
            let report = simulate::run(&sim, config)?;
            println!("{}", report);
            Ok(())
        }
        Commands::Config { config, init } => {
            if init {
                let path = AutomationConfig::create_default_config_file()
                    .context("Failed to write default config file")?;
                println!("Wrote {}", path.display());
                return Ok(());
            }
            let config = load_config(config.as_deref())?;
            let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{}", text);
            Ok(())
        }
        Commands::Version => {
            println!("beatfade {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// An explicit path must load; the default location falls back to defaults.
fn load_config(path: Option<&std::path::Path>) -> Result<AutomationConfig> {
    match path {
        Some(path) => AutomationConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(AutomationConfig::load_or_default(None)),
    }
}

fn init_logger(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}
