//! # rln-board CLI entry point
//!
//! Parses command-line arguments, initializes tracing and dispatches to
//! subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rln_cli::config::{run_config, ConfigArgs};
use rln_cli::demo::{run_demo, DemoArgs};
use rln_cli::load_config;

/// RLN message board
///
/// Membership and rate-limiting engine for a message board built on the
/// Rate-Limiting Nullifier protocol.
#[derive(Parser, Debug)]
#[command(name = "rln-board", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a YAML configuration file. Without it, `RLN_*` environment
    /// variables override the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Alice/Bob/Charlie flow against an in-memory ledger.
    Demo(DemoArgs),

    /// Print the effective board configuration.
    Config(ConfigArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let result = load_config(cli.config.as_deref()).and_then(|config| {
        tracing::debug!(?config, "effective configuration");
        match cli.command {
            Commands::Demo(args) => run_demo(&args, config),
            Commands::Config(args) => run_config(&args, &config),
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
