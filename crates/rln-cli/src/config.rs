//! # Config Subcommand
//!
//! Prints the configuration a board would run with, after the YAML file
//! or environment overrides are applied.

use anyhow::Result;
use clap::Args;

use rln_board::BoardConfig;

/// Arguments for the `rln-board config` subcommand.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print JSON instead of YAML.
    #[arg(long)]
    pub json: bool,
}

/// Render `config` in the requested format.
pub fn render_config(args: &ConfigArgs, config: &BoardConfig) -> Result<String> {
    if args.json {
        Ok(serde_json::to_string_pretty(config)?)
    } else {
        Ok(config.to_yaml()?)
    }
}

/// Execute the config subcommand.
pub fn run_config(args: &ConfigArgs, config: &BoardConfig) -> Result<u8> {
    println!("{}", render_config(args, config)?.trim_end());
    Ok(0)
}
