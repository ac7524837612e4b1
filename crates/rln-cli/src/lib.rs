//! # rln-cli — CLI for the RLN Message Board
//!
//! Provides the `rln-board` command-line interface.
//!
//! ## Subcommands
//!
//! - `rln-board demo` — Run the Alice/Bob/Charlie flow against an in-memory
//!   ledger: register, post, exceed the rate limit, slash, withdraw, and
//!   bring a second replica up to date.
//! - `rln-board config` — Print the effective board configuration as YAML.
//!
//! ```bash
//! rln-board demo --rate-limit 2
//! RLN_TREE_DEPTH=20 rln-board config
//! rln-board --config board.yaml demo --json
//! ```

pub mod config;
pub mod demo;

use std::path::Path;

use anyhow::{Context, Result};

use rln_board::BoardConfig;

/// Resolve the effective configuration: the YAML file when given,
/// otherwise defaults overridden by `RLN_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<BoardConfig> {
    match path {
        Some(path) => BoardConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => BoardConfig::from_env().context("loading configuration from environment"),
    }
}
