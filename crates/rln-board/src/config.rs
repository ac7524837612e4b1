//! Board configuration.
//!
//! Defaults match the deployed message-board program: a binary tree of
//! depth 15, a stake of 100 credits and one post per member per epoch.
//! Override via environment variables or a YAML file.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use rln_crypto::TreeConfig;
use rln_settlement::RetryConfig;

/// Default stake escrowed on registration.
pub const DEFAULT_STAKE_AMOUNT: u64 = 100;

/// Default posts allowed per member per epoch.
pub const DEFAULT_RATE_LIMIT: u64 = 1;

/// Default number of finished transactions kept in the journal.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 256;

/// Configuration for one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Shape of the membership tree.
    pub tree: TreeConfig,
    /// Stake escrowed on registration.
    pub stake_amount: u64,
    /// Posts allowed per member per epoch.
    pub rate_limit: u64,
    /// Finished transactions kept for inspection.
    pub journal_capacity: usize,
    /// Backoff for transient settlement failures.
    pub retry: RetryConfig,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tree: TreeConfig::default(),
            stake_amount: DEFAULT_STAKE_AMOUNT,
            rate_limit: DEFAULT_RATE_LIMIT,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            retry: RetryConfig::default(),
        }
    }
}

impl BoardConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables (all optional, defaults in parentheses):
    /// - `RLN_TREE_DEPTH` (15)
    /// - `RLN_TREE_ARITY` (2)
    /// - `RLN_STAKE_AMOUNT` (100)
    /// - `RLN_RATE_LIMIT` (1)
    /// - `RLN_JOURNAL_CAPACITY` (256)
    /// - `RLN_RETRY_MAX` (3)
    /// - `RLN_RETRY_BASE_MS` (200)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            tree: TreeConfig {
                depth: env_parse("RLN_TREE_DEPTH", defaults.tree.depth)?,
                arity: env_parse("RLN_TREE_ARITY", defaults.tree.arity)?,
                zero_value: defaults.tree.zero_value,
            },
            stake_amount: env_parse("RLN_STAKE_AMOUNT", defaults.stake_amount)?,
            rate_limit: env_parse("RLN_RATE_LIMIT", defaults.rate_limit)?,
            journal_capacity: env_parse("RLN_JOURNAL_CAPACITY", defaults.journal_capacity)?,
            retry: RetryConfig {
                max_retries: env_parse("RLN_RETRY_MAX", defaults.retry.max_retries)?,
                base_delay_ms: env_parse("RLN_RETRY_BASE_MS", defaults.retry.base_delay_ms)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file. Missing keys take defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::Yaml(path.display().to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Yaml("<config>".to_string(), e.to_string()))
    }

    /// Reject shapes no board can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tree
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.stake_amount == 0 {
            return Err(ConfigError::Invalid("stake_amount must be positive".to_string()));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit must be positive".to_string()));
        }
        if self.journal_capacity == 0 {
            return Err(ConfigError::Invalid(
                "journal_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidVar(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but does not parse.
    #[error("invalid value for {0}: {1}")]
    InvalidVar(String, String),
    /// The configuration file could not be read.
    #[error("cannot read {0}: {1}")]
    Io(String, String),
    /// The configuration file is not valid YAML for a board.
    #[error("cannot parse {0}: {1}")]
    Yaml(String, String),
    /// The values parse but describe a board that cannot run.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
