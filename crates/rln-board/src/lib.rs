//! # rln-board — Board Protocol State Machine
//!
//! A [`Board`] is a replica of one message-board group. It owns the local
//! membership tree, registry and message log, and keeps them consistent
//! with the ledger reached through an injected
//! [`SettlementClient`](rln_settlement::SettlementClient).
//!
//! ## Operations
//!
//! | Operation | Discipline | Local change |
//! |---|---|---|
//! | `register` | mutate, then compensate | leaf appended before dispatch, released on failure |
//! | `post_message` | propose, then apply | message logged after confirmation |
//! | `withdraw_stake` | mutate, then compensate | leaf zeroed before dispatch, restored on failure |
//! | `slash` | propose, then apply | offender removed after confirmation |
//! | `sync` | replay | ledger membership events applied in order |
//!
//! ## Crate Policy
//!
//! - No operation returns success before the ledger confirmed it and local
//!   state agrees.
//! - Rate-limit violations are results, not errors.

pub mod board;
pub mod config;
pub mod error;

pub use board::{Board, BoardSnapshot, BoardStatus, PostResult, SlashEvent, SlashOutcome, SyncReport};
pub use config::{BoardConfig, ConfigError};
pub use error::BoardError;
