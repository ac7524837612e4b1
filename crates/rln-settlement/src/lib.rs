//! # rln-settlement — Settlement Layer Interface
//!
//! The board reaches the authoritative ledger only through
//! [`SettlementClient`]. This crate defines that seam and what crosses it:
//!
//! - **Trait** (`traits.rs`): async, `Send + Sync`, injected per board as
//!   `Arc<dyn SettlementClient>`.
//! - **Types** (`types.rs`): one request/receipt pair per transition, plus
//!   the membership events replicas sync from.
//! - **Retry** (`retry.rs`): exponential backoff on `Unavailable` only.
//! - **Ledger** (`ledger.rs`): an in-memory ledger that checks proofs,
//!   roots and records the way the on-chain program does, with fault
//!   injection for tests.
//!
//! ## Crate Policy
//!
//! - Proof generation is out of scope: requests carry the witness (secret,
//!   path, roots) a prover would consume.
//! - A request proven against a root other than the group's current root is
//!   answered with `StaleRoot` and has no effect.

pub mod ledger;
pub mod retry;
pub mod traits;
pub mod types;

pub use ledger::{InMemoryLedger, LedgerOp};
pub use retry::{retry_transient, RetryConfig, RetryingSettlement};
pub use traits::{SettlementClient, SettlementError};
pub use types::{
    CreateGroupRequest, MemberRecords, MembershipChange, MembershipEvent, PostReceipt,
    PostRequest, RegisterReceipt, RegisterRequest, RemovalReason, SlashReceipt, SlashRequest,
    WithdrawReceipt, WithdrawRequest,
};
