//! # rln-state — Local Board State
//!
//! The state a board keeps on its own side of the ledger:
//!
//! - **Registry** (`registry.rs`): live members keyed by `MemberId`, their
//!   leaf indices, and their cached stake and counter records. Owns the
//!   commitment tree and keeps the two in lockstep.
//!
//! - **Message log** (`log.rs`): confirmed posts in arrival order.
//!
//! - **Transactions** (`transaction.rs`): the `Proving → Settling →
//!   Applied/Rejected` lifecycle of each board operation and a bounded
//!   journal of finished ones.
//!
//! ## Design
//!
//! Nothing in this crate talks to the ledger or takes locks. The board
//! crate serializes access; this crate guarantees that each individual
//! call either fully applies or leaves state untouched.

pub mod log;
pub mod registry;
pub mod transaction;

pub use log::{MessageLog, MessageRecord, NewMessage};
pub use registry::{Member, MembershipRegistry, Registration, RegistryError};
pub use transaction::{
    PhaseTransition, TransactionError, TransactionJournal, TransactionKind, TransactionPhase,
    TransactionRecord,
};
