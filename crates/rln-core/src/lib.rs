//! # rln-core — Foundational Types for the RLN Message Board
//!
//! This crate is the leaf of the workspace DAG. It defines the primitives
//! every other crate speaks in: field elements, identity newtypes, the
//! ledger record types a member holds, and the hashing seam through which
//! all commitments and tree nodes are computed.
//!
//! ## Key Design Principles
//!
//! 1. **One field type.** Every protocol value (commitments, roots, group
//!    ids, shares) is a [`FieldElement`] reduced modulo the Aleo base field.
//!    Values outside the field cannot be constructed.
//!
//! 2. **Newtype wrappers for identifiers.** `GroupId`, `IdentityCommitment`,
//!    `MemberId`, `AccountAddress`, `RequestId` are distinct types. A member is
//!    keyed by `MemberId` derived from the commitment, never by an account
//!    string.
//!
//! 3. **Hashing is injected.** [`FieldHasher`] is the only way to derive a
//!    commitment or a tree node. The bundled [`Sha256FieldHasher`] is a
//!    deterministic stand-in; a circuit-compatible Poseidon backend plugs into
//!    the same trait.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `rln-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod field;
pub mod hash;
pub mod identity;
pub mod records;

// Re-export primary types for ergonomic imports.
pub use error::{FieldError, IdentityError};
pub use field::{FieldElement, FIELD_MODULUS_DECIMAL};
pub use hash::{message_to_field, FieldHasher, Sha256FieldHasher};
pub use identity::{
    AccountAddress, GroupId, IdentityCommitment, MemberId, MemberSecret, RequestId,
};
pub use records::{MessageCounterRecord, StakeToken};
