//! # rln-crypto — Cryptographic Structures
//!
//! - **Incremental Merkle Tree** (`imt.rs`): fixed-depth, fixed-arity tree of
//!   identity commitments with O(depth) insert/update, index lookup,
//!   inclusion proofs, and side-effect-free root previews.
//! - **RLN shares** (`shares.rs`): the per-post line point, its internal
//!   nullifier, and secret recovery from two points on one line.
//!
//! ## Crate Policy
//!
//! - Depends only on `rln-core` internally.
//! - All hashing goes through `rln_core::FieldHasher`; this crate never picks
//!   a hash function itself.

pub mod imt;
pub mod shares;

pub use imt::{
    compute_proof_root, compute_root_from_leaves, verify_proof, IncrementalMerkleTree,
    MerkleProof, PathStep, TreeConfig, TreeError, DEFAULT_ARITY, DEFAULT_DEPTH,
};
pub use shares::{compute_signal, recover_secret, RlnSignal, Share, ShareError, ShareParams};
