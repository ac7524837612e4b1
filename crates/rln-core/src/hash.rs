//! # Field Hashing
//!
//! The hashing seam for every derived protocol value: identity commitments
//! (`H([secret])`), Merkle nodes (`H(children)`), RLN line slopes and
//! internal nullifiers.
//!
//! ## Security Invariant
//!
//! Implementations must be pure and deterministic: the board, the ledger and
//! every replica recompute the same roots independently, so one hasher
//! instance must be shared (or configured identically) across all of them.
//!
//! The bundled [`Sha256FieldHasher`] is domain-separated SHA-256 over the
//! fixed-width encoding of the inputs, reduced into the field. Deployments
//! proving against the on-chain circuit inject their Poseidon implementation
//! through [`FieldHasher`] instead.

use sha2::{Digest, Sha256};

use crate::field::FieldElement;

/// Deterministic hash from a sequence of field elements to one field element.
pub trait FieldHasher: Send + Sync {
    /// Hash `inputs` in order.
    fn hash(&self, inputs: &[FieldElement]) -> FieldElement;

    /// Human-readable backend name, recorded in logs.
    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// Domain tag prefixed to every [`Sha256FieldHasher`] input.
const HASH_DOMAIN: &[u8] = b"rln-board.field-hash.v1";

/// Domain tag for mapping message contents into the field.
const MESSAGE_DOMAIN: &[u8] = b"rln-board.message.v1";

/// SHA-256 based [`FieldHasher`].
///
/// Input layout: `domain || len(inputs) as u32 BE || input_0 || ... || input_n`,
/// each input as 32 big-endian bytes. The length prefix keeps `H([a, b])`
/// distinct from `H([a])` followed by any padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256FieldHasher;

impl FieldHasher for Sha256FieldHasher {
    fn hash(&self, inputs: &[FieldElement]) -> FieldElement {
        let mut hasher = Sha256::new();
        hasher.update(HASH_DOMAIN);
        hasher.update((inputs.len() as u32).to_be_bytes());
        for input in inputs {
            hasher.update(input.to_bytes_be());
        }
        FieldElement::from_bytes_mod_order(&hasher.finalize())
    }

    fn name(&self) -> &'static str {
        "sha256"
    }
}

/// Map message content into the field (the `x` coordinate of an RLN share).
pub fn message_to_field(content: &str) -> FieldElement {
    let mut hasher = Sha256::new();
    hasher.update(MESSAGE_DOMAIN);
    hasher.update(content.as_bytes());
    FieldElement::from_bytes_mod_order(&hasher.finalize())
}
