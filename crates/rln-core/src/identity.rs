//! # Identity Newtypes
//!
//! Newtype wrappers for every identifier on the board. You cannot pass an
//! `AccountAddress` where an `IdentityCommitment` is expected, and the
//! registry is keyed by [`MemberId`], which is derived from the commitment
//! rather than from any account encoding.
//!
//! ## Security Invariant
//!
//! [`MemberSecret`] never appears in `Debug` output. The only public route
//! from a secret to a public value is [`MemberSecret::commitment`].

use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;
use crate::field::FieldElement;
use crate::hash::FieldHasher;

/// Identifier of a board's group, drawn uniformly from the field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(FieldElement);

impl GroupId {
    /// Generate a fresh group identifier from the thread RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generate a group identifier from an explicit RNG.
    pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        Self(FieldElement::random(rng))
    }

    /// Wrap an existing field value (e.g. one read back from the ledger).
    pub fn from_field(value: FieldElement) -> Self {
        Self(value)
    }

    /// Access the inner field element.
    pub fn as_field(&self) -> &FieldElement {
        &self.0
    }
}

/// A ledger account address (the owner of stake and counter records).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountAddress(String);

impl AccountAddress {
    /// Validate and wrap an address string.
    pub fn new(address: impl Into<String>) -> Result<Self, IdentityError> {
        let address = address.into();
        if address.is_empty() {
            return Err(IdentityError::EmptyAddress);
        }
        if address.chars().any(char::is_whitespace) {
            return Err(IdentityError::InvalidAddress(address));
        }
        Ok(Self(address))
    }

    /// Access the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A member's private identity secret.
#[derive(Clone, PartialEq, Eq)]
pub struct MemberSecret(FieldElement);

impl MemberSecret {
    /// Generate a fresh secret from the thread RNG.
    pub fn random() -> Self {
        Self(FieldElement::random(&mut rand::thread_rng()))
    }

    /// Wrap an existing field value.
    pub fn from_field(value: FieldElement) -> Self {
        Self(value)
    }

    /// Parse a secret from its decimal (or `...field`) encoding.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        Ok(Self(raw.parse()?))
    }

    /// The secret as a field element. Only proving code should call this.
    pub fn expose(&self) -> &FieldElement {
        &self.0
    }

    /// Derive the public identity commitment `H([secret])`.
    pub fn commitment(&self, hasher: &dyn FieldHasher) -> IdentityCommitment {
        IdentityCommitment(hasher.hash(std::slice::from_ref(&self.0)))
    }
}

impl std::fmt::Debug for MemberSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MemberSecret([REDACTED])")
    }
}

/// The public membership marker stored as a tree leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityCommitment(FieldElement);

impl IdentityCommitment {
    /// Wrap a commitment value received from elsewhere (ledger events, UI).
    pub fn from_field(value: FieldElement) -> Self {
        Self(value)
    }

    /// Access the inner field element.
    pub fn as_field(&self) -> &FieldElement {
        &self.0
    }

    /// The registry key for this commitment.
    pub fn member_id(&self) -> MemberId {
        MemberId(self.0.clone())
    }
}

/// Registry key for a member, derived from the identity commitment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(FieldElement);

impl MemberId {
    /// Access the inner field element.
    pub fn as_field(&self) -> &FieldElement {
        &self.0
    }
}

impl From<&IdentityCommitment> for MemberId {
    fn from(commitment: &IdentityCommitment) -> Self {
        commitment.member_id()
    }
}

/// Unique identifier for one board transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new random request identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group:{}", self.0.abbreviated())
    }
}

impl std::fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for IdentityCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "commitment:{}", self.0.abbreviated())
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member:{}", self.0.abbreviated())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request:{}", self.0)
    }
}
