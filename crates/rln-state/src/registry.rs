//! # Membership Registry
//!
//! Maps identity commitments to tree positions and to the member's cached
//! ledger records. The registry owns the Merkle tree outright; no other
//! component can write a leaf.
//!
//! ## Security Invariant
//!
//! Every live (non-zero) leaf has exactly one [`Member`] entry and every
//! entry points at a leaf holding its own commitment. Each method that
//! touches one side touches the other in the same call, and tree errors are
//! raised before either side changes. [`MembershipRegistry::check_consistency`]
//! verifies the invariant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rln_core::{
    AccountAddress, FieldElement, IdentityCommitment, MemberId, MessageCounterRecord, StakeToken,
};
use rln_crypto::{IncrementalMerkleTree, MerkleProof, TreeError};

/// Errors from registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The commitment is already a live member.
    #[error("{0} is already a member")]
    DuplicateMember(MemberId),

    /// No live member holds this commitment.
    #[error("{0} is not a member")]
    NotFound(MemberId),

    /// The commitment equals the tree's zero value and cannot be a leaf.
    #[error("commitment equals the tree zero value")]
    ZeroCommitment,

    /// The slot a member should be restored to is no longer vacant.
    #[error("slot {index} is occupied; cannot restore {member}")]
    SlotOccupied {
        /// The member being restored.
        member: MemberId,
        /// The slot it held.
        index: usize,
    },

    /// An imported leaf does not land where the source says it should.
    #[error("announced index {announced} for {member} but the next local slot is {next}")]
    IndexMismatch {
        /// The member being imported.
        member: MemberId,
        /// Index reported by the source.
        announced: usize,
        /// Next index the local tree would assign.
        next: usize,
    },

    /// Registry and tree disagree.
    #[error("registry diverged from tree: {0}")]
    Diverged(String),

    /// Underlying tree failure.
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
}

/// A live member of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Registry key.
    pub id: MemberId,
    /// Leaf value.
    pub commitment: IdentityCommitment,
    /// Leaf index in the tree.
    pub index: usize,
    /// Owner of the member's ledger records.
    pub account: AccountAddress,
    /// Cached stake record, if this replica has seen it.
    pub stake: Option<StakeToken>,
    /// Cached message counter record, if this replica has seen it.
    pub counter: Option<MessageCounterRecord>,
    /// When the member was added to this registry.
    pub joined_at: DateTime<Utc>,
}

/// Result of a registration: where the leaf went and the two roots the
/// ledger needs to check the transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The new member's key.
    pub member: MemberId,
    /// Assigned leaf index.
    pub index: usize,
    /// Root before the insert.
    pub old_root: FieldElement,
    /// Root after the insert.
    pub new_root: FieldElement,
}

/// Registry of live members over an owned incremental Merkle tree.
#[derive(Debug, Clone)]
pub struct MembershipRegistry {
    tree: IncrementalMerkleTree,
    members: HashMap<MemberId, Member>,
}

impl MembershipRegistry {
    /// Create a registry over an empty tree.
    pub fn new(tree: IncrementalMerkleTree) -> Self {
        Self {
            tree,
            members: HashMap::new(),
        }
    }

    /// Read-only view of the tree.
    pub fn tree(&self) -> &IncrementalMerkleTree {
        &self.tree
    }

    /// Current root.
    pub fn root(&self) -> &FieldElement {
        self.tree.root()
    }

    /// Number of live members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no live members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Live members ordered by leaf index.
    pub fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        members.sort_by_key(|m| m.index);
        members
    }

    /// Whether `commitment` is a live member.
    pub fn contains(&self, commitment: &IdentityCommitment) -> bool {
        self.members.contains_key(&commitment.member_id())
    }

    /// Root after registering `commitment`, without registering.
    ///
    /// Fails the same way [`register`](Self::register) would: duplicate,
    /// zero commitment, or a full tree.
    pub fn preview_register(
        &self,
        commitment: &IdentityCommitment,
    ) -> Result<FieldElement, RegistryError> {
        let id = commitment.member_id();
        if self.members.contains_key(&id) {
            return Err(RegistryError::DuplicateMember(id));
        }
        if commitment.as_field() == &self.tree.config().zero_value {
            return Err(RegistryError::ZeroCommitment);
        }
        Ok(self.tree.preview_insert(commitment.as_field())?)
    }

    /// Append a new member leaf.
    pub fn register(
        &mut self,
        commitment: IdentityCommitment,
        account: AccountAddress,
    ) -> Result<Registration, RegistryError> {
        let id = commitment.member_id();
        if self.members.contains_key(&id) {
            return Err(RegistryError::DuplicateMember(id));
        }
        if commitment.as_field() == &self.tree.config().zero_value {
            return Err(RegistryError::ZeroCommitment);
        }
        let old_root = self.tree.root().clone();
        let index = self.tree.insert(commitment.as_field().clone())?;
        let new_root = self.tree.root().clone();
        self.members.insert(
            id.clone(),
            Member {
                id: id.clone(),
                commitment,
                index,
                account,
                stake: None,
                counter: None,
                joined_at: Utc::now(),
            },
        );
        Ok(Registration {
            member: id,
            index,
            old_root,
            new_root,
        })
    }

    /// Undo an unconfirmed [`register`](Self::register), releasing the slot.
    ///
    /// The compensating action for a registration the ledger rejected: the
    /// entry is removed and the tree shrinks back so the next insert reuses
    /// the same index.
    pub fn unregister(&mut self, commitment: &IdentityCommitment) -> Result<Member, RegistryError> {
        let id = commitment.member_id();
        let index = self.lookup(commitment)?.index;
        self.tree.rollback_insert(index)?;
        self.members
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Look up a live member.
    pub fn lookup(&self, commitment: &IdentityCommitment) -> Result<&Member, RegistryError> {
        let id = commitment.member_id();
        self.members.get(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Remove a live member, zeroing their leaf. Fails with `NotFound` if
    /// the member was already revoked; the tree is not touched in that case.
    pub fn revoke(&mut self, commitment: &IdentityCommitment) -> Result<Member, RegistryError> {
        let id = commitment.member_id();
        let index = self.lookup(commitment)?.index;
        self.tree.remove(index)?;
        self.members
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Root after revoking `commitment`, without revoking.
    pub fn preview_revoke(
        &self,
        commitment: &IdentityCommitment,
    ) -> Result<FieldElement, RegistryError> {
        let index = self.lookup(commitment)?.index;
        let zero = self.tree.config().zero_value.clone();
        Ok(self.tree.preview_update(index, &zero)?)
    }

    /// Put a revoked member back at its original index.
    pub fn restore(&mut self, member: Member) -> Result<(), RegistryError> {
        if self.members.contains_key(&member.id) {
            return Err(RegistryError::DuplicateMember(member.id));
        }
        if !self.tree.is_vacant(member.index)? {
            return Err(RegistryError::SlotOccupied {
                member: member.id,
                index: member.index,
            });
        }
        self.tree
            .update(member.index, member.commitment.as_field().clone())?;
        self.members.insert(member.id.clone(), member);
        Ok(())
    }

    /// Adopt a member learned from the ledger at the index it announced.
    ///
    /// The announced index must be the next free slot; anything else means
    /// this replica missed or reordered an event.
    pub fn import(
        &mut self,
        commitment: IdentityCommitment,
        account: AccountAddress,
        index: usize,
    ) -> Result<Registration, RegistryError> {
        let next = self.tree.size();
        if index != next {
            return Err(RegistryError::IndexMismatch {
                member: commitment.member_id(),
                announced: index,
                next,
            });
        }
        self.register(commitment, account)
    }

    /// Replace a member's cached ledger records as one unit.
    pub fn set_records(
        &mut self,
        commitment: &IdentityCommitment,
        stake: Option<StakeToken>,
        counter: Option<MessageCounterRecord>,
    ) -> Result<(), RegistryError> {
        let id = commitment.member_id();
        let member = self
            .members
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        if stake.is_some() {
            member.stake = stake;
        }
        if counter.is_some() {
            member.counter = counter;
        }
        Ok(())
    }

    /// Forget a member's cached ledger records; the next use refetches them.
    pub fn clear_records(&mut self, commitment: &IdentityCommitment) -> Result<(), RegistryError> {
        let id = commitment.member_id();
        let member = self
            .members
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        member.stake = None;
        member.counter = None;
        Ok(())
    }

    /// Forget every member's cached ledger records.
    pub fn clear_all_records(&mut self) {
        for member in self.members.values_mut() {
            member.stake = None;
            member.counter = None;
        }
    }

    /// Inclusion proof for a live member against the current root.
    pub fn proof(&self, commitment: &IdentityCommitment) -> Result<MerkleProof, RegistryError> {
        let index = self.lookup(commitment)?.index;
        Ok(self.tree.create_proof(index)?)
    }

    /// Verify the leaf/entry one-to-one invariant.
    pub fn check_consistency(&self) -> Result<(), RegistryError> {
        for member in self.members.values() {
            let leaf = self.tree.leaf(member.index)?;
            if leaf != member.commitment.as_field() {
                return Err(RegistryError::Diverged(format!(
                    "{} expects leaf {} to hold its commitment",
                    member.id, member.index
                )));
            }
        }
        let live = self.tree.live_count();
        if live != self.members.len() {
            return Err(RegistryError::Diverged(format!(
                "{live} live leaves but {} members",
                self.members.len()
            )));
        }
        Ok(())
    }
}
