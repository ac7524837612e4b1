//! # Settlement Requests and Receipts
//!
//! The payloads exchanged with the settlement layer. Requests carry
//! everything a proof of the transition needs (secret, Merkle path, the
//! roots before and after); receipts carry the records the ledger issued.
//!
//! Requests holding a [`MemberSecret`] are deliberately not `Serialize`:
//! they are handed to a prover, never written out.

use serde::{Deserialize, Serialize};

use rln_core::{
    AccountAddress, FieldElement, GroupId, IdentityCommitment, MemberSecret,
    MessageCounterRecord, StakeToken,
};
use rln_crypto::{MerkleProof, ShareParams, TreeConfig};

/// Create a new group with an empty membership tree.
#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    /// New group identifier.
    pub group_id: GroupId,
    /// Account creating the board.
    pub creator: AccountAddress,
    /// Tree shape shared by every replica of the group.
    pub tree: TreeConfig,
    /// Root of the empty tree.
    pub root: FieldElement,
    /// Posts allowed per member per epoch.
    pub rate_limit: u64,
}

/// Join the group: stake and insert a commitment.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    /// Target group.
    pub group_id: GroupId,
    /// Identity secret; the ledger proves `H([secret])` is the new leaf.
    pub secret: MemberSecret,
    /// Unspent stake record to escrow.
    pub stake: StakeToken,
    /// Root the insertion was computed against.
    pub old_root: FieldElement,
    /// Root after the insertion.
    pub new_root: FieldElement,
}

/// Records issued on registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReceipt {
    /// Escrowed stake record.
    pub stake: StakeToken,
    /// Fresh message counter.
    pub counter: MessageCounterRecord,
    /// Index the ledger assigned.
    pub index: usize,
    /// Sequence number of the membership event.
    pub event_seq: u64,
}

/// Post a message under the rate limit.
#[derive(Debug, Clone)]
pub struct PostRequest {
    /// Target group.
    pub group_id: GroupId,
    /// The group's external nullifier.
    pub nullifier: FieldElement,
    /// Owner of the counter record.
    pub address: AccountAddress,
    /// Identity secret.
    pub secret: MemberSecret,
    /// Leaf index of the poster.
    pub index: usize,
    /// Message body.
    pub message: String,
    /// RLN message id (`< rate_limit`).
    pub message_id: u64,
    /// Current (unspent) counter record.
    pub counter: MessageCounterRecord,
    /// Membership proof; `proof.root` is the root it was built against.
    pub proof: MerkleProof,
}

/// Outcome of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    /// Successor counter record.
    pub counter: MessageCounterRecord,
    /// Whether this post went over the rate limit.
    pub exceeded: bool,
}

/// Leave the group and reclaim stake.
#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    /// Target group.
    pub group_id: GroupId,
    /// Owner of the stake record.
    pub address: AccountAddress,
    /// Identity secret.
    pub secret: MemberSecret,
    /// Leaf index being vacated.
    pub index: usize,
    /// Escrowed stake record.
    pub stake: StakeToken,
    /// Current counter record.
    pub counter: MessageCounterRecord,
    /// Membership proof against the pre-withdrawal root.
    pub proof: MerkleProof,
    /// Root after vacating the leaf.
    pub new_root: FieldElement,
}

/// Refund issued on withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    /// Unescrowed stake record.
    pub refund: StakeToken,
    /// Sequence number of the membership event.
    pub event_seq: u64,
}

/// Slash an offender whose secret two shares reveal.
#[derive(Debug, Clone)]
pub struct SlashRequest {
    /// Target group.
    pub group_id: GroupId,
    /// Slasher's account.
    pub slasher: AccountAddress,
    /// Slasher's identity secret.
    pub slasher_secret: MemberSecret,
    /// Offender's leaf value.
    pub offender: IdentityCommitment,
    /// Two points on the offender's line.
    pub shares: ShareParams,
    /// Slasher's escrowed stake record.
    pub stake: StakeToken,
    /// Slasher's membership proof.
    pub proof: MerkleProof,
    /// Root after vacating the offender's leaf.
    pub new_root: FieldElement,
}

/// Outcome of a slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashReceipt {
    /// Slasher's new stake record, including the forfeited stake.
    pub stake: StakeToken,
    /// Amount taken from the offender.
    pub forfeited: u64,
    /// Sequence number of the membership event.
    pub event_seq: u64,
}

/// A member's current records as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecords {
    /// Escrowed stake record.
    pub stake: StakeToken,
    /// Current counter record.
    pub counter: MessageCounterRecord,
}

/// Why a leaf was vacated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalReason {
    /// The member withdrew their stake.
    Withdrawn,
    /// The member was slashed.
    Slashed,
}

/// A change to group membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipChange {
    /// A leaf was appended.
    Registered {
        /// Assigned index.
        index: usize,
        /// Leaf value.
        commitment: IdentityCommitment,
        /// Owner of the member's records.
        owner: AccountAddress,
    },
    /// A leaf was zeroed.
    Removed {
        /// Vacated index.
        index: usize,
        /// Former leaf value.
        commitment: IdentityCommitment,
        /// Why.
        reason: RemovalReason,
    },
}

/// One entry of a group's ordered membership history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEvent {
    /// Position in the group's history, starting at 0.
    pub seq: u64,
    /// What happened.
    pub change: MembershipChange,
}
