//! # Settlement Client Trait
//!
//! The abstract interface to the system that proves and authoritatively
//! confirms board transitions. The board never reaches a ledger except
//! through this trait, and every board owns its own injected handle.
//!
//! ## Security Invariant
//!
//! The trait requires `Send + Sync` so one client can serve concurrent
//! boards. Implementations must treat the root a request was proven
//! against as part of the request: a request built on any root other than
//! the group's current one fails with [`SettlementError::StaleRoot`] and
//! changes nothing.
//!
//! Calls are not assumed idempotent. A caller that retries after
//! `StaleRoot` must rebuild its proof against the refreshed root.

use async_trait::async_trait;
use thiserror::Error;

use rln_core::{AccountAddress, FieldElement, GroupId, IdentityCommitment, StakeToken};

use crate::types::{
    CreateGroupRequest, MemberRecords, MembershipEvent, PostReceipt, PostRequest,
    RegisterReceipt, RegisterRequest, SlashReceipt, SlashRequest, WithdrawReceipt,
    WithdrawRequest,
};

/// Error returned by the settlement layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The ledger declined the proof or transition.
    #[error("settlement rejected: {0}")]
    Rejected(String),

    /// The request was proven against a root that is no longer current.
    #[error(
        "stale root: ledger is at {}, request was proven against {}",
        .expected.abbreviated(),
        .actual.abbreviated()
    )]
    StaleRoot {
        /// The ledger's current root.
        expected: FieldElement,
        /// The root the request used.
        actual: FieldElement,
    },

    /// The ledger could not be reached or did not answer in time.
    #[error("settlement unavailable: {0}")]
    Unavailable(String),

    /// No group with this identifier exists.
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),
}

impl SettlementError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Proof-backed ledger operations consumed by the board.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Create a group with an empty tree.
    async fn create_group(&self, request: CreateGroupRequest) -> Result<(), SettlementError>;

    /// The group's current membership root.
    async fn group_root(&self, group: &GroupId) -> Result<FieldElement, SettlementError>;

    /// The group's external nullifier for the current epoch.
    async fn group_nullifier(&self, group: &GroupId) -> Result<FieldElement, SettlementError>;

    /// Posts each member may make per epoch in this group.
    async fn group_rate_limit(&self, group: &GroupId) -> Result<u64, SettlementError>;

    /// Mint an unspent stake record for `owner`.
    async fn mint_stake(
        &self,
        owner: &AccountAddress,
        amount: u64,
    ) -> Result<StakeToken, SettlementError>;

    /// Fetch a member's current stake and counter records.
    async fn member_records(
        &self,
        group: &GroupId,
        owner: &AccountAddress,
        commitment: &IdentityCommitment,
    ) -> Result<MemberRecords, SettlementError>;

    /// Settle a registration.
    async fn register(&self, request: RegisterRequest) -> Result<RegisterReceipt, SettlementError>;

    /// Settle a post; the receipt says whether it exceeded the rate limit.
    async fn post_message(&self, request: PostRequest) -> Result<PostReceipt, SettlementError>;

    /// Settle a withdrawal.
    async fn withdraw_stake(
        &self,
        request: WithdrawRequest,
    ) -> Result<WithdrawReceipt, SettlementError>;

    /// Settle a slash.
    async fn slash(&self, request: SlashRequest) -> Result<SlashReceipt, SettlementError>;

    /// Membership history of a group from sequence `from_seq` onward.
    async fn membership_events(
        &self,
        group: &GroupId,
        from_seq: u64,
    ) -> Result<Vec<MembershipEvent>, SettlementError>;
}

#[async_trait]
impl<T: SettlementClient + ?Sized> SettlementClient for std::sync::Arc<T> {
    async fn create_group(&self, request: CreateGroupRequest) -> Result<(), SettlementError> {
        (**self).create_group(request).await
    }

    async fn group_root(&self, group: &GroupId) -> Result<FieldElement, SettlementError> {
        (**self).group_root(group).await
    }

    async fn group_nullifier(&self, group: &GroupId) -> Result<FieldElement, SettlementError> {
        (**self).group_nullifier(group).await
    }

    async fn group_rate_limit(&self, group: &GroupId) -> Result<u64, SettlementError> {
        (**self).group_rate_limit(group).await
    }

    async fn mint_stake(
        &self,
        owner: &AccountAddress,
        amount: u64,
    ) -> Result<StakeToken, SettlementError> {
        (**self).mint_stake(owner, amount).await
    }

    async fn member_records(
        &self,
        group: &GroupId,
        owner: &AccountAddress,
        commitment: &IdentityCommitment,
    ) -> Result<MemberRecords, SettlementError> {
        (**self).member_records(group, owner, commitment).await
    }

    async fn register(&self, request: RegisterRequest) -> Result<RegisterReceipt, SettlementError> {
        (**self).register(request).await
    }

    async fn post_message(&self, request: PostRequest) -> Result<PostReceipt, SettlementError> {
        (**self).post_message(request).await
    }

    async fn withdraw_stake(
        &self,
        request: WithdrawRequest,
    ) -> Result<WithdrawReceipt, SettlementError> {
        (**self).withdraw_stake(request).await
    }

    async fn slash(&self, request: SlashRequest) -> Result<SlashReceipt, SettlementError> {
        (**self).slash(request).await
    }

    async fn membership_events(
        &self,
        group: &GroupId,
        from_seq: u64,
    ) -> Result<Vec<MembershipEvent>, SettlementError> {
        (**self).membership_events(group, from_seq).await
    }
}
