//! Retry with exponential backoff for settlement calls.
//!
//! Retries only [`SettlementError::Unavailable`]. Rejections, stale roots
//! and unknown groups are returned immediately: repeating the same request
//! cannot change their outcome, and a stale-root request must be rebuilt.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rln_core::{AccountAddress, FieldElement, GroupId, IdentityCommitment, StakeToken};

use crate::traits::{SettlementClient, SettlementError};
use crate::types::{
    CreateGroupRequest, MemberRecords, MembershipEvent, PostReceipt, PostRequest,
    RegisterReceipt, RegisterRequest, SlashReceipt, SlashRequest, WithdrawReceipt,
    WithdrawRequest,
};

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay (doubles each attempt: 200ms, 400ms, 800ms).
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;

/// Backoff policy for transient settlement failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Run `f` with backoff on transient failures.
///
/// `f` is called up to `max_retries + 1` times.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    f: F,
) -> Result<T, SettlementError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
{
    for attempt in 0..config.max_retries {
        match f().await {
            Err(e) if e.is_transient() => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    "settlement call failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
    // Final attempt, no more retries.
    f().await
}

/// A [`SettlementClient`] decorator that retries transient failures.
///
/// Assumes an `Unavailable` answer means the request was not applied; a
/// transport that cannot guarantee that should map the failure to
/// `Rejected` instead.
#[derive(Debug, Clone)]
pub struct RetryingSettlement<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: SettlementClient> RetryingSettlement<C> {
    /// Wrap `inner` with the given policy.
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// The retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<C: SettlementClient> SettlementClient for RetryingSettlement<C> {
    async fn create_group(&self, request: CreateGroupRequest) -> Result<(), SettlementError> {
        retry_transient(&self.config, "create_group", || {
            self.inner.create_group(request.clone())
        })
        .await
    }

    async fn group_root(&self, group: &GroupId) -> Result<FieldElement, SettlementError> {
        retry_transient(&self.config, "group_root", || self.inner.group_root(group)).await
    }

    async fn group_nullifier(&self, group: &GroupId) -> Result<FieldElement, SettlementError> {
        retry_transient(&self.config, "group_nullifier", || {
            self.inner.group_nullifier(group)
        })
        .await
    }

    async fn group_rate_limit(&self, group: &GroupId) -> Result<u64, SettlementError> {
        retry_transient(&self.config, "group_rate_limit", || {
            self.inner.group_rate_limit(group)
        })
        .await
    }

    async fn mint_stake(
        &self,
        owner: &AccountAddress,
        amount: u64,
    ) -> Result<StakeToken, SettlementError> {
        retry_transient(&self.config, "mint_stake", || {
            self.inner.mint_stake(owner, amount)
        })
        .await
    }

    async fn member_records(
        &self,
        group: &GroupId,
        owner: &AccountAddress,
        commitment: &IdentityCommitment,
    ) -> Result<MemberRecords, SettlementError> {
        retry_transient(&self.config, "member_records", || {
            self.inner.member_records(group, owner, commitment)
        })
        .await
    }

    async fn register(&self, request: RegisterRequest) -> Result<RegisterReceipt, SettlementError> {
        retry_transient(&self.config, "register", || {
            self.inner.register(request.clone())
        })
        .await
    }

    async fn post_message(&self, request: PostRequest) -> Result<PostReceipt, SettlementError> {
        retry_transient(&self.config, "post_message", || {
            self.inner.post_message(request.clone())
        })
        .await
    }

    async fn withdraw_stake(
        &self,
        request: WithdrawRequest,
    ) -> Result<WithdrawReceipt, SettlementError> {
        retry_transient(&self.config, "withdraw_stake", || {
            self.inner.withdraw_stake(request.clone())
        })
        .await
    }

    async fn slash(&self, request: SlashRequest) -> Result<SlashReceipt, SettlementError> {
        retry_transient(&self.config, "slash", || self.inner.slash(request.clone())).await
    }

    async fn membership_events(
        &self,
        group: &GroupId,
        from_seq: u64,
    ) -> Result<Vec<MembershipEvent>, SettlementError> {
        retry_transient(&self.config, "membership_events", || {
            self.inner.membership_events(group, from_seq)
        })
        .await
    }
}
