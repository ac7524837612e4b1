//! # In-Memory Ledger
//!
//! A [`SettlementClient`] that keeps the authoritative group state in
//! memory: one commitment tree per group, the escrowed stake and counter
//! records of every member, unspent minted tokens, and the ordered
//! membership history replicas sync from.
//!
//! It checks what the on-chain program checks: roots must be current,
//! Merkle paths must open the caller's commitment, records must be the
//! unspent ones, post-transition roots must match, and slashing shares must
//! reveal the offender's secret. It does not produce zero-knowledge proofs.
//!
//! Faults can be queued per operation with [`InMemoryLedger::fail_next`] and
//! a fixed latency added with [`InMemoryLedger::with_latency`], for
//! exercising compensation and cancellation paths.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use rln_core::{
    AccountAddress, FieldElement, FieldHasher, GroupId, IdentityCommitment, MessageCounterRecord,
    StakeToken,
};
use rln_crypto::{recover_secret, verify_proof, IncrementalMerkleTree, MerkleProof};

use crate::traits::{SettlementClient, SettlementError};
use crate::types::{
    CreateGroupRequest, MemberRecords, MembershipChange, MembershipEvent, PostReceipt,
    PostRequest, RegisterReceipt, RegisterRequest, RemovalReason, SlashReceipt, SlashRequest,
    WithdrawReceipt, WithdrawRequest,
};

/// Ledger operations that can be targeted by fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    /// `create_group`.
    CreateGroup,
    /// `mint_stake`.
    MintStake,
    /// `register`.
    Register,
    /// `post_message`.
    PostMessage,
    /// `withdraw_stake`.
    WithdrawStake,
    /// `slash`.
    Slash,
    /// Read-only queries (roots, nullifiers, records, events).
    Query,
}

/// A member as the ledger sees it.
#[derive(Debug, Clone)]
struct LedgerMember {
    index: usize,
    owner: AccountAddress,
    stake: StakeToken,
    counter: MessageCounterRecord,
}

struct GroupState {
    tree: IncrementalMerkleTree,
    nullifier: FieldElement,
    rate_limit: u64,
    members: HashMap<IdentityCommitment, LedgerMember>,
    events: Vec<MembershipEvent>,
}

impl GroupState {
    fn push_event(&mut self, change: MembershipChange) -> u64 {
        let seq = self.events.len() as u64;
        self.events.push(MembershipEvent { seq, change });
        seq
    }

    /// Stale-root check first, then the path itself.
    fn check_proof(
        &self,
        proof: &MerkleProof,
        commitment: &IdentityCommitment,
        hasher: &dyn FieldHasher,
    ) -> Result<(), SettlementError> {
        if &proof.root != self.tree.root() {
            return Err(SettlementError::StaleRoot {
                expected: self.tree.root().clone(),
                actual: proof.root.clone(),
            });
        }
        if &proof.leaf != commitment.as_field() {
            return Err(SettlementError::Rejected(
                "proof does not open the caller's commitment".to_string(),
            ));
        }
        if !verify_proof(proof, hasher) {
            return Err(SettlementError::Rejected("invalid merkle proof".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    groups: HashMap<GroupId, GroupState>,
    unspent: HashMap<Uuid, StakeToken>,
    faults: HashMap<LedgerOp, VecDeque<SettlementError>>,
    calls: HashMap<LedgerOp, usize>,
}

impl LedgerState {
    fn enter(&mut self, op: LedgerOp) -> Result<(), SettlementError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn group_mut(&mut self, id: &GroupId) -> Result<&mut GroupState, SettlementError> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| SettlementError::UnknownGroup(id.clone()))
    }

    fn group(&self, id: &GroupId) -> Result<&GroupState, SettlementError> {
        self.groups
            .get(id)
            .ok_or_else(|| SettlementError::UnknownGroup(id.clone()))
    }
}

/// In-memory settlement layer.
///
/// Cheaply cloneable via `Arc`; all clones share the same ledger.
#[derive(Clone)]
pub struct InMemoryLedger {
    hasher: Arc<dyn FieldHasher>,
    state: Arc<Mutex<LedgerState>>,
    latency: Duration,
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryLedger")
            .field("groups", &state.groups.len())
            .field("unspent", &state.unspent.len())
            .field("latency", &self.latency)
            .finish()
    }
}

impl InMemoryLedger {
    /// Create an empty ledger hashing with `hasher`.
    pub fn new(hasher: Arc<dyn FieldHasher>) -> Self {
        Self {
            hasher,
            state: Arc::new(Mutex::new(LedgerState::default())),
            latency: Duration::ZERO,
        }
    }

    /// Delay every state-changing call by `latency` before it is processed.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call of `op` fail with `error` without side effects.
    /// Multiple queued faults are consumed in order.
    pub fn fail_next(&self, op: LedgerOp, error: SettlementError) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// How many times `op` has been called, including failed calls.
    pub fn call_count(&self, op: LedgerOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of live members of `group`.
    pub fn live_members(&self, group: &GroupId) -> usize {
        self.state
            .lock()
            .groups
            .get(group)
            .map(|g| g.members.len())
            .unwrap_or(0)
    }

    /// Whether `token` is an unspent record.
    pub fn is_unspent(&self, token: &StakeToken) -> bool {
        self.state.lock().unspent.get(&token.nonce) == Some(token)
    }

    async fn settle_delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl SettlementClient for InMemoryLedger {
    async fn create_group(&self, request: CreateGroupRequest) -> Result<(), SettlementError> {
        self.settle_delay().await;
        let mut state = self.state.lock();
        state.enter(LedgerOp::CreateGroup)?;
        if state.groups.contains_key(&request.group_id) {
            return Err(SettlementError::Rejected(format!(
                "{} already exists",
                request.group_id
            )));
        }
        if request.rate_limit == 0 {
            return Err(SettlementError::Rejected(
                "rate limit must be positive".to_string(),
            ));
        }
        let tree = IncrementalMerkleTree::new(request.tree, self.hasher.clone())
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        if &request.root != tree.root() {
            return Err(SettlementError::Rejected(
                "initial root must be the empty tree root".to_string(),
            ));
        }
        let nullifier = FieldElement::random(&mut rand::thread_rng());
        state.groups.insert(
            request.group_id,
            GroupState {
                tree,
                nullifier,
                rate_limit: request.rate_limit,
                members: HashMap::new(),
                events: Vec::new(),
            },
        );
        Ok(())
    }

    async fn group_root(&self, group: &GroupId) -> Result<FieldElement, SettlementError> {
        let mut state = self.state.lock();
        state.enter(LedgerOp::Query)?;
        Ok(state.group(group)?.tree.root().clone())
    }

    async fn group_nullifier(&self, group: &GroupId) -> Result<FieldElement, SettlementError> {
        let mut state = self.state.lock();
        state.enter(LedgerOp::Query)?;
        Ok(state.group(group)?.nullifier.clone())
    }

    async fn group_rate_limit(&self, group: &GroupId) -> Result<u64, SettlementError> {
        let mut state = self.state.lock();
        state.enter(LedgerOp::Query)?;
        Ok(state.group(group)?.rate_limit)
    }

    async fn mint_stake(
        &self,
        owner: &AccountAddress,
        amount: u64,
    ) -> Result<StakeToken, SettlementError> {
        let mut state = self.state.lock();
        state.enter(LedgerOp::MintStake)?;
        if amount == 0 {
            return Err(SettlementError::Rejected(
                "cannot mint an empty stake".to_string(),
            ));
        }
        let token = StakeToken::issue(owner.clone(), amount);
        state.unspent.insert(token.nonce, token.clone());
        Ok(token)
    }

    async fn member_records(
        &self,
        group: &GroupId,
        owner: &AccountAddress,
        commitment: &IdentityCommitment,
    ) -> Result<MemberRecords, SettlementError> {
        let mut state = self.state.lock();
        state.enter(LedgerOp::Query)?;
        let member = state
            .group(group)?
            .members
            .get(commitment)
            .filter(|m| &m.owner == owner)
            .ok_or_else(|| {
                SettlementError::Rejected(format!("no records for {owner} under {commitment}"))
            })?;
        Ok(MemberRecords {
            stake: member.stake.clone(),
            counter: member.counter.clone(),
        })
    }

    async fn register(&self, request: RegisterRequest) -> Result<RegisterReceipt, SettlementError> {
        self.settle_delay().await;
        let commitment = request.secret.commitment(self.hasher.as_ref());
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter(LedgerOp::Register)?;
        let group = state
            .groups
            .get_mut(&request.group_id)
            .ok_or_else(|| SettlementError::UnknownGroup(request.group_id.clone()))?;

        if &request.old_root != group.tree.root() {
            return Err(SettlementError::StaleRoot {
                expected: group.tree.root().clone(),
                actual: request.old_root,
            });
        }
        if group.members.contains_key(&commitment) {
            return Err(SettlementError::Rejected(format!(
                "{commitment} is already registered"
            )));
        }
        if state.unspent.get(&request.stake.nonce) != Some(&request.stake) {
            return Err(SettlementError::Rejected(
                "stake record is spent or unknown".to_string(),
            ));
        }
        let predicted = group
            .tree
            .preview_insert(commitment.as_field())
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        if predicted != request.new_root {
            return Err(SettlementError::Rejected(
                "new root does not match the insertion".to_string(),
            ));
        }

        let index = group
            .tree
            .insert(commitment.as_field().clone())
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        state.unspent.remove(&request.stake.nonce);
        let owner = request.stake.owner.clone();
        let stake = StakeToken::issue(owner.clone(), request.stake.amount);
        let counter = MessageCounterRecord::issue(owner.clone());
        group.members.insert(
            commitment.clone(),
            LedgerMember {
                index,
                owner: owner.clone(),
                stake: stake.clone(),
                counter: counter.clone(),
            },
        );
        let event_seq = group.push_event(MembershipChange::Registered {
            index,
            commitment,
            owner,
        });
        Ok(RegisterReceipt {
            stake,
            counter,
            index,
            event_seq,
        })
    }

    async fn post_message(&self, request: PostRequest) -> Result<PostReceipt, SettlementError> {
        self.settle_delay().await;
        let commitment = request.secret.commitment(self.hasher.as_ref());
        let mut state = self.state.lock();
        state.enter(LedgerOp::PostMessage)?;
        let group = state.group_mut(&request.group_id)?;

        group.check_proof(&request.proof, &commitment, self.hasher.as_ref())?;
        if request.nullifier != group.nullifier {
            return Err(SettlementError::Rejected(
                "external nullifier does not match the group".to_string(),
            ));
        }
        if request.message_id >= group.rate_limit {
            return Err(SettlementError::Rejected(format!(
                "message id {} outside rate limit {}",
                request.message_id, group.rate_limit
            )));
        }
        let rate_limit = group.rate_limit;
        let member = group
            .members
            .get_mut(&commitment)
            .ok_or_else(|| SettlementError::Rejected(format!("{commitment} is not a member")))?;
        if member.index != request.index || member.index != request.proof.leaf_index {
            return Err(SettlementError::Rejected(
                "leaf index does not match the member".to_string(),
            ));
        }
        if member.owner != request.address || member.counter != request.counter {
            return Err(SettlementError::Rejected(
                "counter record is spent or not owned by the caller".to_string(),
            ));
        }

        member.counter = member.counter.incremented();
        Ok(PostReceipt {
            counter: member.counter.clone(),
            exceeded: member.counter.count > rate_limit,
        })
    }

    async fn withdraw_stake(
        &self,
        request: WithdrawRequest,
    ) -> Result<WithdrawReceipt, SettlementError> {
        self.settle_delay().await;
        let commitment = request.secret.commitment(self.hasher.as_ref());
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.enter(LedgerOp::WithdrawStake)?;
        let group = state
            .groups
            .get_mut(&request.group_id)
            .ok_or_else(|| SettlementError::UnknownGroup(request.group_id.clone()))?;

        group.check_proof(&request.proof, &commitment, self.hasher.as_ref())?;
        let member = group
            .members
            .get(&commitment)
            .ok_or_else(|| SettlementError::Rejected(format!("{commitment} is not a member")))?;
        if member.index != request.index
            || member.owner != request.address
            || member.stake != request.stake
            || member.counter != request.counter
        {
            return Err(SettlementError::Rejected(
                "records do not match the member".to_string(),
            ));
        }
        let index = member.index;
        let zero = group.tree.config().zero_value.clone();
        let predicted = group
            .tree
            .preview_update(index, &zero)
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        if predicted != request.new_root {
            return Err(SettlementError::Rejected(
                "new root does not match the removal".to_string(),
            ));
        }

        group
            .tree
            .update(index, zero)
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        let removed = group.members.remove(&commitment);
        let amount = removed.map(|m| m.stake.amount).unwrap_or(request.stake.amount);
        let refund = StakeToken::issue(request.address, amount);
        state.unspent.insert(refund.nonce, refund.clone());
        let event_seq = group.push_event(MembershipChange::Removed {
            index,
            commitment,
            reason: RemovalReason::Withdrawn,
        });
        Ok(WithdrawReceipt { refund, event_seq })
    }

    async fn slash(&self, request: SlashRequest) -> Result<SlashReceipt, SettlementError> {
        self.settle_delay().await;
        let slasher = request.slasher_secret.commitment(self.hasher.as_ref());
        let mut state = self.state.lock();
        state.enter(LedgerOp::Slash)?;
        let group = state.group_mut(&request.group_id)?;

        group.check_proof(&request.proof, &slasher, self.hasher.as_ref())?;
        let slasher_member = group
            .members
            .get(&slasher)
            .ok_or_else(|| SettlementError::Rejected(format!("{slasher} is not a member")))?;
        if slasher_member.owner != request.slasher || slasher_member.stake != request.stake {
            return Err(SettlementError::Rejected(
                "slasher records do not match".to_string(),
            ));
        }
        if slasher == request.offender {
            return Err(SettlementError::Rejected(
                "a member cannot slash itself".to_string(),
            ));
        }
        let offender_index = group
            .members
            .get(&request.offender)
            .map(|m| m.index)
            .ok_or_else(|| {
                SettlementError::Rejected(format!("{} is not a member", request.offender))
            })?;
        let revealed = recover_secret(&request.shares)
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        if revealed.commitment(self.hasher.as_ref()) != request.offender {
            return Err(SettlementError::Rejected(
                "shares do not reveal the offender's secret".to_string(),
            ));
        }
        let zero = group.tree.config().zero_value.clone();
        let predicted = group
            .tree
            .preview_update(offender_index, &zero)
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        if predicted != request.new_root {
            return Err(SettlementError::Rejected(
                "new root does not match the removal".to_string(),
            ));
        }

        group
            .tree
            .update(offender_index, zero)
            .map_err(|e| SettlementError::Rejected(e.to_string()))?;
        let forfeited = group
            .members
            .remove(&request.offender)
            .map(|m| m.stake.amount)
            .unwrap_or(0);
        let stake = match group.members.get_mut(&slasher) {
            Some(member) => {
                member.stake = StakeToken::issue(
                    member.owner.clone(),
                    member.stake.amount.saturating_add(forfeited),
                );
                member.stake.clone()
            }
            None => {
                return Err(SettlementError::Rejected(format!(
                    "{slasher} is not a member"
                )))
            }
        };
        let event_seq = group.push_event(MembershipChange::Removed {
            index: offender_index,
            commitment: request.offender,
            reason: RemovalReason::Slashed,
        });
        Ok(SlashReceipt {
            stake,
            forfeited,
            event_seq,
        })
    }

    async fn membership_events(
        &self,
        group: &GroupId,
        from_seq: u64,
    ) -> Result<Vec<MembershipEvent>, SettlementError> {
        let mut state = self.state.lock();
        state.enter(LedgerOp::Query)?;
        let group = state.group(group)?;
        Ok(group
            .events
            .iter()
            .skip(usize::try_from(from_seq).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
