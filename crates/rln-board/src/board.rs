//! # Board Protocol State Machine
//!
//! A [`Board`] is one replica of a message-board group. It keeps the
//! membership tree, the registry and the message log on this side of the
//! ledger, and drives every change through the [`SettlementClient`].
//!
//! ## Security Invariant
//!
//! Local state never asserts a transition the ledger has not confirmed:
//!
//! - **register** and **withdraw_stake** mutate first, because the request
//!   must carry the post-mutation root, and compensate on any settlement
//!   failure (`unregister` releases the slot, `restore` puts the member
//!   back at the same index).
//! - **post_message** and **slash** only propose: the request is built from
//!   previews, and local state changes after confirmation.
//!
//! A compensation that cannot run (the slot was taken, the member vanished)
//! moves the board to `Inconsistent`, after which every write is refused.
//!
//! ## Concurrency
//!
//! One writer per board: a FIFO-fair `tokio::sync::Mutex` is held from the
//! start of a transaction until its outcome is applied, so confirmations
//! are applied in issue order. Everything before dispatch is cancellable
//! and mutates nothing. From dispatch onward the writer guard moves into a
//! spawned task, so dropping the caller's future cannot strand a confirmed
//! transition half-applied.
//!
//! Readers never take the writer lock. Each finished transaction publishes
//! a [`BoardSnapshot`] behind a `parking_lot::RwLock`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use rln_core::{
    AccountAddress, FieldElement, FieldHasher, GroupId, IdentityCommitment, MemberSecret,
    MessageCounterRecord, StakeToken,
};
use rln_crypto::{
    compute_signal, recover_secret, IncrementalMerkleTree, MerkleProof, Share, ShareParams,
};
use rln_settlement::{
    CreateGroupRequest, MembershipChange, MembershipEvent, PostRequest, RegisterRequest,
    RemovalReason, RetryingSettlement, SettlementClient, SlashRequest, WithdrawRequest,
};
use rln_state::{
    Member, MembershipRegistry, MessageLog, MessageRecord, NewMessage, RegistryError,
    TransactionJournal, TransactionKind, TransactionRecord,
};

use crate::config::BoardConfig;
use crate::error::BoardError;

// ─── Public types ───────────────────────────────────────────────────

/// Lifecycle status of a board replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardStatus {
    /// Accepting operations.
    Active,
    /// Local state could not be reconciled with the ledger. Writes are
    /// refused; reads still return the last published snapshot.
    Inconsistent {
        /// What went wrong.
        reason: String,
    },
}

impl BoardStatus {
    /// Whether the board accepts writes.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A rate-limit violation reported by the ledger.
///
/// Not an error: the post was settled and the counter advanced, but the
/// message was not logged. `shares` is filled when this board logged the
/// earlier post on the same RLN line, in which case it can be passed
/// straight to [`Board::slash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashEvent {
    /// Identity that went over the limit.
    pub offender: IdentityCommitment,
    /// RLN message id of the violating post.
    pub message_id: u64,
    /// The share revealed by the violating post.
    pub share: Share,
    /// Two points on the offender's line, if both are known here.
    pub shares: Option<ShareParams>,
}

/// Outcome of [`Board::post_message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResult {
    /// Whether the message was within the rate limit and logged.
    pub accepted: bool,
    /// The logged record, when accepted.
    pub record: Option<MessageRecord>,
    /// Present when the post exceeded the rate limit.
    pub rate_limit_event: Option<SlashEvent>,
}

/// Outcome of [`Board::slash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashOutcome {
    /// The removed member.
    pub offender: IdentityCommitment,
    /// Stake taken from the offender.
    pub forfeited: u64,
    /// Messages of the offender dropped from the log.
    pub purged_messages: usize,
    /// The slasher's new stake record.
    pub stake: StakeToken,
}

/// Outcome of [`Board::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Events that changed local state.
    pub applied: usize,
    /// Events already reflected locally.
    pub skipped: usize,
    /// Next event sequence this board will read.
    pub cursor: u64,
}

/// Read-only view published after every finished transaction.
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    /// Membership root.
    pub root: FieldElement,
    /// Logged messages in arrival order.
    pub messages: Arc<Vec<MessageRecord>>,
    /// Live members ordered by leaf index.
    pub members: Arc<Vec<Member>>,
    /// Journal of finished transactions, oldest first.
    pub transactions: Arc<Vec<TransactionRecord>>,
    /// Board status.
    pub status: BoardStatus,
    /// Next membership event sequence to sync from.
    pub cursor: u64,
}

// ─── Writer state ───────────────────────────────────────────────────

struct BoardInner {
    registry: MembershipRegistry,
    log: MessageLog,
    journal: TransactionJournal,
    status: BoardStatus,
    cursor: u64,
}

impl BoardInner {
    fn ensure_active(&self) -> Result<(), BoardError> {
        match &self.status {
            BoardStatus::Active => Ok(()),
            BoardStatus::Inconsistent { reason } => Err(BoardError::Inconsistent(reason.clone())),
        }
    }

    fn mark_inconsistent(&mut self, group: &GroupId, reason: String) -> BoardError {
        tracing::error!(group = %group, reason = %reason, "board marked inconsistent");
        self.status = BoardStatus::Inconsistent {
            reason: reason.clone(),
        };
        BoardError::Inconsistent(reason)
    }

    /// Local state must follow a confirmed transition; failing to is fatal.
    fn reconcile<T>(
        &mut self,
        group: &GroupId,
        result: Result<T, RegistryError>,
        context: &str,
    ) -> Result<T, BoardError> {
        result.map_err(|e| self.mark_inconsistent(group, format!("{context}: {e}")))
    }

    /// Own confirmations advance the sync cursor only when they are the
    /// next event; otherwise `sync` replays them idempotently.
    fn observe_event(&mut self, seq: u64) {
        if seq == self.cursor {
            self.cursor += 1;
        }
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            root: self.registry.root().clone(),
            messages: self.log.snapshot(),
            members: Arc::new(self.registry.members()),
            transactions: Arc::new(self.journal.records()),
            status: self.status.clone(),
            cursor: self.cursor,
        }
    }
}

struct PreparedPost {
    request: PostRequest,
    stake: StakeToken,
    share: Share,
}

// ─── Board ──────────────────────────────────────────────────────────

/// One replica of a message-board group.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Board {
    id: GroupId,
    creator: Option<AccountAddress>,
    config: Arc<BoardConfig>,
    rate_limit: u64,
    hasher: Arc<dyn FieldHasher>,
    settlement: Arc<dyn SettlementClient>,
    inner: Arc<Mutex<BoardInner>>,
    snapshot: Arc<RwLock<BoardSnapshot>>,
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.read();
        f.debug_struct("Board")
            .field("id", &self.id)
            .field("root", &snapshot.root)
            .field("members", &snapshot.members.len())
            .field("messages", &snapshot.messages.len())
            .field("status", &snapshot.status)
            .finish()
    }
}

impl Board {
    /// Create a new group on the ledger and return its first replica.
    pub async fn create(
        creator: AccountAddress,
        settlement: Arc<dyn SettlementClient>,
        hasher: Arc<dyn FieldHasher>,
        config: BoardConfig,
    ) -> Result<Self, BoardError> {
        config.validate()?;
        let board = Self::assemble(
            GroupId::generate(),
            Some(creator.clone()),
            settlement,
            hasher,
            config,
        )?;
        let mut tx = TransactionRecord::begin(TransactionKind::CreateGroup, None);
        tx.dispatch()?;
        let request = CreateGroupRequest {
            group_id: board.id.clone(),
            creator,
            tree: board.config.tree.clone(),
            root: board.root(),
            rate_limit: board.config.rate_limit,
        };
        let outcome = board
            .settlement
            .create_group(request)
            .await
            .map(|()| ((), format!("created group {}", board.id)))
            .map_err(BoardError::from);
        {
            let mut inner = board.inner.lock().await;
            board.conclude(&mut inner, tx, outcome)?;
        }
        Ok(board)
    }

    /// Attach a new replica to an existing group and sync it.
    ///
    /// The group's rate limit is read from the ledger and takes precedence
    /// over `config.rate_limit`.
    pub async fn open(
        group_id: GroupId,
        settlement: Arc<dyn SettlementClient>,
        hasher: Arc<dyn FieldHasher>,
        config: BoardConfig,
    ) -> Result<Self, BoardError> {
        config.validate()?;
        let mut board = Self::assemble(group_id, None, settlement, hasher, config)?;
        let rate_limit = board.settlement.group_rate_limit(&board.id).await?;
        if rate_limit != board.config.rate_limit {
            tracing::warn!(
                group = %board.id,
                group_limit = rate_limit,
                configured = board.config.rate_limit,
                "configured rate limit differs from the group; using the group's"
            );
        }
        board.rate_limit = rate_limit;
        let report = board.sync().await?;
        tracing::info!(
            group = %board.id,
            members = report.applied,
            cursor = report.cursor,
            "replica opened"
        );
        Ok(board)
    }

    fn assemble(
        id: GroupId,
        creator: Option<AccountAddress>,
        settlement: Arc<dyn SettlementClient>,
        hasher: Arc<dyn FieldHasher>,
        config: BoardConfig,
    ) -> Result<Self, BoardError> {
        let tree = IncrementalMerkleTree::new(config.tree.clone(), hasher.clone())?;
        let inner = BoardInner {
            registry: MembershipRegistry::new(tree),
            log: MessageLog::new(),
            journal: TransactionJournal::with_capacity(config.journal_capacity),
            status: BoardStatus::Active,
            cursor: 0,
        };
        let snapshot = inner.snapshot();
        let settlement: Arc<dyn SettlementClient> =
            Arc::new(RetryingSettlement::new(settlement, config.retry.clone()));
        Ok(Self {
            id,
            creator,
            rate_limit: config.rate_limit,
            config: Arc::new(config),
            hasher,
            settlement,
            inner: Arc::new(Mutex::new(inner)),
            snapshot: Arc::new(RwLock::new(snapshot)),
        })
    }

    // ── Write operations ───────────────────────────────────────────

    /// Stake and join the group.
    ///
    /// The leaf is inserted locally before dispatch so the request can
    /// carry the new root; any settlement failure releases the slot again.
    pub async fn register(
        &self,
        account: &AccountAddress,
        secret: &MemberSecret,
    ) -> Result<Member, BoardError> {
        let commitment = self.commitment_of(secret);
        let mut tx =
            TransactionRecord::begin(TransactionKind::Register, Some(commitment.member_id()));
        let mut guard = self.inner.clone().lock_owned().await;

        if let Err(e) = guard.ensure_active() {
            return self.conclude(&mut guard, tx, Err(e));
        }
        // Nothing is minted for a registration the tree cannot take.
        if let Err(e) = guard.registry.preview_register(&commitment) {
            return self.conclude(&mut guard, tx, Err(e.into()));
        }
        let stake = match self
            .settlement
            .mint_stake(account, self.config.stake_amount)
            .await
        {
            Ok(stake) => stake,
            Err(e) => return self.conclude(&mut guard, tx, Err(e.into())),
        };

        // Past this point the transaction runs to completion.
        if let Err(e) = tx.dispatch() {
            return self.conclude(&mut guard, tx, Err(e.into()));
        }
        let registration = match guard.registry.register(commitment.clone(), account.clone()) {
            Ok(registration) => registration,
            Err(e) => return self.conclude(&mut guard, tx, Err(e.into())),
        };
        let request = RegisterRequest {
            group_id: self.id.clone(),
            secret: secret.clone(),
            stake,
            old_root: registration.old_root,
            new_root: registration.new_root,
        };

        let board = self.clone();
        let index = registration.index;
        join(tokio::spawn(async move {
            let mut inner = guard;
            let outcome = board
                .settle_register(&mut inner, request, commitment, index)
                .await;
            board.conclude(&mut inner, tx, outcome)
        }))
        .await
    }

    async fn settle_register(
        &self,
        inner: &mut BoardInner,
        request: RegisterRequest,
        commitment: IdentityCommitment,
        index: usize,
    ) -> Result<(Member, String), BoardError> {
        match self.settlement.register(request).await {
            Ok(receipt) => {
                if receipt.index != index {
                    return Err(inner.mark_inconsistent(
                        &self.id,
                        format!(
                            "ledger placed {commitment} at index {} but the local index is {index}",
                            receipt.index
                        ),
                    ));
                }
                let adopted = inner.registry.set_records(
                    &commitment,
                    Some(receipt.stake),
                    Some(receipt.counter),
                );
                inner.reconcile(&self.id, adopted, "adopting registration records")?;
                inner.observe_event(receipt.event_seq);
                let member = inner.registry.lookup(&commitment).cloned();
                let member = inner.reconcile(&self.id, member, "reading registered member")?;
                Ok((member, format!("registered at index {index}")))
            }
            Err(e) => {
                let err = BoardError::from(e);
                if let Err(undo) = inner.registry.unregister(&commitment) {
                    return Err(inner.mark_inconsistent(
                        &self.id,
                        format!("cannot undo registration of {commitment}: {undo}"),
                    ));
                }
                tracing::warn!(
                    group = %self.id,
                    member = %commitment.member_id(),
                    index,
                    error = %err,
                    "registration compensated"
                );
                Err(err)
            }
        }
    }

    /// Post a message under the rate limit.
    ///
    /// A post over the limit is still settled (the counter advances) but
    /// is not logged; the result carries a [`SlashEvent`] instead.
    pub async fn post_message(
        &self,
        account: &AccountAddress,
        secret: &MemberSecret,
        content: &str,
    ) -> Result<PostResult, BoardError> {
        let commitment = self.commitment_of(secret);
        let mut tx =
            TransactionRecord::begin(TransactionKind::PostMessage, Some(commitment.member_id()));
        let mut guard = self.inner.clone().lock_owned().await;

        let prepared = match self
            .prepare_post(&guard, account, secret, &commitment, content)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => return self.conclude(&mut guard, tx, Err(e)),
        };
        if let Err(e) = tx.dispatch() {
            return self.conclude(&mut guard, tx, Err(e.into()));
        }

        let board = self.clone();
        join(tokio::spawn(async move {
            let mut inner = guard;
            let outcome = board.settle_post(&mut inner, prepared, commitment).await;
            board.conclude(&mut inner, tx, outcome)
        }))
        .await
    }

    async fn prepare_post(
        &self,
        inner: &BoardInner,
        account: &AccountAddress,
        secret: &MemberSecret,
        commitment: &IdentityCommitment,
        content: &str,
    ) -> Result<PreparedPost, BoardError> {
        inner.ensure_active()?;
        let member = inner.registry.lookup(commitment)?;
        let proof = inner.registry.proof(commitment)?;
        let (stake, counter) = self.records_for(member).await?;
        let nullifier = self.settlement.group_nullifier(&self.id).await?;
        let message_id = counter.count % self.rate_limit;
        let signal = compute_signal(self.hasher.as_ref(), secret, &nullifier, message_id, content);
        Ok(PreparedPost {
            request: PostRequest {
                group_id: self.id.clone(),
                nullifier,
                address: account.clone(),
                secret: secret.clone(),
                index: member.index,
                message: content.to_string(),
                message_id,
                counter,
                proof,
            },
            stake,
            share: signal.share,
        })
    }

    async fn settle_post(
        &self,
        inner: &mut BoardInner,
        prepared: PreparedPost,
        commitment: IdentityCommitment,
    ) -> Result<(PostResult, String), BoardError> {
        let PreparedPost {
            request,
            stake,
            share,
        } = prepared;
        let receipt = match self.settlement.post_message(request.clone()).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.forget_records(inner, &commitment);
                return Err(e.into());
            }
        };
        let count = receipt.counter.count;
        let adopted = inner
            .registry
            .set_records(&commitment, Some(stake), Some(receipt.counter));
        inner.reconcile(&self.id, adopted, "adopting counter record")?;

        if receipt.exceeded {
            let shares = inner
                .log
                .share_for(&commitment, request.message_id)
                .filter(|earlier| earlier.x != share.x)
                .map(|earlier| ShareParams::from_shares(earlier, &share));
            tracing::warn!(
                group = %self.id,
                member = %commitment.member_id(),
                count,
                limit = self.rate_limit,
                shares_known = shares.is_some(),
                "rate limit exceeded"
            );
            let event = SlashEvent {
                offender: commitment,
                message_id: request.message_id,
                share,
                shares,
            };
            return Ok((
                PostResult {
                    accepted: false,
                    record: None,
                    rate_limit_event: Some(event),
                },
                format!("rate limit exceeded at count {count}"),
            ));
        }

        let record = inner.log.append(NewMessage {
            sender: commitment,
            account: request.address,
            content: request.message,
            message_id: request.message_id,
            share,
        });
        let detail = format!("message {} accepted", record.sequence);
        Ok((
            PostResult {
                accepted: true,
                record: Some(record),
                rate_limit_event: None,
            },
            detail,
        ))
    }

    /// Leave the group and reclaim the stake.
    ///
    /// The leaf is zeroed before dispatch; a failed settlement restores the
    /// member at the same index.
    pub async fn withdraw_stake(
        &self,
        account: &AccountAddress,
        secret: &MemberSecret,
    ) -> Result<StakeToken, BoardError> {
        let commitment = self.commitment_of(secret);
        let mut tx =
            TransactionRecord::begin(TransactionKind::WithdrawStake, Some(commitment.member_id()));
        let mut guard = self.inner.clone().lock_owned().await;

        let prepared = match self.prepare_withdraw(&guard, &commitment).await {
            Ok(prepared) => prepared,
            Err(e) => return self.conclude(&mut guard, tx, Err(e)),
        };
        let (proof, stake, counter) = prepared;

        if let Err(e) = tx.dispatch() {
            return self.conclude(&mut guard, tx, Err(e.into()));
        }
        let revoked = match guard.registry.revoke(&commitment) {
            Ok(member) => member,
            Err(e) => return self.conclude(&mut guard, tx, Err(e.into())),
        };
        let request = WithdrawRequest {
            group_id: self.id.clone(),
            address: account.clone(),
            secret: secret.clone(),
            index: revoked.index,
            stake,
            counter,
            proof,
            new_root: guard.registry.root().clone(),
        };

        let board = self.clone();
        join(tokio::spawn(async move {
            let mut inner = guard;
            let outcome = board.settle_withdraw(&mut inner, request, revoked).await;
            board.conclude(&mut inner, tx, outcome)
        }))
        .await
    }

    async fn prepare_withdraw(
        &self,
        inner: &BoardInner,
        commitment: &IdentityCommitment,
    ) -> Result<(MerkleProof, StakeToken, MessageCounterRecord), BoardError> {
        inner.ensure_active()?;
        let member = inner.registry.lookup(commitment)?;
        let proof = inner.registry.proof(commitment)?;
        let (stake, counter) = self.records_for(member).await?;
        Ok((proof, stake, counter))
    }

    async fn settle_withdraw(
        &self,
        inner: &mut BoardInner,
        request: WithdrawRequest,
        revoked: Member,
    ) -> Result<(StakeToken, String), BoardError> {
        let index = revoked.index;
        match self.settlement.withdraw_stake(request).await {
            Ok(receipt) => {
                inner.observe_event(receipt.event_seq);
                let detail = format!("withdrew {} from index {index}", receipt.refund.amount);
                Ok((receipt.refund, detail))
            }
            Err(e) => {
                let err = BoardError::from(e);
                let member = revoked.id.clone();
                let commitment = revoked.commitment.clone();
                if let Err(restore) = inner.registry.restore(revoked) {
                    return Err(inner.mark_inconsistent(
                        &self.id,
                        format!(
                            "cannot restore {member} at index {index} after failed withdrawal: \
                             {restore}"
                        ),
                    ));
                }
                self.forget_records(inner, &commitment);
                tracing::warn!(
                    group = %self.id,
                    member = %member,
                    index,
                    error = %err,
                    "withdrawal compensated"
                );
                Err(err)
            }
        }
    }

    /// Remove `offender` using two points on its RLN line and collect its
    /// stake.
    pub async fn slash(
        &self,
        slasher: &AccountAddress,
        slasher_secret: &MemberSecret,
        offender: &IdentityCommitment,
        shares: &ShareParams,
    ) -> Result<SlashOutcome, BoardError> {
        let slasher_commitment = self.commitment_of(slasher_secret);
        let mut tx = TransactionRecord::begin(TransactionKind::Slash, Some(offender.member_id()));
        let mut guard = self.inner.clone().lock_owned().await;

        let request = match self
            .prepare_slash(&guard, slasher, slasher_secret, &slasher_commitment, offender, shares)
            .await
        {
            Ok(request) => request,
            Err(e) => return self.conclude(&mut guard, tx, Err(e)),
        };
        if let Err(e) = tx.dispatch() {
            return self.conclude(&mut guard, tx, Err(e.into()));
        }

        let board = self.clone();
        join(tokio::spawn(async move {
            let mut inner = guard;
            let outcome = board
                .settle_slash(&mut inner, request, slasher_commitment)
                .await;
            board.conclude(&mut inner, tx, outcome)
        }))
        .await
    }

    async fn prepare_slash(
        &self,
        inner: &BoardInner,
        slasher: &AccountAddress,
        slasher_secret: &MemberSecret,
        slasher_commitment: &IdentityCommitment,
        offender: &IdentityCommitment,
        shares: &ShareParams,
    ) -> Result<SlashRequest, BoardError> {
        inner.ensure_active()?;
        let member = inner.registry.lookup(slasher_commitment)?;
        inner.registry.lookup(offender)?;
        let revealed =
            recover_secret(shares).map_err(|e| BoardError::InvalidShares(e.to_string()))?;
        if &self.commitment_of(&revealed) != offender {
            return Err(BoardError::InvalidShares(format!(
                "shares do not lie on the line of {offender}"
            )));
        }
        let proof = inner.registry.proof(slasher_commitment)?;
        let new_root = inner.registry.preview_revoke(offender)?;
        let (stake, _) = self.records_for(member).await?;
        Ok(SlashRequest {
            group_id: self.id.clone(),
            slasher: slasher.clone(),
            slasher_secret: slasher_secret.clone(),
            offender: offender.clone(),
            shares: shares.clone(),
            stake,
            proof,
            new_root,
        })
    }

    async fn settle_slash(
        &self,
        inner: &mut BoardInner,
        request: SlashRequest,
        slasher: IdentityCommitment,
    ) -> Result<(SlashOutcome, String), BoardError> {
        let offender = request.offender.clone();
        let receipt = match self.settlement.slash(request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.forget_records(inner, &slasher);
                return Err(e.into());
            }
        };
        let revoked = inner.registry.revoke(&offender);
        inner.reconcile(&self.id, revoked, "removing slashed member")?;
        let purged_messages = inner.log.purge_sender(&offender);
        let adopted = inner
            .registry
            .set_records(&slasher, Some(receipt.stake.clone()), None);
        inner.reconcile(&self.id, adopted, "adopting slasher stake")?;
        inner.observe_event(receipt.event_seq);
        let detail = format!(
            "slashed {offender}: {} forfeited, {purged_messages} messages purged",
            receipt.forfeited
        );
        Ok((
            SlashOutcome {
                offender,
                forfeited: receipt.forfeited,
                purged_messages,
                stake: receipt.stake,
            },
            detail,
        ))
    }

    /// Pull membership events from the ledger and apply the ones this
    /// replica has not seen.
    ///
    /// Applying an event twice is a no-op. An event that contradicts local
    /// state moves the board to `Inconsistent`. Cached member records are
    /// dropped, since posts through other replicas advance counters without
    /// a membership event.
    pub async fn sync(&self) -> Result<SyncReport, BoardError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_active()?;
        let events = self
            .settlement
            .membership_events(&self.id, inner.cursor)
            .await?;

        let mut report = SyncReport {
            applied: 0,
            skipped: 0,
            cursor: inner.cursor,
        };
        for event in &events {
            if event.seq < inner.cursor {
                report.skipped += 1;
                continue;
            }
            if event.seq > inner.cursor {
                let reason = format!(
                    "membership history gap: expected event {} but got {}",
                    inner.cursor, event.seq
                );
                let err = inner.mark_inconsistent(&self.id, reason);
                self.publish(&inner);
                return Err(err);
            }
            match apply_event(&mut inner, event) {
                Ok(true) => report.applied += 1,
                Ok(false) => report.skipped += 1,
                Err(reason) => {
                    let err = inner.mark_inconsistent(&self.id, reason);
                    self.publish(&inner);
                    return Err(err);
                }
            }
            inner.cursor += 1;
        }
        let consistency = inner.registry.check_consistency();
        if let Err(e) = consistency {
            let err = inner.mark_inconsistent(&self.id, e.to_string());
            self.publish(&inner);
            return Err(err);
        }
        inner.registry.clear_all_records();
        report.cursor = inner.cursor;
        self.publish(&inner);
        if report.applied > 0 {
            tracing::info!(
                group = %self.id,
                applied = report.applied,
                skipped = report.skipped,
                cursor = report.cursor,
                "membership synced"
            );
        }
        Ok(report)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Group identifier.
    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Account that created the group, if this replica created it.
    pub fn creator(&self) -> Option<&AccountAddress> {
        self.creator.as_ref()
    }

    /// Effective configuration.
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Posts per member per epoch, as the group enforces it.
    pub fn rate_limit(&self) -> u64 {
        self.rate_limit
    }

    /// Identity commitment of `secret` under this board's hasher.
    pub fn commitment_of(&self, secret: &MemberSecret) -> IdentityCommitment {
        secret.commitment(self.hasher.as_ref())
    }

    /// Current membership root.
    pub fn root(&self) -> FieldElement {
        self.snapshot.read().root.clone()
    }

    /// Logged messages in arrival order.
    pub fn messages(&self) -> Arc<Vec<MessageRecord>> {
        self.snapshot.read().messages.clone()
    }

    /// Live members ordered by leaf index.
    pub fn members(&self) -> Arc<Vec<Member>> {
        self.snapshot.read().members.clone()
    }

    /// Finished transactions, oldest first.
    pub fn transactions(&self) -> Arc<Vec<TransactionRecord>> {
        self.snapshot.read().transactions.clone()
    }

    /// Board status.
    pub fn status(&self) -> BoardStatus {
        self.snapshot.read().status.clone()
    }

    /// Everything above, read at once.
    pub fn snapshot(&self) -> BoardSnapshot {
        self.snapshot.read().clone()
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn records_for(
        &self,
        member: &Member,
    ) -> Result<(StakeToken, MessageCounterRecord), BoardError> {
        if let (Some(stake), Some(counter)) = (&member.stake, &member.counter) {
            return Ok((stake.clone(), counter.clone()));
        }
        let records = self
            .settlement
            .member_records(&self.id, &member.account, &member.commitment)
            .await?;
        Ok((records.stake, records.counter))
    }

    /// A failed settlement may mean the cached records are stale; the next
    /// transaction refetches them.
    fn forget_records(&self, inner: &mut BoardInner, commitment: &IdentityCommitment) {
        if let Err(e) = inner.registry.clear_records(commitment) {
            tracing::debug!(group = %self.id, error = %e, "no cached records to drop");
        }
    }

    /// Journal the transaction, publish a snapshot and hand back the value.
    fn conclude<T>(
        &self,
        inner: &mut BoardInner,
        mut tx: TransactionRecord,
        outcome: Result<(T, String), BoardError>,
    ) -> Result<T, BoardError> {
        let transition = match &outcome {
            Ok((_, detail)) => {
                tracing::info!(group = %self.id, tx = %tx.id, kind = %tx.kind, "{detail}");
                tx.apply(detail.clone())
            }
            Err(err) => {
                if err.is_fatal() || matches!(err, BoardError::CapacityExceeded { .. }) {
                    tracing::error!(
                        group = %self.id,
                        tx = %tx.id,
                        kind = %tx.kind,
                        error = %err,
                        "transaction failed"
                    );
                } else {
                    tracing::warn!(
                        group = %self.id,
                        tx = %tx.id,
                        kind = %tx.kind,
                        error = %err,
                        "transaction rejected"
                    );
                }
                tx.reject(err.to_string())
            }
        };
        if let Err(e) = transition {
            tracing::error!(tx = %tx.id, error = %e, "transaction phase out of order");
        }
        inner.journal.record(tx);
        self.publish(inner);
        outcome.map(|(value, _)| value)
    }

    fn publish(&self, inner: &BoardInner) {
        *self.snapshot.write() = inner.snapshot();
    }
}

async fn join<T>(task: JoinHandle<Result<T, BoardError>>) -> Result<T, BoardError> {
    task.await
        .map_err(|e| BoardError::TaskAborted(e.to_string()))?
}

/// Apply one membership event. `Ok(false)` means it was already reflected.
fn apply_event(inner: &mut BoardInner, event: &MembershipEvent) -> Result<bool, String> {
    match &event.change {
        MembershipChange::Registered {
            index,
            commitment,
            owner,
        } => match inner.registry.lookup(commitment) {
            Ok(member) if member.index == *index => Ok(false),
            Ok(member) => Err(format!(
                "{commitment} is at index {} locally but {index} on the ledger",
                member.index
            )),
            Err(_) => inner
                .registry
                .import(commitment.clone(), owner.clone(), *index)
                .map(|_| true)
                .map_err(|e| format!("event {}: {e}", event.seq)),
        },
        MembershipChange::Removed {
            index,
            commitment,
            reason,
        } => match inner.registry.lookup(commitment) {
            Ok(member) if member.index == *index => {
                inner
                    .registry
                    .revoke(commitment)
                    .map_err(|e| format!("event {}: {e}", event.seq))?;
                if *reason == RemovalReason::Slashed {
                    inner.log.purge_sender(commitment);
                }
                Ok(true)
            }
            Ok(member) => Err(format!(
                "{commitment} is at index {} locally but was removed from {index}",
                member.index
            )),
            Err(_) => match inner.registry.tree().is_vacant(*index) {
                Ok(true) => Ok(false),
                Ok(false) => Err(format!(
                    "leaf {index} is occupied locally but the ledger removed {commitment} from it"
                )),
                Err(e) => Err(format!("event {}: {e}", event.seq)),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rln_core::Sha256FieldHasher;
    use rln_crypto::TreeConfig;
    use rln_settlement::{InMemoryLedger, LedgerOp, RetryConfig, SettlementError};

    fn hasher() -> Arc<dyn FieldHasher> {
        Arc::new(Sha256FieldHasher)
    }

    fn config() -> BoardConfig {
        BoardConfig {
            tree: TreeConfig {
                depth: 4,
                ..TreeConfig::default()
            },
            retry: RetryConfig {
                max_retries: 0,
                base_delay_ms: 1,
            },
            ..BoardConfig::default()
        }
    }

    fn account(name: &str) -> AccountAddress {
        AccountAddress::new(name).unwrap()
    }

    async fn board() -> (Board, InMemoryLedger) {
        let ledger = InMemoryLedger::new(hasher());
        let board = Board::create(account("creator"), Arc::new(ledger.clone()), hasher(), config())
            .await
            .unwrap();
        (board, ledger)
    }

    #[tokio::test]
    async fn create_journals_group_creation() {
        let (board, ledger) = board().await;
        assert_eq!(board.creator(), Some(&account("creator")));
        assert!(board.status().is_active());
        assert_eq!(board.root(), ledger.group_root(board.id()).await.unwrap());
        let txs = board.transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionKind::CreateGroup);
        assert_eq!(txs[0].phase, rln_state::TransactionPhase::Applied);
    }

    #[tokio::test]
    async fn register_adopts_ledger_records() {
        let (board, ledger) = board().await;
        let alice = MemberSecret::random();
        let member = board.register(&account("alice"), &alice).await.unwrap();
        assert_eq!(member.index, 0);
        assert_eq!(member.stake.as_ref().map(|s| s.amount), Some(100));
        assert_eq!(member.counter.as_ref().map(|c| c.count), Some(0));
        assert_eq!(board.members().len(), 1);
        assert_eq!(board.root(), ledger.group_root(board.id()).await.unwrap());
        assert_eq!(board.snapshot().cursor, 1);
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected_locally() {
        let (board, ledger) = board().await;
        let alice = MemberSecret::random();
        board.register(&account("alice"), &alice).await.unwrap();
        let err = board.register(&account("alice"), &alice).await.unwrap_err();
        assert!(matches!(err, BoardError::DuplicateMember(_)));
        assert_eq!(ledger.call_count(LedgerOp::Register), 1);
        let last = board.transactions().last().cloned().unwrap();
        assert_eq!(last.phase, rln_state::TransactionPhase::Rejected);
    }

    #[tokio::test]
    async fn rejected_register_leaves_state_unchanged() {
        let (board, ledger) = board().await;
        let root = board.root();
        ledger.fail_next(LedgerOp::Register, SettlementError::Rejected("proof".into()));
        let err = board
            .register(&account("alice"), &MemberSecret::random())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::SettlementRejected(_)));
        assert_eq!(board.root(), root);
        assert!(board.members().is_empty());

        // The released slot is reused.
        let member = board
            .register(&account("bob"), &MemberSecret::random())
            .await
            .unwrap();
        assert_eq!(member.index, 0);
    }

    #[tokio::test]
    async fn non_member_cannot_post() {
        let (board, ledger) = board().await;
        let err = board
            .post_message(&account("mallory"), &MemberSecret::random(), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::NotAMember(_)));
        assert_eq!(ledger.call_count(LedgerOp::PostMessage), 0);
    }

    #[tokio::test]
    async fn second_post_yields_slash_event_with_shares() {
        let (board, _ledger) = board().await;
        let bob = MemberSecret::random();
        board.register(&account("bob"), &bob).await.unwrap();

        let first = board.post_message(&account("bob"), &bob, "one").await.unwrap();
        assert!(first.accepted);
        assert_eq!(first.record.as_ref().map(|r| r.sequence), Some(0));

        let second = board.post_message(&account("bob"), &bob, "two").await.unwrap();
        assert!(!second.accepted);
        let event = second.rate_limit_event.unwrap();
        assert_eq!(event.offender, board.commitment_of(&bob));
        let shares = event.shares.unwrap();
        assert_eq!(recover_secret(&shares).unwrap(), bob);
        assert_eq!(board.messages().len(), 1);
    }

    #[tokio::test]
    async fn slash_removes_offender_and_messages() {
        let (board, _ledger) = board().await;
        let carol = MemberSecret::random();
        let bob = MemberSecret::random();
        board.register(&account("carol"), &carol).await.unwrap();
        board.register(&account("bob"), &bob).await.unwrap();
        board.post_message(&account("bob"), &bob, "one").await.unwrap();
        let event = board
            .post_message(&account("bob"), &bob, "two")
            .await
            .unwrap()
            .rate_limit_event
            .unwrap();

        let outcome = board
            .slash(
                &account("carol"),
                &carol,
                &event.offender,
                &event.shares.unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.forfeited, 100);
        assert_eq!(outcome.purged_messages, 1);
        assert_eq!(outcome.stake.amount, 200);
        assert!(board.messages().is_empty());
        assert_eq!(board.members().len(), 1);
    }

    #[tokio::test]
    async fn slash_with_foreign_shares_is_refused_before_dispatch() {
        let (board, ledger) = board().await;
        let carol = MemberSecret::random();
        let bob = MemberSecret::random();
        board.register(&account("carol"), &carol).await.unwrap();
        board.register(&account("bob"), &bob).await.unwrap();
        let bogus = ShareParams {
            x0: FieldElement::from_u64(1),
            y0: FieldElement::from_u64(2),
            x1: FieldElement::from_u64(3),
            y1: FieldElement::from_u64(4),
        };
        let err = board
            .slash(&account("carol"), &carol, &board.commitment_of(&bob), &bogus)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidShares(_)));
        assert_eq!(ledger.call_count(LedgerOp::Slash), 0);
    }

    #[tokio::test]
    async fn failed_withdraw_restores_member() {
        let (board, ledger) = board().await;
        let alice = MemberSecret::random();
        board.register(&account("alice"), &alice).await.unwrap();
        let root = board.root();
        ledger.fail_next(
            LedgerOp::WithdrawStake,
            SettlementError::Unavailable("timeout".into()),
        );
        let err = board
            .withdraw_stake(&account("alice"), &alice)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(board.root(), root);
        assert_eq!(board.members()[0].index, 0);

        let refund = board.withdraw_stake(&account("alice"), &alice).await.unwrap();
        assert_eq!(refund.amount, 100);
        assert!(board.members().is_empty());
        assert!(ledger.is_unspent(&refund));
    }

    #[tokio::test]
    async fn inconsistent_board_refuses_writes() {
        let (board, _ledger) = board().await;
        {
            let mut inner = board.inner.lock().await;
            inner.mark_inconsistent(board.id(), "test".into());
            board.publish(&inner);
        }
        assert!(!board.status().is_active());
        let err = board
            .register(&account("alice"), &MemberSecret::random())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(board.sync().await, Err(BoardError::Inconsistent(_))));
    }

    #[tokio::test]
    async fn capacity_exhaustion_is_reported() {
        let ledger = InMemoryLedger::new(hasher());
        let mut cfg = config();
        cfg.tree.depth = 1;
        let board = Board::create(account("creator"), Arc::new(ledger.clone()), hasher(), cfg)
            .await
            .unwrap();
        for name in ["a", "b"] {
            board.register(&account(name), &MemberSecret::random()).await.unwrap();
        }
        let err = board
            .register(&account("c"), &MemberSecret::random())
            .await
            .unwrap_err();
        assert_eq!(err, BoardError::CapacityExceeded { capacity: 2 });
        assert_eq!(board.members().len(), 2);

        // Refused before minting, and never reached settlement.
        assert_eq!(ledger.call_count(LedgerOp::MintStake), 2);
        assert_eq!(ledger.call_count(LedgerOp::Register), 2);
        let last = board.transactions().last().cloned().unwrap();
        assert_eq!(last.phase, rln_state::TransactionPhase::Rejected);
        assert!(last
            .history
            .iter()
            .all(|t| t.to != rln_state::TransactionPhase::Settling));
    }

    #[tokio::test]
    async fn replica_uses_the_group_rate_limit() {
        let (board, ledger) = board().await;
        let replica_config = BoardConfig {
            rate_limit: 3,
            ..config()
        };
        let replica = Board::open(board.id().clone(), Arc::new(ledger), hasher(), replica_config)
            .await
            .unwrap();
        assert_eq!(replica.config().rate_limit, 3);
        assert_eq!(replica.rate_limit(), 1);

        let bob = MemberSecret::random();
        replica.register(&account("bob"), &bob).await.unwrap();
        replica.post_message(&account("bob"), &bob, "one").await.unwrap();
        let second = replica
            .post_message(&account("bob"), &bob, "two")
            .await
            .unwrap();
        assert!(!second.accepted);
        let event = second.rate_limit_event.unwrap();
        assert_eq!(event.message_id, 0);
        assert_eq!(recover_secret(&event.shares.unwrap()).unwrap(), bob);
    }

    #[tokio::test]
    async fn rejected_post_drops_cached_records() {
        let (board, ledger) = board().await;
        let alice = MemberSecret::random();
        board.register(&account("alice"), &alice).await.unwrap();
        assert!(board.members()[0].counter.is_some());

        ledger.fail_next(LedgerOp::PostMessage, SettlementError::Rejected("no".into()));
        board
            .post_message(&account("alice"), &alice, "hi")
            .await
            .unwrap_err();
        let member = &board.members()[0];
        assert!(member.stake.is_none() && member.counter.is_none());

        let posted = board.post_message(&account("alice"), &alice, "hi").await.unwrap();
        assert!(posted.accepted);
        assert_eq!(board.members()[0].counter.as_ref().map(|c| c.count), Some(1));
    }

    #[tokio::test]
    async fn sync_is_idempotent_for_own_events() {
        let (board, _ledger) = board().await;
        board
            .register(&account("alice"), &MemberSecret::random())
            .await
            .unwrap();
        let report = board.sync().await.unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.cursor, 1);
        assert_eq!(board.members().len(), 1);
    }
}
