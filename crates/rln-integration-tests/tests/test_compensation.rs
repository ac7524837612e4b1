//! Failure handling across the board/ledger boundary.
//!
//! Every failed settlement must leave the replica where it started (or
//! restored to it), transient failures are retried, and a caller that
//! stops waiting after dispatch does not stop the transaction.

use std::sync::Arc;
use std::time::Duration;

use rln_board::{Board, BoardConfig, BoardError};
use rln_core::{AccountAddress, FieldHasher, MemberSecret, Sha256FieldHasher};
use rln_crypto::TreeConfig;
use rln_settlement::{InMemoryLedger, LedgerOp, RetryConfig, SettlementClient, SettlementError};
use rln_state::{TransactionKind, TransactionPhase};

fn hasher() -> Arc<dyn FieldHasher> {
    Arc::new(Sha256FieldHasher)
}

fn account(name: &str) -> AccountAddress {
    AccountAddress::new(name).unwrap()
}

fn config(max_retries: u32) -> BoardConfig {
    BoardConfig {
        tree: TreeConfig {
            depth: 4,
            ..TreeConfig::default()
        },
        retry: RetryConfig {
            max_retries,
            base_delay_ms: 1,
        },
        ..BoardConfig::default()
    }
}

async fn board_with(ledger: &InMemoryLedger, max_retries: u32) -> Board {
    Board::create(
        account("creator"),
        Arc::new(ledger.clone()),
        hasher(),
        config(max_retries),
    )
    .await
    .unwrap()
}

fn last_transaction(board: &Board) -> (TransactionKind, TransactionPhase) {
    let transactions = board.transactions();
    let last = transactions.last().expect("journal is empty");
    (last.kind, last.phase)
}

// ---------------------------------------------------------------------------
// Compensation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_register_leaves_replica_untouched() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 0).await;
    let before = board.snapshot();

    ledger.fail_next(LedgerOp::Register, SettlementError::Rejected("bad proof".into()));
    let err = board
        .register(&account("alice"), &MemberSecret::random())
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::SettlementRejected(_)));

    let after = board.snapshot();
    assert_eq!(after.root, before.root);
    assert!(after.members.is_empty());
    assert!(after.status.is_active());
    assert_eq!(
        last_transaction(&board),
        (TransactionKind::Register, TransactionPhase::Rejected)
    );

    // The released slot is reused by the next registration.
    let member = board
        .register(&account("bob"), &MemberSecret::random())
        .await
        .unwrap();
    assert_eq!(member.index, 0);
    assert_eq!(board.root(), ledger.group_root(board.id()).await.unwrap());
}

#[tokio::test]
async fn failed_withdraw_restores_member_at_same_index() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 0).await;
    let alice = MemberSecret::random();
    let bob = MemberSecret::random();
    board.register(&account("alice"), &alice).await.unwrap();
    board.register(&account("bob"), &bob).await.unwrap();
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
    let members = board.members();
    let restored = members
        .iter()
        .find(|m| m.commitment == board.commitment_of(&alice))
        .expect("alice restored");
    assert_eq!(restored.index, 0);
    assert!(board.status().is_active());
    assert_eq!(
        last_transaction(&board),
        (TransactionKind::WithdrawStake, TransactionPhase::Rejected)
    );

    let refund = board.withdraw_stake(&account("alice"), &alice).await.unwrap();
    assert_eq!(refund.amount, board.config().stake_amount);
    assert!(ledger.is_unspent(&refund));
    assert_eq!(board.root(), ledger.group_root(board.id()).await.unwrap());
}

#[tokio::test]
async fn rejected_post_changes_nothing() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 0).await;
    let alice = MemberSecret::random();
    board.register(&account("alice"), &alice).await.unwrap();

    ledger.fail_next(LedgerOp::PostMessage, SettlementError::Rejected("no".into()));
    let err = board
        .post_message(&account("alice"), &alice, "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::SettlementRejected(_)));
    assert!(board.messages().is_empty());
    let records = ledger
        .member_records(board.id(), &account("alice"), &board.commitment_of(&alice))
        .await
        .unwrap();
    assert_eq!(records.counter.count, 0);
    assert!(board.members()[0].counter.is_none(), "refetched on next use");

    // The counter was not consumed, so the retry is still under the limit.
    let posted = board
        .post_message(&account("alice"), &alice, "hello")
        .await
        .unwrap();
    assert!(posted.accepted);
}

#[tokio::test]
async fn failed_slash_keeps_offender_and_can_be_repeated() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 0).await;
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
    let shares = event.shares.unwrap();
    let root = board.root();

    ledger.fail_next(LedgerOp::Slash, SettlementError::Unavailable("down".into()));
    let err = board
        .slash(&account("carol"), &carol, &event.offender, &shares)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::SettlementUnavailable(_)));
    assert_eq!(board.root(), root);
    assert_eq!(board.members().len(), 2);
    assert_eq!(board.messages().len(), 1);

    let outcome = board
        .slash(&account("carol"), &carol, &event.offender, &shares)
        .await
        .unwrap();
    assert_eq!(outcome.forfeited, board.config().stake_amount);
    assert_eq!(outcome.stake.amount, 2 * board.config().stake_amount);
    assert_eq!(board.members().len(), 1);
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_are_retried() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 2).await;
    for _ in 0..2 {
        ledger.fail_next(LedgerOp::Register, SettlementError::Unavailable("blip".into()));
    }
    let member = board
        .register(&account("alice"), &MemberSecret::random())
        .await
        .unwrap();
    assert_eq!(member.index, 0);
    assert_eq!(ledger.call_count(LedgerOp::Register), 3);
    assert_eq!(ledger.live_members(board.id()), 1);
}

#[tokio::test]
async fn retries_give_up_after_the_budget() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 1).await;
    for _ in 0..2 {
        ledger.fail_next(LedgerOp::Register, SettlementError::Unavailable("down".into()));
    }
    let err = board
        .register(&account("alice"), &MemberSecret::random())
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::SettlementUnavailable(_)));
    assert_eq!(ledger.call_count(LedgerOp::Register), 2);
    assert!(board.members().is_empty());
}

#[tokio::test]
async fn rejections_are_not_retried() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 3).await;
    ledger.fail_next(LedgerOp::Register, SettlementError::Rejected("final".into()));
    let err = board
        .register(&account("alice"), &MemberSecret::random())
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::SettlementRejected(_)));
    assert_eq!(ledger.call_count(LedgerOp::Register), 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropping_the_caller_after_dispatch_still_completes() {
    let ledger = InMemoryLedger::new(hasher()).with_latency(Duration::from_millis(100));
    let board = board_with(&ledger, 0).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        board.register(&account("alice"), &MemberSecret::random()),
    )
    .await;
    assert!(abandoned.is_err(), "the caller gave up before settlement");

    // The next write queues behind the abandoned registration.
    let member = board
        .register(&account("bob"), &MemberSecret::random())
        .await
        .unwrap();
    assert_eq!(member.index, 1);
    assert_eq!(board.members().len(), 2);
    assert_eq!(ledger.live_members(board.id()), 2);
    assert_eq!(board.root(), ledger.group_root(board.id()).await.unwrap());
}

#[tokio::test]
async fn readers_see_last_published_state_during_settlement() {
    let ledger = InMemoryLedger::new(hasher()).with_latency(Duration::from_millis(100));
    let board = board_with(&ledger, 0).await;
    let before = board.root();

    let writer = {
        let board = board.clone();
        tokio::spawn(async move {
            board
                .register(&account("alice"), &MemberSecret::random())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The leaf is provisionally inserted under the writer lock, but readers
    // only see published snapshots.
    assert_eq!(board.root(), before);
    assert!(board.members().is_empty());
    assert!(board.status().is_active());

    writer.await.unwrap().unwrap();
    assert_ne!(board.root(), before);
    assert_eq!(board.members().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_are_serialized() {
    let ledger = InMemoryLedger::new(hasher());
    let board = board_with(&ledger, 0).await;

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let board = board.clone();
            tokio::spawn(async move {
                board
                    .register(&account(&format!("member{n}")), &MemberSecret::random())
                    .await
            })
        })
        .collect();
    let mut indices = Vec::new();
    for handle in handles {
        indices.push(handle.await.unwrap().unwrap().index);
    }
    indices.sort_unstable();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
    assert_eq!(board.root(), ledger.group_root(board.id()).await.unwrap());
    assert_eq!(
        board
            .transactions()
            .iter()
            .filter(|t| t.kind == TransactionKind::Register && t.phase == TransactionPhase::Applied)
            .count(),
        8
    );
}

#[tokio::test]
async fn capacity_exhaustion_is_not_fatal() {
    let ledger = InMemoryLedger::new(hasher());
    let mut cfg = config(0);
    cfg.tree.depth = 1;
    let board = Board::create(account("creator"), Arc::new(ledger.clone()), hasher(), cfg)
        .await
        .unwrap();
    board.register(&account("a"), &MemberSecret::random()).await.unwrap();
    board.register(&account("b"), &MemberSecret::random()).await.unwrap();
    let err = board
        .register(&account("c"), &MemberSecret::random())
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::CapacityExceeded { capacity: 2 }));
    assert!(board.status().is_active());
    assert_eq!(board.members().len(), 2);
}
