//! End-to-end board scenarios against the in-memory ledger.
//!
//! Covers the four reference scenarios: tree growth and proof shape,
//! rate-limit detection, slashing, and two replicas racing on a stale root.

use std::sync::Arc;

use rln_board::{Board, BoardConfig, BoardError};
use rln_core::{AccountAddress, FieldElement, FieldHasher, MemberSecret, Sha256FieldHasher};
use rln_crypto::{IncrementalMerkleTree, TreeConfig, TreeError};
use rln_settlement::{InMemoryLedger, RetryConfig, SettlementClient};

fn hasher() -> Arc<dyn FieldHasher> {
    Arc::new(Sha256FieldHasher)
}

fn account(name: &str) -> AccountAddress {
    AccountAddress::new(name).unwrap()
}

fn config() -> BoardConfig {
    BoardConfig {
        retry: RetryConfig {
            max_retries: 0,
            base_delay_ms: 1,
        },
        ..BoardConfig::default()
    }
}

async fn new_board(ledger: &InMemoryLedger) -> Board {
    Board::create(account("creator"), Arc::new(ledger.clone()), hasher(), config())
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Scenario A: tree growth and proof shape
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_each_insert_moves_root_and_proofs_have_depth_steps() {
    let h = hasher();
    let mut tree = IncrementalMerkleTree::new(TreeConfig::default(), h.clone()).unwrap();
    let commitments: Vec<_> = (0..3)
        .map(|_| MemberSecret::random().commitment(h.as_ref()))
        .collect();

    let mut previous = tree.root().clone();
    for (expected, commitment) in commitments.iter().enumerate() {
        let index = tree.insert(commitment.as_field().clone()).unwrap();
        assert_eq!(index, expected);
        assert_ne!(tree.root(), &previous, "root must change on insert {index}");
        previous = tree.root().clone();
    }

    let proof = tree.create_proof(1).unwrap();
    assert_eq!(proof.len(), 15);
    assert_eq!(proof.siblings().len(), 15);
    assert_eq!(proof.path_indices().len(), 15);
    assert_eq!(proof.path_indices()[0], 1, "index 1 is a right child");
    assert!(proof.verify_against(tree.root(), h.as_ref()));
}

#[tokio::test]
async fn scenario_a_board_root_tracks_registrations() {
    let ledger = InMemoryLedger::new(hasher());
    let board = new_board(&ledger).await;
    let mut previous = board.root();
    for name in ["c1", "c2", "c3"] {
        board
            .register(&account(name), &MemberSecret::random())
            .await
            .unwrap();
        assert_ne!(board.root(), previous);
        previous = board.root();
    }
    let indices: Vec<usize> = board.members().iter().map(|m| m.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

// ---------------------------------------------------------------------------
// Scenario B: rate-limit violation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_b_exceeding_post_is_not_logged_and_emits_slash_event() {
    let ledger = InMemoryLedger::new(hasher());
    let board = new_board(&ledger).await;
    let bob = MemberSecret::random();
    board.register(&account("bob"), &bob).await.unwrap();

    let first = board
        .post_message(&account("bob"), &bob, "first")
        .await
        .unwrap();
    assert!(first.accepted);
    assert!(first.rate_limit_event.is_none());
    assert_eq!(board.messages().len(), 1);

    let second = board
        .post_message(&account("bob"), &bob, "second")
        .await
        .unwrap();
    assert!(!second.accepted);
    assert!(second.record.is_none());
    assert_eq!(board.messages().len(), 1, "log length unchanged");
    let event = second.rate_limit_event.expect("slash event");
    assert_eq!(event.offender, board.commitment_of(&bob));

    // The counter advanced on the ledger even though the post was refused.
    let member = &board.members()[0];
    assert_eq!(member.counter.as_ref().map(|c| c.count), Some(2));
}

#[tokio::test]
async fn scenario_b_repeating_identical_content_gives_no_usable_shares() {
    let ledger = InMemoryLedger::new(hasher());
    let board = new_board(&ledger).await;
    let bob = MemberSecret::random();
    board.register(&account("bob"), &bob).await.unwrap();
    board.post_message(&account("bob"), &bob, "same").await.unwrap();
    let again = board.post_message(&account("bob"), &bob, "same").await.unwrap();
    let event = again.rate_limit_event.unwrap();
    assert!(event.shares.is_none(), "one point cannot define the line");
}

#[tokio::test]
async fn scenario_b_higher_limit_allows_that_many_posts() {
    let ledger = InMemoryLedger::new(hasher());
    let mut cfg = config();
    cfg.rate_limit = 3;
    let board = Board::create(account("creator"), Arc::new(ledger.clone()), hasher(), cfg)
        .await
        .unwrap();
    let alice = MemberSecret::random();
    board.register(&account("alice"), &alice).await.unwrap();
    for n in 0..3 {
        let result = board
            .post_message(&account("alice"), &alice, &format!("post {n}"))
            .await
            .unwrap();
        assert!(result.accepted, "post {n} is within the limit");
    }
    let over = board
        .post_message(&account("alice"), &alice, "post 3")
        .await
        .unwrap();
    assert!(!over.accepted);
    let shares = over.rate_limit_event.unwrap().shares.unwrap();
    assert_eq!(rln_crypto::recover_secret(&shares).unwrap(), alice);
}

// ---------------------------------------------------------------------------
// Scenario C: slashing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_c_slash_zeroes_leaf_drops_entry_and_purges_messages() {
    let ledger = InMemoryLedger::new(hasher());
    let board = new_board(&ledger).await;
    let alice = MemberSecret::random();
    let bob = MemberSecret::random();
    let charlie = MemberSecret::random();
    board.register(&account("alice"), &alice).await.unwrap();
    board.register(&account("bob"), &bob).await.unwrap();
    board.register(&account("charlie"), &charlie).await.unwrap();

    board.post_message(&account("alice"), &alice, "hi").await.unwrap();
    board.post_message(&account("bob"), &bob, "spam 1").await.unwrap();
    let event = board
        .post_message(&account("bob"), &bob, "spam 2")
        .await
        .unwrap()
        .rate_limit_event
        .unwrap();
    let bob_commitment = event.offender.clone();

    let outcome = board
        .slash(
            &account("charlie"),
            &charlie,
            &bob_commitment,
            &event.shares.unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.purged_messages, 1);

    // Registry entry gone, messages purged, leaf zeroed.
    assert!(board.members().iter().all(|m| m.commitment != bob_commitment));
    assert!(board.messages().iter().all(|m| m.sender != bob_commitment));
    assert_eq!(board.messages().len(), 1);

    let mut rebuilt = IncrementalMerkleTree::new(TreeConfig::default(), hasher()).unwrap();
    for secret in [&alice, &bob, &charlie] {
        rebuilt
            .insert(secret.commitment(&Sha256FieldHasher).as_field().clone())
            .unwrap();
    }
    assert_eq!(
        rebuilt.index_of(bob_commitment.as_field()).unwrap(),
        1,
        "sanity: bob was at index 1"
    );
    rebuilt.update(1, FieldElement::zero()).unwrap();
    assert_eq!(&board.root(), rebuilt.root());
    assert!(matches!(
        rebuilt.index_of(bob_commitment.as_field()),
        Err(TreeError::NotFound(_))
    ));

    // Bob can no longer post.
    let err = board
        .post_message(&account("bob"), &bob, "back?")
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::NotAMember(_)));
}

#[tokio::test]
async fn scenario_c_slashing_twice_fails_without_touching_state() {
    let ledger = InMemoryLedger::new(hasher());
    let board = new_board(&ledger).await;
    let carol = MemberSecret::random();
    let bob = MemberSecret::random();
    board.register(&account("carol"), &carol).await.unwrap();
    board.register(&account("bob"), &bob).await.unwrap();
    board.post_message(&account("bob"), &bob, "a").await.unwrap();
    let event = board
        .post_message(&account("bob"), &bob, "b")
        .await
        .unwrap()
        .rate_limit_event
        .unwrap();
    let shares = event.shares.unwrap();
    board
        .slash(&account("carol"), &carol, &event.offender, &shares)
        .await
        .unwrap();
    let root = board.root();

    let err = board
        .slash(&account("carol"), &carol, &event.offender, &shares)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::NotAMember(_)));
    assert_eq!(board.root(), root);
}

// ---------------------------------------------------------------------------
// Scenario D: racing registrations on a stale root
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_d_stale_root_registration_retries_after_sync() {
    let ledger = InMemoryLedger::new(hasher());
    let replica_a = new_board(&ledger).await;
    let replica_b = Board::open(
        replica_a.id().clone(),
        Arc::new(ledger.clone()),
        hasher(),
        config(),
    )
    .await
    .unwrap();
    let empty_root = replica_b.root();

    // Both replicas start from the same root; A wins the race.
    replica_a
        .register(&account("alice"), &MemberSecret::random())
        .await
        .unwrap();

    let bob = MemberSecret::random();
    let err = replica_b.register(&account("bob"), &bob).await.unwrap_err();
    assert!(matches!(err, BoardError::StaleRoot { .. }), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(replica_b.root(), empty_root, "compensated");
    assert!(replica_b.members().is_empty());

    let report = replica_b.sync().await.unwrap();
    assert_eq!(report.applied, 1);
    let member = replica_b.register(&account("bob"), &bob).await.unwrap();
    assert_eq!(member.index, 1);

    replica_a.sync().await.unwrap();
    let ledger_root = ledger.group_root(replica_a.id()).await.unwrap();
    for replica in [&replica_a, &replica_b] {
        assert_eq!(replica.members().len(), 2);
        assert_eq!(replica.root(), ledger_root);
    }
    assert_eq!(ledger.live_members(replica_a.id()), 2);
}

#[tokio::test]
async fn scenario_d_replicas_converge_after_slash_and_withdraw() {
    let ledger = InMemoryLedger::new(hasher());
    let board = new_board(&ledger).await;
    let alice = MemberSecret::random();
    let bob = MemberSecret::random();
    let carol = MemberSecret::random();
    for (name, secret) in [("alice", &alice), ("bob", &bob), ("carol", &carol)] {
        board.register(&account(name), secret).await.unwrap();
    }
    board.post_message(&account("bob"), &bob, "x").await.unwrap();
    let event = board
        .post_message(&account("bob"), &bob, "y")
        .await
        .unwrap()
        .rate_limit_event
        .unwrap();
    board
        .slash(&account("carol"), &carol, &event.offender, &event.shares.unwrap())
        .await
        .unwrap();
    board.withdraw_stake(&account("alice"), &alice).await.unwrap();

    let replica = Board::open(board.id().clone(), Arc::new(ledger.clone()), hasher(), config())
        .await
        .unwrap();
    assert_eq!(replica.root(), board.root());
    assert_eq!(replica.members().len(), 1);
    assert_eq!(replica.members()[0].commitment, board.commitment_of(&carol));
    assert!(replica.members()[0].stake.is_none(), "imported members carry no records");

    // A member imported by sync can still act: records are fetched on demand.
    let posted = replica
        .post_message(&account("carol"), &carol, "from the replica")
        .await
        .unwrap();
    assert!(posted.accepted);
}

#[tokio::test]
async fn open_unknown_group_fails() {
    let ledger = InMemoryLedger::new(hasher());
    let err = Board::open(
        rln_core::GroupId::generate(),
        Arc::new(ledger),
        hasher(),
        config(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BoardError::NotFound(_)));
}
