//! # Demo Subcommand
//!
//! Replays the message-board flow end to end against an in-memory ledger:
//!
//! 1. A creator opens a board; Alice, Bob and Charlie stake and register.
//! 2. Alice posts once. Bob posts until he goes over the rate limit.
//! 3. Charlie slashes Bob with the two shares Bob revealed.
//! 4. Alice withdraws her stake.
//! 5. A second replica opens the same group and syncs to the same root.
//!
//! Each step prints an `OK:` line; any deviation aborts with an error.

use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use clap::Args;

use rln_board::{Board, BoardConfig};
use rln_core::{AccountAddress, FieldHasher, MemberSecret, Sha256FieldHasher};
use rln_settlement::{InMemoryLedger, SettlementClient};

/// Arguments for the `rln-board demo` subcommand.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Override the configured posts allowed per member.
    #[arg(long)]
    pub rate_limit: Option<u64>,

    /// Print the final board snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the demo subcommand.
pub fn run_demo(args: &DemoArgs, config: BoardConfig) -> Result<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(demo(args, config))?;
    Ok(0)
}

async fn demo(args: &DemoArgs, mut config: BoardConfig) -> Result<()> {
    if let Some(limit) = args.rate_limit {
        config.rate_limit = limit;
    }
    config.validate()?;
    let limit = config.rate_limit;

    let hasher: Arc<dyn FieldHasher> = Arc::new(Sha256FieldHasher);
    let ledger = InMemoryLedger::new(hasher.clone());
    let board = Board::create(
        AccountAddress::new("creator")?,
        Arc::new(ledger.clone()),
        hasher.clone(),
        config.clone(),
    )
    .await?;
    println!("OK: board {} created, root {}", board.id(), board.root().abbreviated());

    let alice = (AccountAddress::new("alice")?, MemberSecret::random());
    let bob = (AccountAddress::new("bob")?, MemberSecret::random());
    let charlie = (AccountAddress::new("charlie")?, MemberSecret::random());
    for (name, (account, secret)) in [("alice", &alice), ("bob", &bob), ("charlie", &charlie)] {
        let member = board.register(account, secret).await?;
        println!(
            "OK: {name} registered at index {} as {}",
            member.index, member.commitment
        );
    }

    let posted = board
        .post_message(&alice.0, &alice.1, "Hello from Alice")
        .await?;
    ensure!(posted.accepted, "alice's first post was not accepted");
    println!("OK: alice posted");

    let mut violation = None;
    for n in 0..=limit {
        let result = board
            .post_message(&bob.0, &bob.1, &format!("Bob says hi #{n}"))
            .await?;
        if let Some(event) = result.rate_limit_event {
            violation = Some(event);
            break;
        }
        println!("OK: bob post #{n} accepted");
    }
    let Some(event) = violation else {
        bail!("bob posted {} times without exceeding limit {limit}", limit + 1);
    };
    println!("OK: bob exceeded the rate limit of {limit}");
    let shares = event
        .shares
        .context("the violating post did not land on a logged line")?;

    let outcome = board.slash(&charlie.0, &charlie.1, &event.offender, &shares).await?;
    println!(
        "OK: charlie slashed bob, {} forfeited, {} messages purged, stake now {}",
        outcome.forfeited, outcome.purged_messages, outcome.stake.amount
    );

    let refund = board.withdraw_stake(&alice.0, &alice.1).await?;
    println!("OK: alice withdrew {}", refund.amount);

    let ledger_root = ledger.group_root(board.id()).await?;
    ensure!(board.root() == ledger_root, "local root diverged from the ledger");
    ensure!(board.members().len() == 1, "expected only charlie to remain");
    println!("OK: root {} matches the ledger", ledger_root.abbreviated());

    let replica = Board::open(board.id().clone(), Arc::new(ledger), hasher, config).await?;
    ensure!(replica.root() == board.root(), "replica root differs after sync");
    println!(
        "OK: replica synced {} members to the same root",
        replica.members().len()
    );

    if args.json {
        let snapshot = board.snapshot();
        let summary = serde_json::json!({
            "group": board.id(),
            "root": snapshot.root,
            "members": snapshot.members.as_ref(),
            "messages": snapshot.messages.as_ref(),
            "transactions": snapshot.transactions.as_ref(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
