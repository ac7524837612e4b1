//! # Board Transaction Lifecycle
//!
//! Every member-facing board operation runs as a short-lived transaction:
//!
//! ```text
//! PROVING ──dispatch()──▶ SETTLING ──apply()──▶ APPLIED
//!    │                       │
//!    └──reject()──┐          └──reject()──▶ REJECTED
//!                 ▼
//!              REJECTED
//! ```
//!
//! `PROVING` covers local preparation (proof construction, request
//! building). Once a request is dispatched the transaction is `SETTLING`
//! and can no longer be abandoned by the caller; it ends `APPLIED` or
//! `REJECTED` only after the ledger answers and local state agrees.
//!
//! Each transaction keeps its own transition history, and the board
//! keeps a bounded journal of finished transactions for auditability.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rln_core::{MemberId, RequestId};

/// Which board operation a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Group creation.
    CreateGroup,
    /// Member registration.
    Register,
    /// Message post.
    PostMessage,
    /// Stake withdrawal.
    WithdrawStake,
    /// Slashing of an offender.
    Slash,
}

impl TransactionKind {
    /// The canonical string name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateGroup => "CREATE_GROUP",
            Self::Register => "REGISTER",
            Self::PostMessage => "POST_MESSAGE",
            Self::WithdrawStake => "WITHDRAW_STAKE",
            Self::Slash => "SLASH",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionPhase {
    /// Building the proof and the settlement request.
    Proving,
    /// Request dispatched; awaiting the ledger.
    Settling,
    /// Confirmed and applied locally. Terminal.
    Applied,
    /// Declined or failed; local state unchanged or compensated. Terminal.
    Rejected,
}

impl TransactionPhase {
    /// Whether this phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected)
    }

    /// The canonical string name of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proving => "PROVING",
            Self::Settling => "SETTLING",
            Self::Applied => "APPLIED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from transaction phase changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The requested phase change is not an edge of the lifecycle.
    #[error("invalid transaction transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase.
        from: TransactionPhase,
        /// Attempted phase.
        to: TransactionPhase,
    },
}

/// One phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase before.
    pub from: TransactionPhase,
    /// Phase after.
    pub to: TransactionPhase,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// A board transaction and its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique request identifier.
    pub id: RequestId,
    /// Operation performed.
    pub kind: TransactionKind,
    /// Current phase.
    pub phase: TransactionPhase,
    /// Member the operation concerns, once known.
    pub member: Option<MemberId>,
    /// Outcome detail or rejection reason.
    pub detail: Option<String>,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
    /// When the transaction reached a terminal phase.
    pub finished_at: Option<DateTime<Utc>>,
    /// Every phase change, oldest first.
    pub history: Vec<PhaseTransition>,
}

impl TransactionRecord {
    /// Begin a transaction in `PROVING`.
    pub fn begin(kind: TransactionKind, member: Option<MemberId>) -> Self {
        Self {
            id: RequestId::new(),
            kind,
            phase: TransactionPhase::Proving,
            member,
            detail: None,
            started_at: Utc::now(),
            finished_at: None,
            history: Vec::new(),
        }
    }

    /// `PROVING → SETTLING`: the request has been handed to the ledger.
    pub fn dispatch(&mut self) -> Result<(), TransactionError> {
        self.transition(TransactionPhase::Settling)
    }

    /// `SETTLING → APPLIED`.
    pub fn apply(&mut self, detail: impl Into<String>) -> Result<(), TransactionError> {
        self.transition(TransactionPhase::Applied)?;
        self.detail = Some(detail.into());
        Ok(())
    }

    /// `PROVING | SETTLING → REJECTED`.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), TransactionError> {
        self.transition(TransactionPhase::Rejected)?;
        self.detail = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: TransactionPhase) -> Result<(), TransactionError> {
        let valid = matches!(
            (self.phase, to),
            (TransactionPhase::Proving, TransactionPhase::Settling)
                | (TransactionPhase::Proving, TransactionPhase::Rejected)
                | (TransactionPhase::Settling, TransactionPhase::Applied)
                | (TransactionPhase::Settling, TransactionPhase::Rejected)
        );
        if !valid {
            return Err(TransactionError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        let now = Utc::now();
        self.history.push(PhaseTransition {
            from: self.phase,
            to,
            at: now,
        });
        self.phase = to;
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }
}

/// Bounded journal of finished transactions, oldest evicted first.
#[derive(Debug, Clone)]
pub struct TransactionJournal {
    records: VecDeque<TransactionRecord>,
    capacity: usize,
}

impl TransactionJournal {
    /// Create a journal keeping at most `capacity` records (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Record a transaction.
    pub fn record(&mut self, record: TransactionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_applied() {
        let mut tx = TransactionRecord::begin(TransactionKind::Register, None);
        assert_eq!(tx.phase, TransactionPhase::Proving);
        tx.dispatch().unwrap();
        tx.apply("index 0").unwrap();
        assert_eq!(tx.phase, TransactionPhase::Applied);
        assert!(tx.finished_at.is_some());
        assert_eq!(tx.history.len(), 2);
        assert_eq!(tx.detail.as_deref(), Some("index 0"));
    }

    #[test]
    fn reject_before_dispatch() {
        let mut tx = TransactionRecord::begin(TransactionKind::PostMessage, None);
        tx.reject("not a member").unwrap();
        assert_eq!(tx.phase, TransactionPhase::Rejected);
    }

    #[test]
    fn apply_without_dispatch_is_invalid() {
        let mut tx = TransactionRecord::begin(TransactionKind::Slash, None);
        let err = tx.apply("x").unwrap_err();
        assert_eq!(
            err,
            TransactionError::InvalidTransition {
                from: TransactionPhase::Proving,
                to: TransactionPhase::Applied
            }
        );
        assert!(tx.history.is_empty());
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut tx = TransactionRecord::begin(TransactionKind::WithdrawStake, None);
        tx.dispatch().unwrap();
        tx.reject("declined").unwrap();
        assert!(tx.dispatch().is_err());
        assert!(tx.apply("late").is_err());
        assert!(tx.reject("again").is_err());
        assert_eq!(tx.detail.as_deref(), Some("declined"));
    }

    #[test]
    fn journal_evicts_oldest() {
        let mut journal = TransactionJournal::with_capacity(2);
        let kinds = [
            TransactionKind::Register,
            TransactionKind::PostMessage,
            TransactionKind::Slash,
        ];
        for kind in kinds {
            journal.record(TransactionRecord::begin(kind, None));
        }
        let kept: Vec<TransactionKind> = journal.records().iter().map(|r| r.kind).collect();
        assert_eq!(kept, vec![TransactionKind::PostMessage, TransactionKind::Slash]);
    }

    #[test]
    fn display_names() {
        assert_eq!(TransactionPhase::Settling.to_string(), "SETTLING");
        assert_eq!(TransactionKind::WithdrawStake.to_string(), "WITHDRAW_STAKE");
    }
}
