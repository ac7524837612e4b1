//! # Ledger Records
//!
//! The private records a member holds on the ledger. The board never edits
//! these; it only replaces its cached copy with the one a confirmed
//! settlement returns. Each record carries a `nonce` so a spent record can
//! be told apart from its successor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::AccountAddress;

/// A stake token record: `amount` credits owned by `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeToken {
    /// Record nonce; a new nonce is issued every time the record is consumed.
    pub nonce: Uuid,
    /// Account that owns the record.
    pub owner: AccountAddress,
    /// Staked amount.
    pub amount: u64,
}

impl StakeToken {
    /// Issue a fresh record.
    pub fn issue(owner: AccountAddress, amount: u64) -> Self {
        Self {
            nonce: Uuid::new_v4(),
            owner,
            amount,
        }
    }
}

/// A member's message counter record for the current group epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounterRecord {
    /// Record nonce; a new nonce is issued on every post.
    pub nonce: Uuid,
    /// Account that owns the record.
    pub owner: AccountAddress,
    /// Messages posted so far in this epoch, including rejected ones.
    pub count: u64,
}

impl MessageCounterRecord {
    /// Issue a fresh counter at zero.
    pub fn issue(owner: AccountAddress) -> Self {
        Self {
            nonce: Uuid::new_v4(),
            owner,
            count: 0,
        }
    }

    /// The successor record after one more post.
    pub fn incremented(&self) -> Self {
        Self {
            nonce: Uuid::new_v4(),
            owner: self.owner.clone(),
            count: self.count.saturating_add(1),
        }
    }
}
