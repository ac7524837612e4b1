//! # Message Log
//!
//! The ordered record of posts the ledger confirmed as within the rate
//! limit. Entries are appended only after confirmation, never edited, and
//! removed only when their sender is slashed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rln_core::{AccountAddress, IdentityCommitment};
use rln_crypto::Share;

/// One confirmed post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Logical arrival order, unique within the board.
    pub sequence: u64,
    /// Sender identity.
    pub sender: IdentityCommitment,
    /// Account that posted.
    pub account: AccountAddress,
    /// Message body.
    pub content: String,
    /// RLN message id used for this post.
    pub message_id: u64,
    /// The sender's share revealed by this post.
    pub share: Share,
    /// When the post was confirmed.
    pub posted_at: DateTime<Utc>,
}

/// A post awaiting a sequence number.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Sender identity.
    pub sender: IdentityCommitment,
    /// Account that posted.
    pub account: AccountAddress,
    /// Message body.
    pub content: String,
    /// RLN message id used for this post.
    pub message_id: u64,
    /// The sender's share revealed by this post.
    pub share: Share,
}

/// Append-only (except for slashing) message log.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    records: Vec<MessageRecord>,
    next_sequence: u64,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a confirmed post and return its record.
    pub fn append(&mut self, message: NewMessage) -> MessageRecord {
        let record = MessageRecord {
            sequence: self.next_sequence,
            sender: message.sender,
            account: message.account,
            content: message.content,
            message_id: message.message_id,
            share: message.share,
            posted_at: Utc::now(),
        };
        self.next_sequence += 1;
        self.records.push(record.clone());
        record
    }

    /// Remove every entry from `sender`. Returns how many were removed.
    /// Sequence numbers are never reused.
    pub fn purge_sender(&mut self, sender: &IdentityCommitment) -> usize {
        let before = self.records.len();
        self.records.retain(|r| &r.sender != sender);
        before - self.records.len()
    }

    /// The share `sender` revealed under `message_id`, if logged.
    pub fn share_for(&self, sender: &IdentityCommitment, message_id: u64) -> Option<&Share> {
        self.records
            .iter()
            .rev()
            .find(|r| &r.sender == sender && r.message_id == message_id)
            .map(|r| &r.share)
    }

    /// Entries from one sender, in order.
    pub fn by_sender(&self, sender: &IdentityCommitment) -> Vec<&MessageRecord> {
        self.records.iter().filter(|r| &r.sender == sender).collect()
    }

    /// Read-only ordered copy for publishing to readers.
    pub fn snapshot(&self) -> Arc<Vec<MessageRecord>> {
        Arc::new(self.records.clone())
    }
}
