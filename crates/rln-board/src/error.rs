//! Board error type.
//!
//! Every failure a caller can see from a [`Board`](crate::Board) operation.
//! Rate-limit violations are not errors; they come back as a
//! [`PostResult`](crate::PostResult) carrying a slash event.

use thiserror::Error;

use rln_core::{FieldElement, MemberId};
use rln_crypto::TreeError;
use rln_settlement::SettlementError;
use rln_state::{RegistryError, TransactionError};

use crate::config::ConfigError;

/// Errors from board operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// The identity is not a live member of this board.
    #[error("{0} is not a member of this board")]
    NotAMember(MemberId),

    /// The identity is already a live member.
    #[error("{0} is already a member of this board")]
    DuplicateMember(MemberId),

    /// The request was proven against a root the ledger no longer holds.
    /// Sync and retry.
    #[error(
        "stale root: ledger is at {}, local root was {}",
        .expected.abbreviated(),
        .actual.abbreviated()
    )]
    StaleRoot {
        /// The ledger's root.
        expected: FieldElement,
        /// The root the request was proven against.
        actual: FieldElement,
    },

    /// The ledger declined the transition.
    #[error("settlement rejected: {0}")]
    SettlementRejected(String),

    /// The ledger could not be reached.
    #[error("settlement unavailable: {0}")]
    SettlementUnavailable(String),

    /// Local state could not be reconciled with the ledger. The board
    /// refuses further writes.
    #[error("board is inconsistent: {0}")]
    Inconsistent(String),

    /// The membership tree is full.
    #[error("membership tree is full ({capacity} leaves)")]
    CapacityExceeded {
        /// Leaf capacity of the tree.
        capacity: usize,
    },

    /// The group or a record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The submitted shares do not reveal the offender's secret.
    #[error("invalid shares: {0}")]
    InvalidShares(String),

    /// Registry failure not covered above.
    #[error("registry error: {0}")]
    Registry(RegistryError),

    /// Tree failure not covered above.
    #[error("tree error: {0}")]
    Tree(TreeError),

    /// Transaction lifecycle misuse.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Invalid board configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The task settling a dispatched request panicked or was aborted.
    #[error("settlement task aborted: {0}")]
    TaskAborted(String),
}

impl BoardError {
    /// Whether the caller may retry the operation (after syncing, for
    /// `StaleRoot`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleRoot { .. } | Self::SettlementUnavailable(_))
    }

    /// Whether this error left the board in the `Inconsistent` state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Inconsistent(_))
    }
}

impl From<SettlementError> for BoardError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Rejected(reason) => Self::SettlementRejected(reason),
            SettlementError::StaleRoot { expected, actual } => Self::StaleRoot { expected, actual },
            SettlementError::Unavailable(reason) => Self::SettlementUnavailable(reason),
            SettlementError::UnknownGroup(group) => Self::NotFound(group.to_string()),
        }
    }
}

impl From<TreeError> for BoardError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::CapacityExceeded { capacity } => Self::CapacityExceeded { capacity },
            other => Self::Tree(other),
        }
    }
}

impl From<RegistryError> for BoardError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateMember(id) => Self::DuplicateMember(id),
            RegistryError::NotFound(id) => Self::NotAMember(id),
            RegistryError::Tree(tree) => tree.into(),
            other => Self::Registry(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rln_core::{GroupId, IdentityCommitment};

    fn member() -> MemberId {
        IdentityCommitment::from_field(FieldElement::from_u64(9)).member_id()
    }

    #[test]
    fn retryable_errors() {
        let stale = BoardError::StaleRoot {
            expected: FieldElement::one(),
            actual: FieldElement::zero(),
        };
        assert!(stale.is_retryable());
        assert!(BoardError::SettlementUnavailable("down".into()).is_retryable());
        assert!(!BoardError::SettlementRejected("bad".into()).is_retryable());
        assert!(!BoardError::NotAMember(member()).is_retryable());
        assert!(!BoardError::Inconsistent("x".into()).is_retryable());
    }

    #[test]
    fn settlement_errors_map_one_to_one() {
        assert!(matches!(
            BoardError::from(SettlementError::Rejected("r".into())),
            BoardError::SettlementRejected(_)
        ));
        assert!(matches!(
            BoardError::from(SettlementError::Unavailable("u".into())),
            BoardError::SettlementUnavailable(_)
        ));
        assert!(matches!(
            BoardError::from(SettlementError::UnknownGroup(GroupId::generate())),
            BoardError::NotFound(_)
        ));
    }

    #[test]
    fn registry_errors_lift_to_board_variants() {
        assert_eq!(
            BoardError::from(RegistryError::NotFound(member())),
            BoardError::NotAMember(member())
        );
        assert_eq!(
            BoardError::from(RegistryError::Tree(TreeError::CapacityExceeded { capacity: 4 })),
            BoardError::CapacityExceeded { capacity: 4 }
        );
        assert!(matches!(
            BoardError::from(RegistryError::ZeroCommitment),
            BoardError::Registry(_)
        ));
    }

    #[test]
    fn stale_root_message_abbreviates() {
        let err = BoardError::StaleRoot {
            expected: FieldElement::from_u64(1),
            actual: FieldElement::from_u64(2),
        };
        assert!(err.to_string().starts_with("stale root"));
    }
}
