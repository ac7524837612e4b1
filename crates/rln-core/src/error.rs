//! # Error Types
//!
//! Errors raised while constructing foundational values. Everything above
//! this crate wraps these with `#[from]` rather than re-describing them.

use thiserror::Error;

/// Error parsing or constructing a field element.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The input is not a decimal integer.
    #[error("invalid field literal {0:?}: expected a decimal integer")]
    InvalidLiteral(String),

    /// The value is not below the field modulus.
    #[error("value {0} is not below the field modulus")]
    OutOfRange(String),
}

/// Error constructing an identity newtype.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Account addresses must be non-empty.
    #[error("account address must not be empty")]
    EmptyAddress,

    /// Account addresses must not contain whitespace.
    #[error("account address {0:?} contains whitespace")]
    InvalidAddress(String),

    /// The secret is not a valid field element.
    #[error("invalid member secret: {0}")]
    InvalidSecret(#[from] FieldError),
}
