//! # RLN Secret Shares
//!
//! Every post reveals one point on a line private to the poster:
//!
//! ```text
//! a1 = H([secret, external_nullifier, message_id])
//! x  = field(content)
//! y  = secret + a1 · x
//! ```
//!
//! Posts within the rate limit use distinct `message_id`s and therefore
//! distinct lines. A post over the limit reuses a `message_id`, so two
//! points land on the same line and anyone holding both recovers the
//! intercept, which is the secret. The shared `internal_nullifier = H([a1])`
//! is how the two points are matched.
//!
//! ## Security Invariant
//!
//! Recovery needs two points with distinct `x`. A single report, or two
//! reports of the same message, cannot reconstruct the secret.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rln_core::{message_to_field, FieldElement, FieldHasher, MemberSecret};

/// Errors from share reconstruction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    /// Both shares have the same `x`; the line is underdetermined.
    #[error("shares have identical x coordinates; secret cannot be recovered")]
    DegenerateShares,
}

/// One point on a member's RLN line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Message digest in the field.
    pub x: FieldElement,
    /// `secret + a1 · x`.
    pub y: FieldElement,
}

/// A share together with the nullifier that identifies its line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlnSignal {
    /// The revealed point.
    pub share: Share,
    /// `H([a1])`; equal for every post on the same line.
    pub internal_nullifier: FieldElement,
}

/// Two points on an offender's line, as submitted to `slash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareParams {
    /// First point, x coordinate.
    pub x0: FieldElement,
    /// First point, y coordinate.
    pub y0: FieldElement,
    /// Second point, x coordinate.
    pub x1: FieldElement,
    /// Second point, y coordinate.
    pub y1: FieldElement,
}

impl ShareParams {
    /// Pair two shares.
    pub fn from_shares(first: &Share, second: &Share) -> Self {
        Self {
            x0: first.x.clone(),
            y0: first.y.clone(),
            x1: second.x.clone(),
            y1: second.y.clone(),
        }
    }
}

/// Slope of the member's line for one `(external_nullifier, message_id)`.
pub fn line_slope(
    hasher: &dyn FieldHasher,
    secret: &MemberSecret,
    external_nullifier: &FieldElement,
    message_id: u64,
) -> FieldElement {
    hasher.hash(&[
        secret.expose().clone(),
        external_nullifier.clone(),
        FieldElement::from_u64(message_id),
    ])
}

/// Compute the signal a member reveals when posting `content`.
pub fn compute_signal(
    hasher: &dyn FieldHasher,
    secret: &MemberSecret,
    external_nullifier: &FieldElement,
    message_id: u64,
    content: &str,
) -> RlnSignal {
    let a1 = line_slope(hasher, secret, external_nullifier, message_id);
    let x = message_to_field(content);
    let y = secret.expose() + &(&a1 * &x);
    RlnSignal {
        share: Share { x, y },
        internal_nullifier: hasher.hash(std::slice::from_ref(&a1)),
    }
}

/// Recover the secret from two points on the same line.
pub fn recover_secret(params: &ShareParams) -> Result<MemberSecret, ShareError> {
    let dx = &params.x1 - &params.x0;
    let inv = dx.inverse().ok_or(ShareError::DegenerateShares)?;
    let slope = &(&params.y1 - &params.y0) * &inv;
    let secret = &params.y0 - &(&slope * &params.x0);
    Ok(MemberSecret::from_field(secret))
}
