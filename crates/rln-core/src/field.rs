//! # Field Arithmetic
//!
//! Elements of the Aleo base field (the BLS12-377 scalar field), the field
//! in which every RLN circuit value lives: identity commitments, Merkle
//! nodes, group identifiers, nullifiers and secret shares.
//!
//! ## Security Invariant
//!
//! A [`FieldElement`] always holds a canonical representative in `[0, p)`.
//! Every constructor either reduces (`from_bytes_mod_order`, `random`) or
//! rejects (`from_str`) values outside the field, so two equal protocol
//! values always compare and hash equal.
//!
//! ## Encoding
//!
//! Field elements serialize as decimal strings. Parsing also accepts the
//! Aleo literal suffix (`"42field"`), matching how program inputs are written.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;
use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FieldError;

/// The field modulus `p` in decimal.
pub const FIELD_MODULUS_DECIMAL: &str =
    "8444461749428370424248824938781546531375899335154063827935233455917409239041";

/// Big-endian bytes of the field modulus.
const MODULUS_BYTES: [u8; 32] = [
    0x12, 0xab, 0x65, 0x5e, 0x9a, 0x2c, 0xa5, 0x56, 0x60, 0xb4, 0x4d, 0x1e, 0x5c, 0x37, 0xb0, 0x01,
    0x59, 0xaa, 0x76, 0xfe, 0xd0, 0x00, 0x00, 0x01, 0x0a, 0x11, 0x80, 0x00, 0x00, 0x00, 0x00, 0x01,
];

/// Width in bytes of the canonical big-endian encoding.
pub const FIELD_BYTES: usize = 32;

fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| BigUint::from_bytes_be(&MODULUS_BYTES))
}

/// An element of the Aleo base field.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement(BigUint);

impl FieldElement {
    /// The additive identity.
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// The multiplicative identity.
    pub fn one() -> Self {
        Self(BigUint::one())
    }

    /// Embed a machine integer (always below the modulus).
    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    /// Interpret `bytes` as a big-endian integer and reduce it modulo `p`.
    pub fn from_bytes_mod_order(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes) % modulus())
    }

    /// Draw 32 random bytes and reduce them modulo `p`.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; FIELD_BYTES];
        rng.fill_bytes(&mut bytes);
        Self::from_bytes_mod_order(&bytes)
    }

    /// Canonical 32-byte big-endian encoding.
    pub fn to_bytes_be(&self) -> [u8; FIELD_BYTES] {
        let raw = self.0.to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        // Canonical values are < p < 2^256, so `raw` never exceeds 32 bytes.
        let offset = FIELD_BYTES.saturating_sub(raw.len());
        out[offset..].copy_from_slice(&raw[raw.len().saturating_sub(FIELD_BYTES)..]);
        out
    }

    /// Whether this is the additive identity.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Multiplicative inverse via Fermat's little theorem. `None` for zero.
    pub fn inverse(&self) -> Option<Self> {
        if self.is_zero() {
            return None;
        }
        let exponent = modulus() - BigUint::from(2u8);
        Some(Self(self.0.modpow(&exponent, modulus())))
    }

    /// The value as an Aleo program literal, e.g. `"42field"`.
    pub fn to_aleo_literal(&self) -> String {
        format!("{}field", self.0)
    }

    /// Short form for logs: leading and trailing digits of the decimal value.
    pub fn abbreviated(&self) -> String {
        let digits = self.0.to_str_radix(10);
        if digits.len() <= 12 {
            return digits;
        }
        format!("{}..{}", &digits[..6], &digits[digits.len() - 4..])
    }
}

impl Default for FieldElement {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

// ─── Arithmetic ──────────────────────────────────────────────────────

impl Add<&FieldElement> for &FieldElement {
    type Output = FieldElement;

    fn add(self, rhs: &FieldElement) -> FieldElement {
        FieldElement((&self.0 + &rhs.0) % modulus())
    }
}

impl Sub<&FieldElement> for &FieldElement {
    type Output = FieldElement;

    fn sub(self, rhs: &FieldElement) -> FieldElement {
        // Both operands are < p, so `self + p - rhs` never underflows.
        FieldElement((&self.0 + modulus() - &rhs.0) % modulus())
    }
}

impl Mul<&FieldElement> for &FieldElement {
    type Output = FieldElement;

    fn mul(self, rhs: &FieldElement) -> FieldElement {
        FieldElement((&self.0 * &rhs.0) % modulus())
    }
}

impl Neg for &FieldElement {
    type Output = FieldElement;

    fn neg(self) -> FieldElement {
        &FieldElement::zero() - self
    }
}

impl Add for FieldElement {
    type Output = FieldElement;

    fn add(self, rhs: FieldElement) -> FieldElement {
        &self + &rhs
    }
}

impl Sub for FieldElement {
    type Output = FieldElement;

    fn sub(self, rhs: FieldElement) -> FieldElement {
        &self - &rhs
    }
}

impl Mul for FieldElement {
    type Output = FieldElement;

    fn mul(self, rhs: FieldElement) -> FieldElement {
        &self * &rhs
    }
}

// ─── Text encoding ───────────────────────────────────────────────────

impl FromStr for FieldElement {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_suffix("field").unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FieldError::InvalidLiteral(s.to_string()));
        }
        let value = BigUint::parse_bytes(digits.as_bytes(), 10)
            .ok_or_else(|| FieldError::InvalidLiteral(s.to_string()))?;
        if &value >= modulus() {
            return Err(FieldError::OutOfRange(digits.to_string()));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.abbreviated())
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
