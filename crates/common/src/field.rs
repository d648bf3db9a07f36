use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// BN254 scalar field modulus (the field the proving circuit works over).
const BN254_FR_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(BN254_FR_MODULUS.as_bytes(), 10).expect("bn254 modulus parse")
    })
}

/// A 32-byte field scalar as stored on chain.
///
/// Bytes are big-endian; the decimal rendering is the form the chain and the
/// proving circuit both use for the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldElement(pub [u8; 32]);

impl FieldElement {
    /// The empty-leaf placeholder.
    pub const ZERO: FieldElement = FieldElement([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Copy the first 32 bytes of `slice`. Callers check the length.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = slice.get(..32)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether the value is strictly below the scalar field modulus.
    pub fn is_canonical(&self) -> bool {
        BigUint::from_bytes_be(&self.0) < *modulus()
    }

    pub fn to_decimal(&self) -> String {
        BigUint::from_bytes_be(&self.0).to_str_radix(10)
    }

    pub fn from_decimal(s: &str) -> Result<Self> {
        let n: BigUint = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidFieldElement(format!("not a decimal integer: {s}")))?;
        if n >= *modulus() {
            return Err(Error::InvalidFieldElement(format!(
                "value exceeds field modulus: {s}"
            )));
        }
        let be = n.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - be.len()..].copy_from_slice(&be);
        Ok(Self(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}
