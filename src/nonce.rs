use std::fmt::{self, Display};
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Errors produced when decoding nonces and timestamps from their wire form.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    /// The nonce was not valid hexadecimal.
    #[error("Nonce is not valid hex: {0}")]
    NonceHex(#[from] hex::FromHexError),
    /// The nonce decoded to zero bytes.
    #[error("Nonce is empty")]
    EmptyNonce,
    /// The timestamp was not a decimal integer.
    #[error("Timestamp is not a decimal integer: {0:?}")]
    Timestamp(String),
}

/// A single-use random value accompanying each signed request.
///
/// Carried on the wire, and in the canonical message, as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Recommended nonce length in bytes (128 bits).
    pub const DEFAULT_LEN: usize = 16;

    /// Generates a fresh nonce of `len` bytes from the OS random source.
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0; len];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
    /// Wraps an existing byte sequence.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
    /// Raw nonce bytes. These are what the nonce cache is keyed by.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    /// Lowercase hexadecimal encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Nonce {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.is_empty() {
            return Err(ParseError::EmptyNonce);
        }
        Ok(Self(bytes))
    }
}

/// Parses a decimal timestamp (seconds since the Unix epoch).
pub fn parse_timestamp(s: &str) -> Result<i64, ParseError> {
    // `i64::from_str` accepts a leading '+', which the wire format does not.
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        return Err(ParseError::Timestamp(s.into()));
    }
    s.parse().map_err(|_| ParseError::Timestamp(s.into()))
}
