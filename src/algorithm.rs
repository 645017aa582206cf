use std::fmt::{self, Debug};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use subtle::ConstantTimeEq;

/// Implementations of this trait are keyed MAC algorithms usable for signing
/// the canonical message of a request.
///
/// Signer and verifier must agree on the algorithm out of band: the name is
/// not carried on the wire.
pub trait HttpSignature: Debug + Send + Sync + 'static {
    /// Short, lowercase name of the algorithm (eg. `hmac-sha512`).
    fn name(&self) -> &str;
    /// Returns the encoded signature, ready for inclusion in a request header.
    /// The encoding is lowercase hexadecimal.
    fn http_sign(&self, bytes_to_sign: &[u8]) -> String;
    /// Returns true if the signature is valid for the provided content. The
    /// implementation must perform the comparison in constant time.
    fn http_verify(&self, bytes_to_verify: &[u8], signature: &str) -> bool;
}

/// Opaque shared secret. The contents are never inspected, only fed to the MAC.
#[derive(Clone)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Recommended key length in bytes (128 bits).
    pub const DEFAULT_LEN: usize = 16;

    /// Wraps caller-provided key material.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
    /// Generates a fresh key of `DEFAULT_LEN` bytes from the OS random source.
    pub fn generate() -> Self {
        Self::generate_with_len(Self::DEFAULT_LEN)
    }
    /// Generates a fresh key of `len` bytes from the OS random source.
    pub fn generate_with_len(len: usize) -> Self {
        let mut bytes = vec![0; len];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
    /// Decodes a key from its hexadecimal representation.
    pub fn from_hex(hex_key: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(hex_key).map(Self)
    }
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl From<&[u8]> for SecretKey {
    fn from(other: &[u8]) -> Self {
        Self::new(other)
    }
}

impl From<Vec<u8>> for SecretKey {
    fn from(other: Vec<u8>) -> Self {
        Self(other)
    }
}

/// HMAC with SHA-512 as the compression function.
#[derive(Clone)]
pub struct HmacSha512(Hmac<Sha512>);

impl HmacSha512 {
    /// Create a new instance of the signature scheme using the provided key.
    pub fn new(key: &[u8]) -> Self {
        Self(Hmac::new_from_slice(key).expect("HMAC can take key of any size"))
    }

    fn mac(&self, bytes: &[u8]) -> Vec<u8> {
        let mut mac = self.0.clone();
        mac.update(bytes);
        mac.finalize().into_bytes().to_vec()
    }
}

impl Debug for HmacSha512 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("HmacSha512")
    }
}

impl From<&SecretKey> for HmacSha512 {
    fn from(key: &SecretKey) -> Self {
        Self::new(key.as_bytes())
    }
}

impl HttpSignature for HmacSha512 {
    fn name(&self) -> &str {
        "hmac-sha512"
    }
    fn http_sign(&self, bytes_to_sign: &[u8]) -> String {
        hex::encode(self.mac(bytes_to_sign))
    }
    fn http_verify(&self, bytes_to_verify: &[u8], signature: &str) -> bool {
        let provided = match hex::decode(signature) {
            Ok(provided) => provided,
            Err(_) => return false,
        };
        // Slices of unequal length compare unequal without inspecting contents.
        self.mac(bytes_to_verify).ct_eq(&provided).into()
    }
}
