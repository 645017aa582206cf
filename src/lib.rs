#![deny(missing_docs)]
//! Symmetric-key HTTP request signing with replay protection.
//!
//! A sender and recipient share a secret key. The sender computes an
//! HMAC-SHA512 over a canonical message built from the request (method,
//! URL, a timestamp, a random nonce, the body and any selected headers) and
//! sends the signature, nonce and timestamp alongside the request in the
//! `X-Signature`, `X-Nonce` and `X-Timestamp` headers.
//!
//! The recipient rebuilds the canonical message from its own view of the
//! request, checks the signature, checks that the timestamp falls within an
//! acceptance window and finally records the nonce, rejecting any request
//! whose nonce has already been seen.
//!
//! ## Features
//!
//! This crate is intended to be used with multiple different HTTP clients and/or servers.
//! As such, client/server-specific implementations are gated by correspondingly named
//! features.
//!
//! ### Supported crates:
//!
//! | Crate / Feature name                              | Client/Server | Notes                                                         |
//! | ------------------------------------------------- | ------------- | ------------------------------------------------------------- |
//! | [reqwest](https://crates.io/crates/reqwest)       | Client        | Supports blocking and non-blocking requests.<sup>1</sup>      |
//! | [rouille](https://crates.io/crates/rouille)       | Server        |                                                               |
//! | [tokio](https://crates.io/crates/tokio)           | Server        | Background sweeping of expired nonces.                        |
//!
//! 1. Streaming request bodies cannot be signed, as the whole body must be
//!    known up front. Signing such a request fails with
//!    `SigningError::UnreadableBody`.
//!
//! ### Supported signature algorithms:
//!
//! - `hmac-sha512`
//!
//! ## Example usage (reqwest)
//!
//! ```rust,ignore
//! use http_hmac_sig::*;
//!
//! const SECRET_KEY: &[u8] = b"0123456789abcdef";
//!
//! let config = SigningConfig::new_default(SECRET_KEY);
//!
//! let client = reqwest::blocking::Client::new();
//!
//! let req = client
//!     .get("http://localhost:8080/")
//!     .build()
//!     .unwrap()
//!     .signed(&config)
//!     .unwrap();
//!
//! let result = client.execute(req).unwrap();
//! ```
//!
//! ## Example usage (verification)
//!
//! ```rust
//! use http::Method;
//! use http_hmac_sig::*;
//!
//! let signing = SigningConfig::new_default(b"secret");
//! let verifying = VerifyingConfig::new_default(b"secret");
//!
//! let fields = RequestFields::new(&b"{}"[..])
//!     .with_method(Method::POST)
//!     .with_url("/orders");
//! let signed = signing.sign_request(&fields).unwrap();
//!
//! let now = signed.timestamp;
//! assert!(verifying
//!     .verify_request(&fields, &signed.signature, &signed.nonce, signed.timestamp, now)
//!     .is_ok());
//!
//! // The same request cannot be accepted twice.
//! assert_eq!(
//!     verifying.verify_request(&fields, &signed.signature, &signed.nonce, signed.timestamp, now),
//!     Err(VerifyingError::ReplayDetected)
//! );
//! ```

type DefaultSignatureAlgorithm = algorithm::HmacSha512;

#[macro_use]
mod macros;

mod algorithm;
pub use algorithm::*;

mod nonce;
pub use nonce::*;

mod canonicalize;
pub use canonicalize::*;

mod header;
pub use header::*;

mod window;
pub use window::*;

mod cache;
pub use cache::*;

mod signing;
pub use signing::*;

mod verifying;
pub use verifying::*;

/// Module containg a mock request type which implements both
/// `ClientRequestLike` and `ServerRequestLike` for testing.
pub mod mock_request;

#[cfg(feature = "reqwest")]
mod reqwest_impls;
#[cfg(feature = "reqwest")]
pub use reqwest_impls::*;

#[cfg(feature = "rouille")]
mod rouille_impls;
#[cfg(feature = "rouille")]
pub use rouille_impls::*;
