use std::convert::TryFrom;

use http::header::{HeaderName, HeaderValue};

use crate::canonicalize::RequestLike;
use crate::nonce::{parse_timestamp, Nonce};
use crate::verifying::VerifyingError;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Header carrying the hex-encoded nonce.
pub const NONCE_HEADER: &str = "x-nonce";
/// Header carrying the decimal Unix timestamp.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// The values a signer attaches to a request, and a verifier reads back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    /// Hex-encoded MAC over the canonical message.
    pub signature: String,
    /// Single-use nonce.
    pub nonce: Nonce,
    /// Seconds since the Unix epoch at signing time.
    pub timestamp: i64,
}

fn required<R: RequestLike + ?Sized>(req: &R, name: &'static str) -> Result<String, VerifyingError> {
    let value = req
        .header(&HeaderName::from_static(name))
        .ok_or_else(|| VerifyingError::MalformedInput(format!("missing {} header", name)))?;
    value
        .to_str()
        .map(|v| v.trim().to_owned())
        .map_err(|_| VerifyingError::MalformedInput(format!("{} header is not ASCII", name)))
}

impl SignatureHeaders {
    /// Reads the signature headers from a request.
    pub fn from_request<R: RequestLike + ?Sized>(req: &R) -> Result<Self, VerifyingError> {
        let signature = required(req, SIGNATURE_HEADER)?;
        let nonce = required(req, NONCE_HEADER)?
            .parse()
            .map_err(|e| VerifyingError::MalformedInput(format!("{}", e)))?;
        let timestamp = parse_timestamp(&required(req, TIMESTAMP_HEADER)?)
            .map_err(|e| VerifyingError::MalformedInput(format!("{}", e)))?;
        Ok(Self {
            signature,
            nonce,
            timestamp,
        })
    }

    /// The headers to attach to an outgoing request.
    pub fn to_headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        vec![
            (
                HeaderName::from_static(SIGNATURE_HEADER),
                HeaderValue::try_from(self.signature.as_str())
                    .expect("Hex signatures should always be valid header values"),
            ),
            (
                HeaderName::from_static(NONCE_HEADER),
                HeaderValue::try_from(self.nonce.to_hex())
                    .expect("Hex nonces should always be valid header values"),
            ),
            (
                HeaderName::from_static(TIMESTAMP_HEADER),
                HeaderValue::from(self.timestamp),
            ),
        ]
    }
}
