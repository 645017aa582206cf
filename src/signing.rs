use std::sync::Arc;

use chrono::Utc;
use http::header::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::algorithm::HttpSignature;
use crate::canonicalize::{CanonicalizeConfig, CanonicalizeError, RequestFields, RequestLike};
use crate::header::SignatureHeaders;
use crate::nonce::Nonce;
use crate::window::ConfigError;
use crate::DefaultSignatureAlgorithm;

/// This trait is to be implemented for types representing an outgoing
/// HTTP request. The HTTP signing extension methods are available on
/// any type implementing this trait.
pub trait ClientRequestLike: RequestLike {
    /// Add or replace a header on the request.
    fn set_header(&mut self, header: HeaderName, value: HeaderValue);
    /// Returns the complete request body, buffering it if necessary. An empty
    /// body is `Some(vec![])`; `None` means the body could not be read (for
    /// example because it is a stream).
    fn body_bytes(&mut self) -> Option<Vec<u8>>;
}

/// The types of error which may occur whilst signing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SigningError {
    /// A field selected for signing was not available.
    #[error("Failed to canonicalize request: {0}")]
    Canonicalize(#[from] CanonicalizeError),
    /// The request body could not be read, so could not be signed.
    #[error("Request body is not available for signing")]
    UnreadableBody,
}

/// The configuration used for signing HTTP requests.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    signature: Arc<dyn HttpSignature>,
    canonicalize: CanonicalizeConfig,
    nonce_len: usize,
}

impl SigningConfig {
    /// Creates a new signing configuration using the default signature
    /// algorithm (`hmac-sha512`) and the given shared key.
    pub fn new_default(key: &[u8]) -> Self {
        Self::new(DefaultSignatureAlgorithm::new(key))
    }

    /// Creates a new signing configuration using a custom signature algorithm.
    pub fn new<SigAlg: HttpSignature>(signature: SigAlg) -> Self {
        SigningConfig {
            signature: Arc::new(signature),
            canonicalize: CanonicalizeConfig::default(),
            nonce_len: Nonce::DEFAULT_LEN,
        }
    }

    /// Returns the signature algorithm.
    pub fn signature(&self) -> &dyn HttpSignature {
        &*self.signature
    }
    /// Returns the canonicalization configuration.
    pub fn canonicalize(&self) -> &CanonicalizeConfig {
        &self.canonicalize
    }
    /// Controls which fields are signed (in-place).
    pub fn set_canonicalize(&mut self, canonicalize: CanonicalizeConfig) -> &mut Self {
        self.canonicalize = canonicalize;
        self
    }
    /// Controls which fields are signed.
    pub fn with_canonicalize(mut self, canonicalize: CanonicalizeConfig) -> Self {
        self.set_canonicalize(canonicalize);
        self
    }
    /// Returns the number of random bytes in each generated nonce.
    ///
    /// This is set to 16 by default.
    pub fn nonce_len(&self) -> usize {
        self.nonce_len
    }
    /// Controls the number of random bytes in each generated nonce (in-place).
    pub fn set_nonce_len(&mut self, nonce_len: usize) -> Result<&mut Self, ConfigError> {
        if nonce_len == 0 {
            return Err(ConfigError::ZeroNonceLength);
        }
        self.nonce_len = nonce_len;
        Ok(self)
    }
    /// Controls the number of random bytes in each generated nonce.
    pub fn with_nonce_len(mut self, nonce_len: usize) -> Result<Self, ConfigError> {
        self.set_nonce_len(nonce_len)?;
        Ok(self)
    }

    /// Signs the given fields with a fresh nonce and the current time.
    ///
    /// The returned values must accompany the request to the recipient.
    pub fn sign_request(&self, fields: &RequestFields) -> Result<SignatureHeaders, SigningError> {
        let nonce = Nonce::generate(self.nonce_len);
        let timestamp = Utc::now().timestamp();
        Ok(self.sign_request_with(fields, nonce, timestamp)?)
    }

    /// Signs the given fields using a caller-supplied nonce and timestamp.
    ///
    /// Never reuse a nonce: this exists for reproducible signatures in tests
    /// and tooling.
    pub fn sign_request_with(
        &self,
        fields: &RequestFields,
        nonce: Nonce,
        timestamp: i64,
    ) -> Result<SignatureHeaders, CanonicalizeError> {
        self.sign_parts(fields, fields.body(), nonce, timestamp)
    }

    fn sign_parts<R: RequestLike + ?Sized>(
        &self,
        req: &R,
        body: &[u8],
        nonce: Nonce,
        timestamp: i64,
    ) -> Result<SignatureHeaders, CanonicalizeError> {
        let message = self.canonicalize.canonicalize(req, timestamp, &nonce, body)?;
        let signature = self.signature.http_sign(message.as_bytes());
        Ok(SignatureHeaders {
            signature,
            nonce,
            timestamp,
        })
    }
}

/// Import this trait to get access to the `sign` and `signed` methods on all
/// types implementing `ClientRequestLike`.
pub trait SigningExt: Sized {
    /// Signs the request, consuming and returning it.
    fn signed(mut self, config: &SigningConfig) -> Result<Self, SigningError> {
        self.sign(config)?;
        Ok(self)
    }

    /// Signs the request in place, attaching the signature, nonce and
    /// timestamp headers.
    fn sign(&mut self, config: &SigningConfig) -> Result<(), SigningError>;
}

impl<R: ClientRequestLike> SigningExt for R {
    fn sign(&mut self, config: &SigningConfig) -> Result<(), SigningError> {
        let body = self.body_bytes().ok_or(SigningError::UnreadableBody)?;
        let nonce = Nonce::generate(config.nonce_len);
        let timestamp = Utc::now().timestamp();

        let signed = config.sign_parts(&*self, &body, nonce, timestamp)?;

        // Attach the signature headers to the request
        for (name, value) in signed.to_headers() {
            self.set_header(name, value);
        }

        Ok(())
    }
}
