use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::algorithm::HttpSignature;
use crate::cache::{Insertion, NonceCache, NonceCacheConfig};
use crate::canonicalize::{CanonicalizeConfig, RequestFields, RequestLike};
use crate::header::SignatureHeaders;
use crate::nonce::Nonce;
use crate::window::{ConfigError, TimestampWindow, WindowError};
use crate::DefaultSignatureAlgorithm;

/// Reasons a request is rejected. None of these are retryable with the same
/// signature, nonce and timestamp: the sender must sign the request afresh.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyingError {
    /// The MAC did not match: the request was tampered with, or the keys differ.
    #[error("Signature is invalid")]
    SignatureInvalid,
    /// The timestamp is too far ahead of the recipient's clock.
    #[error("Timestamp {timestamp} is in the future (now {now})")]
    TimestampFromFuture {
        /// Claimed timestamp.
        timestamp: i64,
        /// Recipient time.
        now: i64,
    },
    /// The timestamp is too old to be replay-checked.
    #[error("Timestamp {timestamp} is too far in the past (now {now})")]
    TimestampFromPast {
        /// Claimed timestamp.
        timestamp: i64,
        /// Recipient time.
        now: i64,
    },
    /// The nonce has already been consumed.
    #[error("Nonce has already been used")]
    ReplayDetected,
    /// A required field was missing or could not be parsed.
    #[error("Malformed request: {0}")]
    MalformedInput(String),
    /// The nonce cache is full of live entries and cannot record the nonce.
    #[error("Nonce cache is full")]
    CacheOverloaded,
}

impl VerifyingError {
    /// Whether resending the same signed request could succeed. Always false:
    /// the sender must sign the request again with a fresh nonce and timestamp.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<WindowError> for VerifyingError {
    fn from(other: WindowError) -> Self {
        match other {
            WindowError::FromFuture { timestamp, now } => {
                VerifyingError::TimestampFromFuture { timestamp, now }
            }
            WindowError::FromPast { timestamp, now } => {
                VerifyingError::TimestampFromPast { timestamp, now }
            }
        }
    }
}

/// This error indicates that we failed to verify the request. As a result
/// the request should be ignored.
#[derive(Debug)]
#[non_exhaustive]
pub struct RejectedRequest<Remnant> {
    reason: VerifyingError,
    remnant: Remnant,
}

impl<Remnant> RejectedRequest<Remnant> {
    /// Why the request was rejected.
    pub fn reason(&self) -> &VerifyingError {
        &self.reason
    }
    /// For some request types, the verification process may be a destructive operation.
    /// This method can be used to access information that would otherwise be lost as a
    /// result of the failed verification.
    pub fn into_remnant(self) -> Remnant {
        self.remnant
    }
}

/// The configuration used for verifying HTTP requests.
///
/// Holds the nonce cache shared by every verification made with this
/// configuration. Clones share the same cache.
#[derive(Debug, Clone)]
pub struct VerifyingConfig {
    signature: Arc<dyn HttpSignature>,
    canonicalize: CanonicalizeConfig,
    window: TimestampWindow,
    cache: Arc<NonceCache>,
}

impl VerifyingConfig {
    /// Creates a new verifying configuration using the default signature
    /// algorithm, the default timestamp window and a fresh nonce cache.
    pub fn new_default(key: &[u8]) -> Self {
        let window = TimestampWindow::default();
        let cache = NonceCache::default();
        Self::build(Arc::new(DefaultSignatureAlgorithm::new(key)), window, Arc::new(cache))
    }

    /// Creates a new verifying configuration from its parts.
    ///
    /// Fails if the cache would forget nonces before their timestamps leave
    /// the acceptance window.
    pub fn new<SigAlg: HttpSignature>(
        signature: SigAlg,
        window: TimestampWindow,
        cache: Arc<NonceCache>,
    ) -> Result<Self, ConfigError> {
        if cache.ttl() < window.cache_ttl() {
            return Err(ConfigError::CacheTtlTooShort {
                cache: cache.ttl(),
                window: window.cache_ttl(),
            });
        }
        Ok(Self::build(Arc::new(signature), window, cache))
    }

    /// Creates a new verifying configuration with a fresh nonce cache sized by
    /// `cache_config`, whose TTL also bounds the timestamp window.
    pub fn with_cache_config<SigAlg: HttpSignature>(
        signature: SigAlg,
        clock_skew: std::time::Duration,
        cache_config: &NonceCacheConfig,
    ) -> Result<Self, ConfigError> {
        let window = TimestampWindow::new(clock_skew, cache_config.ttl())?;
        let cache = NonceCache::new(cache_config)?;
        Self::new(signature, window, Arc::new(cache))
    }

    fn build(
        signature: Arc<dyn HttpSignature>,
        window: TimestampWindow,
        cache: Arc<NonceCache>,
    ) -> Self {
        info!(
            "Verifying {} signatures with clock skew {:?}, cache TTL {:?}, capacity {}",
            signature.name(),
            window.clock_skew(),
            window.cache_ttl(),
            cache.capacity()
        );
        VerifyingConfig {
            signature,
            canonicalize: CanonicalizeConfig::default(),
            window,
            cache,
        }
    }

    /// Returns the signature algorithm.
    pub fn signature(&self) -> &dyn HttpSignature {
        &*self.signature
    }
    /// Returns the timestamp window.
    pub fn window(&self) -> &TimestampWindow {
        &self.window
    }
    /// Returns the shared nonce cache.
    pub fn cache(&self) -> &Arc<NonceCache> {
        &self.cache
    }
    /// Returns the canonicalization configuration.
    pub fn canonicalize(&self) -> &CanonicalizeConfig {
        &self.canonicalize
    }
    /// Controls which fields are expected to be signed (in-place). This must
    /// match the signer's configuration.
    pub fn set_canonicalize(&mut self, canonicalize: CanonicalizeConfig) -> &mut Self {
        self.canonicalize = canonicalize;
        self
    }
    /// Controls which fields are expected to be signed. This must match the
    /// signer's configuration.
    pub fn with_canonicalize(mut self, canonicalize: CanonicalizeConfig) -> Self {
        self.set_canonicalize(canonicalize);
        self
    }

    /// Verifies a request given the verifier's own view of its fields and the
    /// signature, nonce and timestamp received with it.
    ///
    /// Checks run in a fixed order: signature, then timestamp window, then the
    /// nonce cache. Only a request which passes the first two checks can
    /// consume a nonce.
    pub fn verify_request(
        &self,
        fields: &RequestFields,
        signature: &str,
        nonce: &Nonce,
        timestamp: i64,
        now: i64,
    ) -> Result<(), VerifyingError> {
        let result = self.verify_parts(fields, signature, nonce, timestamp, now);
        if let Err(e) = &result {
            debug!("Rejected request with nonce {}: {}", nonce, e);
        }
        result
    }

    fn verify_parts(
        &self,
        fields: &RequestFields,
        signature: &str,
        nonce: &Nonce,
        timestamp: i64,
        now: i64,
    ) -> Result<(), VerifyingError> {
        // Rebuild the message from our own copy of the request
        let message = self
            .canonicalize
            .canonicalize(fields, timestamp, nonce, fields.body())
            .map_err(|e| VerifyingError::MalformedInput(e.to_string()))?;

        if !self.signature.http_verify(message.as_bytes(), signature) {
            return Err(VerifyingError::SignatureInvalid);
        }

        self.window.check(timestamp, now)?;

        // Mutates shared state, so must come last
        match self.cache.try_insert(nonce.as_bytes(), now) {
            Insertion::Inserted => Ok(()),
            Insertion::Replayed => Err(VerifyingError::ReplayDetected),
            Insertion::Overloaded => Err(VerifyingError::CacheOverloaded),
        }
    }
}

/// This trait is to be implemented for types representing an incoming
/// HTTP request. The HTTP verification extension methods are available on
/// any type implementing this trait.
///
/// Typically this trait is implemented for references or mutable references to those
/// request types rather than for the request type itself.
pub trait ServerRequestLike: RequestLike + Sized {
    /// For some request types, the verification process may be a destructive operation.
    /// This associated type can be used to return information that might otherwise
    /// be lost.
    type Remnant;

    /// Complete the verification process, reading the request body. This may
    /// require buffering the whole request body into memory.
    ///
    /// The body is returned as the first element of the tuple (empty if the
    /// request has no body), or `None` if it could not be read. The second
    /// element may contain anything the implementation wants returned to the
    /// caller (for example the buffered body, if it had to be removed from the
    /// request).
    fn complete_with_body(self) -> (Option<Vec<u8>>, Self::Remnant);

    /// Complete the verification process without reading the body.
    fn complete(self) -> Self::Remnant;
}

/// Import this trait to get access to the `verify` method on all types implementing
/// `ServerRequestLike`.
pub trait VerifyingExt {
    /// For some request types, the verification process may be a destructive operation.
    /// This associated type can be used to return information that might otherwise
    /// be lost.
    type Remnant;

    /// Verify the request using the given verification configuration and the
    /// system clock.
    fn verify(
        self,
        config: &VerifyingConfig,
    ) -> Result<Self::Remnant, RejectedRequest<Self::Remnant>>;
}

impl<T: ServerRequestLike> VerifyingExt for T {
    type Remnant = T::Remnant;

    fn verify(
        self,
        config: &VerifyingConfig,
    ) -> Result<Self::Remnant, RejectedRequest<Self::Remnant>> {
        let received = match SignatureHeaders::from_request(&self) {
            Ok(received) => received,
            Err(reason) => {
                debug!("Rejected request: {}", reason);
                return Err(RejectedRequest {
                    reason,
                    remnant: self.complete(),
                });
            }
        };

        // Snapshot what we need from the request before the body consumes it.
        let fields = RequestFields::capture(&self, config.canonicalize.headers());

        let (body, remnant) = self.complete_with_body();
        let body = match body {
            Some(body) => body,
            None => {
                let reason = VerifyingError::MalformedInput("unreadable body".into());
                debug!("Rejected request: {}", reason);
                return Err(RejectedRequest { reason, remnant });
            }
        };

        match config.verify_request(
            &fields.with_body(body),
            &received.signature,
            &received.nonce,
            received.timestamp,
            Utc::now().timestamp(),
        ) {
            Ok(()) => Ok(remnant),
            Err(reason) => Err(RejectedRequest { reason, remnant }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use http::header::{HeaderName, HeaderValue};
    use http::Method;
    use rand::seq::SliceRandom;
    use rand::Rng;

    use super::*;
    use crate::algorithm::HmacSha512;
    use crate::mock_request::MockRequest;
    use crate::signing::{SigningConfig, SigningExt};

    const KEY: &[u8] = b"0123456789abcdef";
    const NOW: i64 = 1_600_000_000;

    fn fields() -> RequestFields {
        RequestFields::new(&b"{\"a\": 1}"[..])
            .with_method(Method::POST)
            .with_url("/resource?id=7")
    }

    fn nonce(byte: u8) -> Nonce {
        Nonce::from_bytes(vec![byte; 16])
    }

    fn sign(fields: &RequestFields, nonce: &Nonce, timestamp: i64) -> String {
        SigningConfig::new_default(KEY)
            .sign_request_with(fields, nonce.clone(), timestamp)
            .unwrap()
            .signature
    }

    #[test]
    fn accepts_then_detects_replay() {
        let config = VerifyingConfig::new_default(KEY);
        let sig = sign(&fields(), &nonce(1), NOW);

        assert_eq!(config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW), Ok(()));
        assert_eq!(
            config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW + 1),
            Err(VerifyingError::ReplayDetected)
        );
        assert!(!VerifyingError::ReplayDetected.is_retryable());
        assert_eq!(config.cache().len(), 1);
    }

    #[test]
    fn rejects_wrong_key() {
        let config = VerifyingConfig::new_default(b"another key");
        let sig = sign(&fields(), &nonce(1), NOW);
        assert_eq!(
            config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW),
            Err(VerifyingError::SignatureInvalid)
        );
    }

    #[test]
    fn failed_checks_do_not_consume_nonce() {
        let config = VerifyingConfig::new_default(KEY);
        let sig = sign(&fields(), &nonce(1), NOW);

        assert_eq!(
            config.verify_request(&fields(), "00", &nonce(1), NOW, NOW),
            Err(VerifyingError::SignatureInvalid)
        );
        assert_eq!(
            config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW - 10),
            Err(VerifyingError::TimestampFromFuture {
                timestamp: NOW,
                now: NOW - 10
            })
        );
        assert_eq!(
            config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW + 95),
            Err(VerifyingError::TimestampFromPast {
                timestamp: NOW,
                now: NOW + 95
            })
        );
        assert!(config.cache().is_empty());

        assert_eq!(config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW), Ok(()));
    }

    #[test]
    fn checks_signature_before_timestamp_before_nonce() {
        let config = VerifyingConfig::new_default(KEY);
        let stale = NOW - 1000;
        let sig = sign(&fields(), &nonce(1), stale);

        // Bad signature and stale timestamp: signature reported.
        assert_eq!(
            config.verify_request(&fields(), &sig, &nonce(2), stale, NOW),
            Err(VerifyingError::SignatureInvalid)
        );

        // Consumed nonce and stale timestamp: timestamp reported.
        let fresh = sign(&fields(), &nonce(1), NOW);
        config.verify_request(&fields(), &fresh, &nonce(1), NOW, NOW).unwrap();
        assert!(matches!(
            config.verify_request(&fields(), &sig, &nonce(1), stale, NOW),
            Err(VerifyingError::TimestampFromPast { .. })
        ));
    }

    #[test]
    fn window_edges() {
        let config = VerifyingConfig::new_default(KEY);
        let check = |timestamp: i64, byte: u8| {
            let sig = sign(&fields(), &nonce(byte), timestamp);
            config.verify_request(&fields(), &sig, &nonce(byte), timestamp, NOW)
        };
        assert_eq!(check(NOW + 4, 1), Ok(()));
        assert!(matches!(check(NOW + 5, 2), Err(VerifyingError::TimestampFromFuture { .. })));
        assert_eq!(check(NOW - 94, 3), Ok(()));
        assert!(matches!(check(NOW - 95, 4), Err(VerifyingError::TimestampFromPast { .. })));
    }

    #[test]
    fn signature_and_fields_must_agree_on_selection() {
        let config = VerifyingConfig::new_default(KEY)
            .with_canonicalize(CanonicalizeConfig::new().with_verb(false));
        let sig = sign(&fields(), &nonce(1), NOW);
        assert_eq!(
            config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW),
            Err(VerifyingError::SignatureInvalid)
        );
    }

    #[test]
    fn missing_configured_header_is_malformed() {
        let config = VerifyingConfig::new_default(KEY).with_canonicalize(
            CanonicalizeConfig::new().with_headers(vec![HeaderName::from_static("x-tenant")]),
        );
        let sig = sign(&fields(), &nonce(1), NOW);
        assert!(matches!(
            config.verify_request(&fields(), &sig, &nonce(1), NOW, NOW),
            Err(VerifyingError::MalformedInput(_))
        ));
        assert!(config.cache().is_empty());
    }

    #[test]
    fn tampering_with_any_field_invalidates_signature() {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789/?=&";
        let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH];
        let config = VerifyingConfig::new_default(KEY).with_canonicalize(
            CanonicalizeConfig::new().with_headers(vec![
                HeaderName::from_static("x-one"),
                HeaderName::from_static("x-two"),
            ]),
        );
        let mut rng = rand::thread_rng();
        let random_text = |rng: &mut rand::rngs::ThreadRng, len: usize| -> Vec<u8> {
            (0..len).map(|_| *ALPHABET.choose(rng).unwrap()).collect()
        };
        let flip_text = |rng: &mut rand::rngs::ThreadRng, text: &mut Vec<u8>| {
            let i = rng.gen_range(0..text.len());
            let original = text[i];
            while text[i] == original {
                text[i] = *ALPHABET.choose(rng).unwrap();
            }
        };

        for _ in 0..100 {
            let method = methods.choose(&mut rng).unwrap().clone();
            let url_len = rng.gen_range(1..40);
            let mut url = b"/".to_vec();
            url.extend(random_text(&mut rng, url_len));
            let body: Vec<u8> = (0..rng.gen_range(1..64)).map(|_| rng.gen()).collect();
            let values = [random_text(&mut rng, 8), random_text(&mut rng, 8)];
            let timestamp = NOW + rng.gen_range(-50..5);
            let nonce = Nonce::generate(16);

            let build = |method: &Method, url: &[u8], body: &[u8], values: &[Vec<u8>; 2]| {
                RequestFields::new(body)
                    .with_method(method.clone())
                    .with_url(String::from_utf8(url.to_vec()).unwrap())
                    .with_header(
                        HeaderName::from_static("x-one"),
                        HeaderValue::from_bytes(&values[0]).unwrap(),
                    )
                    .with_header(
                        HeaderName::from_static("x-two"),
                        HeaderValue::from_bytes(&values[1]).unwrap(),
                    )
            };
            let original = build(&method, &url, &body, &values);
            let sig = sign(&original, &nonce, timestamp);

            let (mut method2, mut url2, mut body2, mut values2) =
                (method.clone(), url.clone(), body.clone(), values.clone());
            let (mut nonce2, mut timestamp2) = (nonce.clone(), timestamp);
            match rng.gen_range(0..6) {
                0 => {
                    while method2 == method {
                        method2 = methods.choose(&mut rng).unwrap().clone();
                    }
                }
                1 => flip_text(&mut rng, &mut url2),
                2 => timestamp2 += if rng.gen() { 1 } else { -1 },
                3 => {
                    let mut bytes = nonce.as_bytes().to_vec();
                    let i = rng.gen_range(0..bytes.len());
                    bytes[i] ^= rng.gen_range(1..=255u8);
                    nonce2 = Nonce::from_bytes(bytes);
                }
                4 => {
                    let i = rng.gen_range(0..body2.len());
                    body2[i] ^= rng.gen_range(1..=255u8);
                }
                _ => {
                    let h = rng.gen_range(0..2);
                    flip_text(&mut rng, &mut values2[h]);
                }
            }
            let tampered = build(&method2, &url2, &body2, &values2);

            assert_eq!(
                config.verify_request(&tampered, &sig, &nonce2, timestamp2, NOW),
                Err(VerifyingError::SignatureInvalid)
            );
        }
        assert!(config.cache().is_empty());
    }

    #[test]
    fn concurrent_verifications_of_one_request_accept_once() {
        const THREADS: usize = 16;
        let config = VerifyingConfig::new_default(KEY);
        let sig = sign(&fields(), &nonce(9), NOW);
        let barrier = Barrier::new(THREADS);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        config.verify_request(&fields(), &sig, &nonce(9), NOW, NOW)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| **r == Err(VerifyingError::ReplayDetected))
                .count(),
            THREADS - 1
        );
    }

    #[test]
    fn verifiers_with_separate_caches_are_independent() {
        let a = VerifyingConfig::new_default(KEY);
        let b = VerifyingConfig::new_default(KEY);
        let shared = a.clone();
        let sig = sign(&fields(), &nonce(1), NOW);

        assert_eq!(a.verify_request(&fields(), &sig, &nonce(1), NOW, NOW), Ok(()));
        assert_eq!(b.verify_request(&fields(), &sig, &nonce(1), NOW, NOW), Ok(()));
        assert_eq!(
            shared.verify_request(&fields(), &sig, &nonce(1), NOW, NOW),
            Err(VerifyingError::ReplayDetected)
        );
    }

    #[test]
    fn reports_cache_overload() {
        let config = VerifyingConfig::with_cache_config(
            HmacSha512::new(KEY),
            Duration::from_secs(5),
            &NonceCacheConfig::new().with_capacity(1).with_shards(1),
        )
        .unwrap();
        let first = sign(&fields(), &nonce(1), NOW);
        let second = sign(&fields(), &nonce(2), NOW);
        assert_eq!(config.verify_request(&fields(), &first, &nonce(1), NOW, NOW), Ok(()));
        assert_eq!(
            config.verify_request(&fields(), &second, &nonce(2), NOW, NOW),
            Err(VerifyingError::CacheOverloaded)
        );
    }

    #[test]
    fn rejects_mismatched_configuration() {
        let window = TimestampWindow::new(Duration::from_secs(5), Duration::from_secs(100)).unwrap();
        let short = NonceCache::new(&NonceCacheConfig::new().with_ttl(Duration::from_secs(50))).unwrap();
        assert!(matches!(
            VerifyingConfig::new(HmacSha512::new(KEY), window, Arc::new(short)),
            Err(ConfigError::CacheTtlTooShort { .. })
        ));

        assert!(matches!(
            VerifyingConfig::with_cache_config(
                HmacSha512::new(KEY),
                Duration::from_secs(100),
                &NonceCacheConfig::new(),
            ),
            Err(ConfigError::SkewNotBelowTtl { .. })
        ));
    }

    #[test]
    fn verifies_signed_mock_request() {
        let signing = SigningConfig::new_default(KEY);
        let verifying = VerifyingConfig::new_default(KEY);

        let req = MockRequest::new(Method::PUT, "http://example.com/items/3?force=true")
            .with_header("Content-Type", "application/json")
            .with_body(br#"{"name": "three"}"#.to_vec())
            .signed(&signing)
            .unwrap();

        (&req).verify(&verifying).expect("Signature to be verified correctly");

        let rejected = (&req).verify(&verifying).expect_err("Replay to be rejected");
        assert_eq!(rejected.reason(), &VerifyingError::ReplayDetected);
    }

    #[test]
    fn rejects_tampered_mock_request() {
        let signing = SigningConfig::new_default(KEY);
        let verifying = VerifyingConfig::new_default(KEY);

        let req = MockRequest::new(Method::POST, "http://example.com/transfer")
            .with_body(br#"{"amount": 10}"#.to_vec())
            .signed(&signing)
            .unwrap()
            .with_body(br#"{"amount": 99}"#.to_vec());

        let rejected = (&req).verify(&verifying).expect_err("Signature to be rejected");
        assert_eq!(rejected.reason(), &VerifyingError::SignatureInvalid);
        assert!(verifying.cache().is_empty());
    }

    #[test]
    fn unsigned_mock_request_is_malformed() {
        let verifying = VerifyingConfig::new_default(KEY);
        let req = MockRequest::new(Method::GET, "http://example.com/");
        let rejected = (&req).verify(&verifying).expect_err("Missing headers to be rejected");
        assert!(matches!(rejected.reason(), VerifyingError::MalformedInput(_)));
    }
}
