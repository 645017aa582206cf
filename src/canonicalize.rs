use http::header::{HeaderName, HeaderValue};
use http::Method;
use itertools::{Either, Itertools};
use thiserror::Error;

use crate::nonce::Nonce;

/// Byte separating a field's length prefix from its content, and one field
/// from the next.
pub const FIELD_DELIMITER: u8 = b'|';

/// The types of error which may occur whilst computing the canonical message
/// for a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalizeError {
    /// The configuration selects the request method, but none was available.
    #[error("Missing request method required for signature")]
    MissingVerb,
    /// The configuration selects the request URL, but none was available.
    #[error("Missing request URL required for signature")]
    MissingUrl,
    /// One or more headers required to be part of the signature was not present
    /// on the request.
    #[error("Missing headers required for signature: {0:?}")]
    MissingHeaders(Vec<HeaderName>),
}

/// Versions of the canonical message layout. Signer and verifier must be
/// configured with the same version; it is not carried on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolVersion {
    /// `[verb] [url] timestamp nonce body [headers..]`, each field
    /// length-prefixed, fields separated by `|`, no trailing delimiter.
    V1,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V1
    }
}

/// Base trait for all request types
pub trait RequestLike {
    /// The request method, if known.
    fn method(&self) -> Option<Method>;

    /// The request target exactly as it should be signed (path, query and,
    /// where the transport preserves it, fragment).
    fn url(&self) -> Option<String>;

    /// Returns an existing header on the request. This method *must* reflect changes made
    /// by the `ClientRequestLike::set_header` method.
    fn header(&self, header: &HeaderName) -> Option<HeaderValue>;

    /// Returns true if this request contains a value for the specified header.
    fn has_header(&self, header: &HeaderName) -> bool {
        self.header(header).is_some()
    }
}

impl<T: RequestLike + ?Sized> RequestLike for &T {
    fn method(&self) -> Option<Method> {
        (**self).method()
    }
    fn url(&self) -> Option<String> {
        (**self).url()
    }
    fn header(&self, header: &HeaderName) -> Option<HeaderValue> {
        (**self).header(header)
    }
}

/// The fields of a request that may take part in a signature, supplied
/// directly rather than read from a transport-specific request type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFields {
    method: Option<Method>,
    url: Option<String>,
    body: Vec<u8>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestFields {
    /// Creates a new set of request fields with the given body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
    /// Set the request method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }
    /// Set the request URL (path and query)
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
    /// Add a header. Headers keep the order in which they are added.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }
    /// Replace the request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
    /// Copies the method, URL and the named headers (those present) from a
    /// request. The body is left empty.
    pub fn capture<R: RequestLike + ?Sized>(req: &R, headers: &[HeaderName]) -> Self {
        Self {
            method: req.method(),
            url: req.url(),
            body: Vec::new(),
            headers: headers
                .iter()
                .filter_map(|name| req.header(name).map(|value| (name.clone(), value)))
                .collect(),
        }
    }
    /// Returns the request body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
    /// Returns the headers in insertion order
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

impl RequestLike for RequestFields {
    fn method(&self) -> Option<Method> {
        self.method.clone()
    }
    fn url(&self) -> Option<String> {
        self.url.clone()
    }
    fn header(&self, header: &HeaderName) -> Option<HeaderValue> {
        self.headers
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.clone())
    }
}

/// Configuration for computing the canonical message of a request: which
/// optional fields take part in the signature.
#[derive(Debug, Clone)]
pub struct CanonicalizeConfig {
    version: ProtocolVersion,
    include_verb: bool,
    include_url: bool,
    headers: Vec<HeaderName>,
}

impl Default for CanonicalizeConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V1,
            include_verb: true,
            include_url: true,
            headers: Vec::new(),
        }
    }
}

impl CanonicalizeConfig {
    /// Creates a new canonicalization configuration using the default values.
    ///
    /// By default the verb and URL are signed, and no headers are.
    pub fn new() -> Self {
        Self::default()
    }
    /// Get the protocol version
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
    /// Set whether the request method is signed
    pub fn with_verb(mut self, include_verb: bool) -> Self {
        self.include_verb = include_verb;
        self
    }
    /// Set whether the request method is signed
    pub fn set_verb(&mut self, include_verb: bool) -> &mut Self {
        self.include_verb = include_verb;
        self
    }
    /// Get whether the request method is signed
    pub fn verb(&self) -> bool {
        self.include_verb
    }
    /// Set whether the request URL is signed
    pub fn with_url(mut self, include_url: bool) -> Self {
        self.include_url = include_url;
        self
    }
    /// Set whether the request URL is signed
    pub fn set_url(&mut self, include_url: bool) -> &mut Self {
        self.include_url = include_url;
        self
    }
    /// Get whether the request URL is signed
    pub fn url(&self) -> bool {
        self.include_url
    }
    /// Set the headers to include in the signature, in signing order
    pub fn with_headers(mut self, headers: Vec<HeaderName>) -> Self {
        self.headers = headers;
        self
    }
    /// Set the headers to include in the signature, in signing order
    pub fn set_headers(&mut self, headers: Vec<HeaderName>) -> &mut Self {
        self.headers = headers;
        self
    }
    /// Get the headers to include in the signature
    pub fn headers(&self) -> &[HeaderName] {
        &self.headers
    }

    /// Compute the canonical message for a request, using the supplied
    /// timestamp, nonce and body.
    pub fn canonicalize<R: RequestLike + ?Sized>(
        &self,
        req: &R,
        timestamp: i64,
        nonce: &Nonce,
        body: &[u8],
    ) -> Result<CanonicalMessage, CanonicalizeError> {
        let method = if self.include_verb {
            Some(req.method().ok_or(CanonicalizeError::MissingVerb)?)
        } else {
            None
        };
        let url = if self.include_url {
            Some(req.url().ok_or(CanonicalizeError::MissingUrl)?)
        } else {
            None
        };

        // Find value of each header
        let (headers, missing_headers): (Vec<_>, Vec<_>) =
            self.headers.iter().cloned().partition_map(|name| {
                if let Some(value) = req.header(&name) {
                    Either::Left((name, value))
                } else {
                    Either::Right(name)
                }
            });

        // Check for missing headers
        if !missing_headers.is_empty() {
            return Err(CanonicalizeError::MissingHeaders(missing_headers));
        }

        Ok(canonical_message(
            method.as_ref().map(Method::as_str),
            url.as_deref(),
            timestamp,
            nonce,
            body,
            &headers,
        ))
    }
}

/// Opaque struct storing a computed canonical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage {
    content: Vec<u8>,
}

impl CanonicalMessage {
    /// Obtain a view of this canonical message as a byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }
}

impl From<CanonicalMessage> for Vec<u8> {
    fn from(other: CanonicalMessage) -> Self {
        other.content
    }
}

struct FieldWriter {
    content: Vec<u8>,
}

impl FieldWriter {
    fn push(&mut self, field: &[u8]) {
        if !self.content.is_empty() {
            self.content.push(FIELD_DELIMITER);
        }
        self.content.extend(field.len().to_string().as_bytes());
        self.content.push(FIELD_DELIMITER);
        self.content.extend(field);
    }
}

/// Serializes the given fields into a canonical message (protocol V1).
///
/// Field order is fixed: `verb`, `url`, `timestamp`, `nonce`, `body`, then
/// each header in the order given. Each field is written as its decimal byte
/// length, `|`, then its raw bytes; fields are separated by a single `|`.
/// A header field's bytes are `<lowercase-name>: <value>`.
pub fn canonical_message(
    verb: Option<&str>,
    url: Option<&str>,
    timestamp: i64,
    nonce: &Nonce,
    body: &[u8],
    headers: &[(HeaderName, HeaderValue)],
) -> CanonicalMessage {
    let mut writer = FieldWriter {
        content: Vec::new(),
    };
    if let Some(verb) = verb {
        writer.push(verb.as_bytes());
    }
    if let Some(url) = url {
        writer.push(url.as_bytes());
    }
    writer.push(timestamp.to_string().as_bytes());
    writer.push(nonce.to_hex().as_bytes());
    writer.push(body);
    for (name, value) in headers {
        let mut field = Vec::with_capacity(name.as_str().len() + 2 + value.len());
        field.extend(name.as_str().as_bytes());
        field.extend(b": ");
        field.extend(value.as_bytes());
        writer.push(&field);
    }
    CanonicalMessage {
        content: writer.content,
    }
}

#[cfg(test)]
pub(crate) fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    Some((
        HeaderName::from_bytes(name.as_bytes()).ok()?,
        HeaderValue::from_str(value).ok()?,
    ))
}
