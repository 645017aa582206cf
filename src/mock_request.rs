use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{BufRead, Write};

use anyhow::Context;
use http::{header::HeaderName, HeaderValue, Method};
use url::Url;

use crate::{ClientRequestLike, RequestLike, ServerRequestLike};

/// Generic error returned when the input to `from_reader` does not look like
/// a HTTP request.
#[derive(Debug)]
pub struct ParseError;

impl Error for ParseError {}
impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Malformed HTTP request")
    }
}

/// A mock request type
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    method: Method,
    path: String,
    headers: HashMap<HeaderName, HeaderValue>,
    body: Option<Vec<u8>>,
}

impl MockRequest {
    /// Returns the method used by this mock request
    pub fn method(&self) -> Method {
        self.method.clone()
    }
    /// Returns the path used by this mock request
    pub fn path(&self) -> &str {
        &self.path
    }
    /// Returns the headers used by this mock request
    pub fn headers(&self) -> impl IntoIterator<Item = (&HeaderName, &HeaderValue)> {
        &self.headers
    }
    /// Returns the body used by this mock request
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Constructs a new mock request. `url` may be absolute, in which case a
    /// `Host` header is added, or a path relative to the root.
    ///
    /// Panics if `url` cannot be parsed.
    pub fn new(method: Method, url: &str) -> Self {
        let absolute = Url::parse(url).is_ok();
        let url: Url = Url::parse("http://localhost/")
            .and_then(|base| base.join(url))
            .expect("Mock request URL to be valid");

        let mut path = url.path().to_owned();
        if let Some(query) = url.query() {
            path = format!("{}?{}", path, query);
        }
        if let Some(fragment) = url.fragment() {
            path = format!("{}#{}", path, fragment);
        }
        let mut res = Self {
            method,
            path,
            headers: Default::default(),
            body: None,
        };
        if absolute {
            if let Some(host) = url.host_str().map(ToOwned::to_owned) {
                res = res.with_header("Host", &host)
            }
        }
        res
    }
    /// Convenience method for setting a header
    ///
    /// Panics if the name or value is not valid in a HTTP header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(
            HeaderName::from_bytes(name.as_bytes()).expect("Mock header name to be valid"),
            HeaderValue::from_bytes(value.as_bytes()).expect("Mock header value to be valid"),
        );
        self
    }
    /// Method for setting a request body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        let l = body.len();
        self.body = Some(body);
        self.with_header("Content-Length", &l.to_string())
    }

    /// Parse a HTTP request into this mock request object
    pub fn from_reader<R: BufRead>(reader: &mut R) -> Result<Self, Box<dyn Error>> {
        let mut line = String::new();

        // Read request line
        reader.read_line(&mut line)?;
        let mut parts = line.split_ascii_whitespace();

        // Extract method
        let method: Method = parts.next().ok_or(ParseError)?.parse()?;

        // Extract path
        let path: String = parts.next().ok_or(ParseError)?.into();

        // Extract headers
        #[allow(clippy::mutable_key_type)]
        let mut headers = HashMap::new();
        let has_body = loop {
            line.truncate(0);
            if reader.read_line(&mut line)? == 0 {
                break false;
            }
            if line.trim().is_empty() {
                break true;
            }

            let mut parts = line.splitn(2, ':');

            let name_str = parts.next().ok_or(ParseError)?.trim();
            let header_name: HeaderName = name_str
                .parse()
                .with_context(|| format!("{:?}", name_str))?;
            let value_str = parts.next().ok_or(ParseError)?.trim();
            let header_value: HeaderValue = value_str
                .parse()
                .with_context(|| format!("{:?}", value_str))?;
            headers.insert(header_name, header_value);
        };

        let body = if has_body {
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            Some(body)
        } else {
            None
        };

        Ok(Self {
            method,
            path,
            headers,
            body,
        })
    }

    /// Write out this HTTP request in standard format
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), Box<dyn Error>> {
        writeln!(writer, "{} {} HTTP/1.1", self.method.as_str(), self.path)?;
        let mut headers: Vec<_> = self.headers.iter().collect();
        headers.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        for (header_name, header_value) in headers {
            writeln!(
                writer,
                "{}: {}",
                header_name.as_str(),
                header_value.to_str()?
            )?;
        }

        if let Some(body) = &self.body {
            writeln!(writer)?;
            writer.write_all(body)?;
        }

        Ok(())
    }
}

impl RequestLike for MockRequest {
    fn method(&self) -> Option<Method> {
        Some(self.method.clone())
    }
    fn url(&self) -> Option<String> {
        Some(self.path.clone())
    }
    fn header(&self, header: &HeaderName) -> Option<HeaderValue> {
        self.headers.get(header).cloned()
    }
}

impl ClientRequestLike for MockRequest {
    fn set_header(&mut self, header: HeaderName, value: HeaderValue) {
        self.headers.insert(header, value);
    }
    fn body_bytes(&mut self) -> Option<Vec<u8>> {
        Some(self.body.clone().unwrap_or_default())
    }
}

impl ServerRequestLike for &MockRequest {
    type Remnant = ();

    fn complete_with_body(self) -> (Option<Vec<u8>>, Self::Remnant) {
        (Some(self.body.clone().unwrap_or_default()), ())
    }
    fn complete(self) -> Self::Remnant {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        CanonicalizeConfig, SigningConfig, SigningExt, VerifyingConfig, VerifyingError,
        VerifyingExt,
    };

    const KEY: &[u8] = b"mock request key";

    /// ```
    /// POST /foo?param=value&pet=dog HTTP/1.1
    /// Host: example.com
    /// Content-Type: application/json
    /// X-Tenant: acme
    /// Content-Length: 18
    ///
    /// {"hello": "world"}
    /// ```
    fn test_request() -> MockRequest {
        MockRequest::new(Method::POST, "http://example.com/foo?param=value&pet=dog")
            .with_header("Content-Type", "application/json")
            .with_header("X-Tenant", "acme")
            .with_body(r#"{"hello": "world"}"#.as_bytes().into())
    }

    #[test]
    fn new_splits_url() {
        let req = MockRequest::new(Method::GET, "http://example.com/a/b?c=d#e");
        assert_eq!(req.path(), "/a/b?c=d#e");
        assert_eq!(
            RequestLike::header(&req, &HeaderName::from_static("host")),
            Some(HeaderValue::from_static("example.com"))
        );

        let relative = MockRequest::new(Method::GET, "/config");
        assert_eq!(relative.path(), "/config");
        assert!(!relative.has_header(&HeaderName::from_static("host")));
    }

    #[test]
    fn parses_and_writes_requests() {
        let raw = "POST /foo?param=value HTTP/1.1\n\
                   Host: example.com\n\
                   X-Tenant: acme\n\
                   \n\
                   {\"hello\": \"world\"}";
        let req = MockRequest::from_reader(&mut raw.as_bytes()).unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/foo?param=value");
        assert_eq!(req.body(), Some(&br#"{"hello": "world"}"#[..]));

        let mut written = Vec::new();
        req.write(&mut written).unwrap();
        let reparsed = MockRequest::from_reader(&mut &written[..]).unwrap();
        assert_eq!(req, reparsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MockRequest::from_reader(&mut "".as_bytes()).is_err());
        assert!(MockRequest::from_reader(&mut "GET\n".as_bytes()).is_err());
        assert!(MockRequest::from_reader(&mut "GET / HTTP/1.1\nbad header\n".as_bytes()).is_err());
    }

    #[test]
    fn signed_headers_survive_serialization() {
        let canonicalize =
            CanonicalizeConfig::new().with_headers(vec![HeaderName::from_static("x-tenant")]);
        let signing = SigningConfig::new_default(KEY).with_canonicalize(canonicalize.clone());
        let verifying = VerifyingConfig::new_default(KEY).with_canonicalize(canonicalize);

        let req = test_request().signed(&signing).unwrap();
        let mut written = Vec::new();
        req.write(&mut written).unwrap();
        let received = MockRequest::from_reader(&mut &written[..]).unwrap();

        (&received).verify(&verifying).expect("Signature to be verified correctly");

        // A different value for a signed header is caught.
        let altered = received.clone().with_header("X-Tenant", "umbrella");
        let rejected = (&altered).verify(&verifying).expect_err("Signature to be rejected");
        assert_eq!(rejected.reason(), &VerifyingError::SignatureInvalid);
    }
}
