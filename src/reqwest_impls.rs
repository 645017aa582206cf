use http::header::{HeaderName, HeaderValue};
use http::Method;

use super::*;

/// Returns the request target as sent on the wire: the path, followed by the
/// query string if there is one.
fn target_from_url(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().into(),
    }
}

impl RequestLike for reqwest::Request {
    fn method(&self) -> Option<Method> {
        Some(reqwest::Request::method(self).clone())
    }
    fn url(&self) -> Option<String> {
        Some(target_from_url(reqwest::Request::url(self)))
    }
    fn header(&self, header: &HeaderName) -> Option<HeaderValue> {
        self.headers().get(header).cloned()
    }
}

impl ClientRequestLike for reqwest::Request {
    fn set_header(&mut self, header: HeaderName, value: HeaderValue) {
        self.headers_mut().insert(header, value);
    }
    fn body_bytes(&mut self) -> Option<Vec<u8>> {
        match self.body() {
            Some(body) => body.as_bytes().map(<[u8]>::to_vec),
            None => Some(Vec::new()),
        }
    }
}

impl RequestLike for reqwest::blocking::Request {
    fn method(&self) -> Option<Method> {
        Some(reqwest::blocking::Request::method(self).clone())
    }
    fn url(&self) -> Option<String> {
        Some(target_from_url(reqwest::blocking::Request::url(self)))
    }
    fn header(&self, header: &HeaderName) -> Option<HeaderValue> {
        self.headers().get(header).cloned()
    }
}

impl ClientRequestLike for reqwest::blocking::Request {
    fn set_header(&mut self, header: HeaderName, value: HeaderValue) {
        self.headers_mut().insert(header, value);
    }
    fn body_bytes(&mut self) -> Option<Vec<u8>> {
        match self.body_mut().as_mut() {
            Some(body) => body.buffer().ok().map(<[u8]>::to_vec),
            None => Some(Vec::new()),
        }
    }
}
