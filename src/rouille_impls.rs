use std::fmt::{self, Debug};
use std::io::{self, Cursor, Read};
use std::mem;

use http::header::{HeaderName, HeaderValue};
use http::Method;

use super::*;

/// In order to verify the signature on a rouille request, the request body must
/// be consumed by the verification process. This type is used to return the request body
/// contents on completion of a signature verification.
///
/// The `std::io::Read` trait is implemented for this type.
pub struct RouilleBody<'a>(RouilleBodyInner<'a>);

enum RouilleBodyInner<'a> {
    Buffered(Result<Cursor<Vec<u8>>, io::Error>),
    Unread(rouille::RequestBody<'a>),
}

impl<'a> Debug for RouilleBody<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("RouilleBody { .. }")
    }
}

impl<'a> Read for RouilleBody<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use RouilleBodyInner::*;
        match self {
            RouilleBody(Buffered(Ok(x))) => x.read(buf),
            RouilleBody(Buffered(Err(e))) => Err(mem::replace(e, io::ErrorKind::Other.into())),
            RouilleBody(Unread(x)) => x.read(buf),
        }
    }
}

impl RequestLike for rouille::Request {
    fn method(&self) -> Option<Method> {
        Method::from_bytes(rouille::Request::method(self).as_bytes()).ok()
    }
    fn url(&self) -> Option<String> {
        Some(self.raw_url().into())
    }
    fn header(&self, header: &HeaderName) -> Option<HeaderValue> {
        rouille::Request::header(self, header.as_str()).and_then(|v| HeaderValue::from_str(v).ok())
    }
}

impl<'a> ServerRequestLike for &'a rouille::Request {
    type Remnant = Option<RouilleBody<'a>>;

    fn complete_with_body(self) -> (Option<Vec<u8>>, Self::Remnant) {
        // The body can only be taken once.
        if let Some(mut body) = self.data() {
            let mut result = Vec::new();
            if let Err(e) = body.read_to_end(&mut result) {
                (None, Some(RouilleBody(RouilleBodyInner::Buffered(Err(e)))))
            } else {
                (
                    Some(result.clone()),
                    Some(RouilleBody(RouilleBodyInner::Buffered(Ok(Cursor::new(
                        result,
                    ))))),
                )
            }
        } else {
            (None, None)
        }
    }
    fn complete(self) -> Self::Remnant {
        self.data().map(RouilleBodyInner::Unread).map(RouilleBody)
    }
}
