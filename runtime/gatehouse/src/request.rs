//! The request as seen by the authenticator.
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use std::borrow::Cow;

#[derive(Debug, Clone)]
/// All the information that is transmitted as part of an HTTP request ahead of the body.
///
/// It includes the [method](Method), the [target](Uri),
/// the [HTTP version](Version), and the [headers](HeaderMap).
pub struct RequestHead {
    /// The HTTP method of the request.
    pub method: Method,
    /// The [target](https://datatracker.ietf.org/doc/html/rfc7230#section-5.3) of the request.
    pub target: Uri,
    /// The HTTP version used by the request.
    pub version: Version,
    /// The headers attached to the request.
    pub headers: HeaderMap,
}

impl From<http::request::Parts> for RequestHead {
    fn from(parts: http::request::Parts) -> Self {
        Self {
            method: parts.method,
            target: parts.uri,
            version: parts.version,
            headers: parts.headers,
        }
    }
}

#[derive(Debug, Clone)]
/// A fully buffered HTTP request.
///
/// Form login needs to look at the body of credential submissions and to keep
/// a copy of the body of requests it interrupts, hence the buffering.
pub struct Request {
    pub head: RequestHead,
    pub body: Bytes,
}

impl Request {
    pub fn new(head: RequestHead, body: impl Into<Bytes>) -> Self {
        Self {
            head,
            body: body.into(),
        }
    }

    /// The raw path of the request target, path parameters included.
    pub fn raw_path(&self) -> &str {
        self.head.target.path()
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            head: parts.into(),
            body,
        }
    }
}

/// Drop the path parameters (`;name=value`) from every segment of `path`.
pub(crate) fn strip_path_parameters(path: &str) -> Cow<'_, str> {
    if !path.contains(';') {
        return Cow::Borrowed(path);
    }
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| segment.split(';').next().unwrap_or_default())
        .collect();
    Cow::Owned(segments.join("/"))
}

/// Percent-decode a request path, for matching purposes.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
pub(crate) fn decode_path(path: &str) -> Cow<'_, str> {
    percent_encoding::percent_decode_str(path).decode_utf8_lossy()
}

/// Returns `true` for methods that don't alter server state.
pub(crate) fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}
