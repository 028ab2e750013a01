//! Responses produced by the authenticator.
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, LOCATION, PRAGMA};
use http::{HeaderMap, HeaderValue, StatusCode, Version};

/// The response type produced by the authenticator.
pub type Response = http::Response<Bytes>;

/// An instant safely in the past, in the format mandated for HTTP dates.
const EXPIRED: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// A response with the given status and a plain-text body.
pub(crate) fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// A response with the given status and an HTML body.
pub(crate) fn html(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Redirect the client to `location`, asking it to follow up with a `GET`.
///
/// `303 See Other` is only understood by HTTP/1.1 clients: older ones get a `302 Found`.
pub(crate) fn see_other(version: Version, location: &str) -> Result<Response, errors::InvalidLocation> {
    let location = HeaderValue::try_from(location).map_err(|_| errors::InvalidLocation {
        location: location.to_owned(),
    })?;
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = redirect_status(version);
    response.headers_mut().insert(LOCATION, location);
    Ok(response)
}

/// The status code used to send a client elsewhere after a form submission.
pub fn redirect_status(version: Version) -> StatusCode {
    if version <= Version::HTTP_10 {
        StatusCode::FOUND
    } else {
        StatusCode::SEE_OTHER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Instructions for intermediaries on responses to access-controlled resources.
pub enum CachePolicy {
    /// `Cache-Control: private`, with an `Expires` in the past.
    Private,
    /// `Pragma: No-cache` and `Cache-Control: no-cache`, with an `Expires` in the past.
    ///
    /// Some older clients fail to download files served this way over TLS.
    NoCache,
    /// Leave caching headers alone.
    Unchanged,
}

impl CachePolicy {
    pub(crate) fn apply(&self, headers: &mut HeaderMap) {
        match self {
            CachePolicy::Unchanged => return,
            CachePolicy::Private => {
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("private"));
            }
            CachePolicy::NoCache => {
                headers.insert(PRAGMA, HeaderValue::from_static("No-cache"));
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            }
        }
        headers.insert(EXPIRES, HeaderValue::from_static(EXPIRED));
    }
}

pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("`{location}` can't be used as the value of a `Location` header")]
    /// A redirect target contains characters that aren't allowed in a header value.
    pub struct InvalidLocation {
        pub location: String,
    }
}
