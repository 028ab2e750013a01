//! Remember the request that was interrupted by the login dialogue, to replay it afterwards.
//!
//! The saved request is part of the server-side session state: it moves along
//! with the session when the identifier is rotated and goes away with it when
//! the session expires or is invalidated.
use crate::request::{Request, RequestHead, is_safe, strip_path_parameters};
use bytes::Bytes;
use errors::{CaptureError, SavedRequestError};
use gatehouse_session::store::SessionRecord;
use gatehouse_session::store::errors::UpdateError;
use gatehouse_session::{SessionId, SessionStore};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Method, Uri};
use tracing_log_error::log_error;
use ubyte::ByteUnit;

/// The session state key the saved request is stored under.
pub const SAVED_REQUEST_KEY: &str = "gatehouse.saved_request";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
/// A snapshot of a request that required authentication.
pub struct SavedRequest {
    /// The original method.
    pub method: String,
    /// The original path and query, without session path parameters.
    pub uri: String,
    /// The original `Content-Type`, if any.
    pub content_type: Option<String>,
    /// The body of a request with a non-safe method.
    #[serde(with = "hex_body", default)]
    pub body: Option<Bytes>,
}

impl SavedRequest {
    /// Take a snapshot of `request`.
    ///
    /// `clean_path` is the request path, stripped of session path parameters.
    /// The body is only kept for non-safe methods and must not exceed `max_body_size`.
    pub fn capture(
        request: &Request,
        clean_path: &str,
        max_body_size: ByteUnit,
    ) -> Result<Self, CaptureError> {
        let head = &request.head;
        let body = if is_safe(&head.method) {
            None
        } else {
            let size = request.body.len();
            if size as u64 > max_body_size.as_u64() {
                return Err(CaptureError {
                    max_size: max_body_size,
                    actual_size: size,
                });
            }
            Some(request.body.clone())
        };
        let uri = match head.target.query() {
            Some(query) => format!("{clean_path}?{query}"),
            None => clean_path.to_owned(),
        };
        Ok(Self {
            method: head.method.as_str().to_owned(),
            uri,
            content_type: head
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned),
            body,
        })
    }

    /// A `GET` for `uri`, used to send the client somewhere sensible
    /// when there's nothing to return to.
    pub fn landing(uri: &str) -> Self {
        Self {
            method: Method::GET.as_str().to_owned(),
            uri: uri.to_owned(),
            content_type: None,
            body: None,
        }
    }

    /// The path of the saved request, without the query.
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(&self.uri, |(path, _)| path)
    }

    /// Returns `true` if `path` is the path of the saved request.
    ///
    /// Path parameters are ignored on both sides.
    pub fn matches(&self, path: &str) -> bool {
        strip_path_parameters(self.path()) == strip_path_parameters(path)
    }

    /// Rebuild the original request on top of the head of the request
    /// that is returning to it.
    ///
    /// Method, target and body come from the snapshot. The other headers are
    /// those of the current request.
    pub fn restore(self, current: RequestHead) -> Result<Request, errors::RestoreError> {
        let method = Method::from_bytes(self.method.as_bytes()).map_err(|_| {
            errors::RestoreError::InvalidMethod {
                method: self.method.clone(),
            }
        })?;
        let target = self
            .uri
            .parse::<Uri>()
            .map_err(|_| errors::RestoreError::InvalidUri { uri: self.uri.clone() })?;
        let mut headers = current.headers;
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        if let Some(content_type) = self
            .content_type
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(CONTENT_TYPE, content_type);
        }
        let body = self.body.unwrap_or_default();
        if !body.is_empty() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        Ok(Request {
            head: RequestHead {
                method,
                target,
                version: current.version,
                headers,
            },
            body,
        })
    }
}

#[derive(Debug, Clone)]
/// Keeps at most one [`SavedRequest`] per session.
///
/// Saving overwrites whatever was saved before for the same session: when two
/// protected requests race during a login, the last one to be saved is the
/// one the client is sent back to.
pub struct SavedRequestCache {
    store: SessionStore,
}

impl SavedRequestCache {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Attach `saved` to the session, replacing any previously saved request.
    ///
    /// The rest of the session record is left untouched, even if another
    /// request changes it concurrently.
    #[tracing::instrument(name = "Save request", level = tracing::Level::TRACE, skip_all)]
    pub async fn save(&self, id: &SessionId, saved: &SavedRequest) -> Result<(), SavedRequestError> {
        let value = serde_json::to_value(saved)?;
        let outcome = self
            .store
            .modify(id, move |record| {
                record.state.insert(SAVED_REQUEST_KEY.to_owned(), value);
            })
            .await;
        match outcome {
            Ok(_) => Ok(()),
            Err(UpdateError::UnknownId(_)) => Err(SavedRequestError::UnknownSession),
            Err(e) => Err(e.into()),
        }
    }

    /// The request saved for the session, if any. It stays in the cache.
    pub async fn peek(&self, id: &SessionId) -> Result<Option<SavedRequest>, SavedRequestError> {
        let Some(record) = self.store.load(id).await? else {
            return Ok(None);
        };
        Ok(Self::saved_in(&record))
    }

    /// Remove the request saved for the session and return it.
    ///
    /// Concurrent calls for the same session never hand out the same request twice.
    #[tracing::instrument(name = "Take saved request", level = tracing::Level::TRACE, skip_all)]
    pub async fn take(&self, id: &SessionId) -> Result<Option<SavedRequest>, SavedRequestError> {
        let outcome = self
            .store
            .modify(id, |record| {
                record.state.remove(SAVED_REQUEST_KEY);
            })
            .await;
        match outcome {
            Ok(before) => Ok(Self::saved_in(&before)),
            Err(UpdateError::UnknownId(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The request saved in a session record, if any.
    ///
    /// A corrupted entry is logged and treated as missing.
    pub fn saved_in(record: &SessionRecord) -> Option<SavedRequest> {
        let raw = record.state.get(SAVED_REQUEST_KEY)?;
        match serde_json::from_value(raw.clone()) {
            Ok(saved) => Some(saved),
            Err(e) => {
                log_error!(e, level: tracing::Level::WARN, "The saved request is corrupted, discarding it");
                None
            }
        }
    }

}

mod hex_body {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(body) => serializer.serialize_some(&hex::encode(body)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        hex::decode(raw).map(|b| Some(b.into())).map_err(de::Error::custom)
    }
}

pub mod errors {
    use gatehouse_session::store::errors::{LoadError, UpdateError};
    use ubyte::ByteUnit;

    #[derive(Debug, thiserror::Error)]
    #[error("The request body ({actual_size} bytes) is larger than the {max_size} that can be kept aside during login")]
    /// The body of the interrupted request is too large to be saved.
    pub struct CaptureError {
        pub max_size: ByteUnit,
        pub actual_size: usize,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The saved request can't be turned back into a request.
    pub enum RestoreError {
        #[error("The saved method, `{method}`, is not a valid HTTP method")]
        InvalidMethod { method: String },
        #[error("The saved URI, `{uri}`, is not a valid request target")]
        InvalidUri { uri: String },
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`SavedRequestCache`](super::SavedRequestCache) operations.
    pub enum SavedRequestError {
        #[error("The session the request should be saved into doesn't exist")]
        UnknownSession,
        #[error(transparent)]
        Load(#[from] LoadError),
        #[error(transparent)]
        Update(#[from] UpdateError),
        #[error("Failed to serialize the saved request")]
        Serialize(#[from] serde_json::Error),
    }
}
