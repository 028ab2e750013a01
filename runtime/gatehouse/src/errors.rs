//! Failures the authenticator can't recover from on its own.
use crate::realm::RealmError;
use crate::response::{self, Response};
use crate::saved_request::errors::SavedRequestError;
use gatehouse_session::propagation::errors::InjectCookieError;
use gatehouse_session::store::errors::{
    ChangeIdError, CreateError, DeleteError, ResolveError, UpdateError,
};
use http::StatusCode;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// The error returned by [`FormAuthenticator`](crate::FormAuthenticator) when it can't
/// produce a meaningful response.
///
/// Access is never granted when this error is returned.
/// Use [`AuthError::into_response`] to answer the client.
pub enum AuthError {
    #[error(transparent)]
    RealmUnavailable(#[from] RealmUnavailable),
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),
    #[error("Failed to access the saved request")]
    SavedRequest(#[from] SavedRequestError),
    #[error(transparent)]
    InvalidLocation(#[from] response::errors::InvalidLocation),
    #[error("Failed to attach the session cookie to the response")]
    InjectCookie(#[from] InjectCookieError),
}

impl AuthError {
    /// Convert an [`AuthError`] into an HTTP response.
    ///
    /// It's always a `500 Internal Server Error`: none of these failures
    /// is the client's fault.
    pub fn into_response(&self) -> Response {
        response::plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            "The server could not process the authentication request",
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// The realm couldn't tell whether the submitted credentials are valid.
pub enum RealmUnavailable {
    #[error("The realm failed to verify the credentials")]
    Failed(#[source] RealmError),
    #[error("The realm didn't answer within {timeout:?}")]
    TimedOut { timeout: std::time::Duration },
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
/// The session store failed.
pub enum SessionStoreError {
    #[error("Failed to resolve the session")]
    Resolve(#[from] ResolveError),
    #[error("Failed to create a new session")]
    Create(#[from] CreateError),
    #[error("Failed to rotate the session identifier")]
    ChangeId(#[from] ChangeIdError),
    #[error("Failed to update the session")]
    Update(#[from] UpdateError),
    #[error("Failed to invalidate the session")]
    Delete(#[from] DeleteError),
}
