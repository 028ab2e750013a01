use crate::store::SessionRecord;
use crate::{Principal, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The channel the server learned the session identifier from,
/// for the current request.
pub enum SessionTransport {
    /// The identifier came from the session cookie.
    Cookie,
    /// The identifier came from a path parameter on the request URL.
    PathParameter,
    /// The session was created while handling the current request:
    /// the client hasn't sent its identifier back yet.
    None,
}

#[derive(Debug, Clone)]
/// A live session, as seen by the current request.
pub struct Session {
    /// The identifier the session is currently known by.
    pub id: SessionId,
    /// A snapshot of the server-side record.
    pub record: SessionRecord,
    /// How the identifier reached the server on this request.
    pub transport: SessionTransport,
}

impl Session {
    /// The authenticated principal, if any.
    pub fn principal(&self) -> Option<&Principal> {
        self.record.principal.as_ref()
    }

    /// Returns `true` if the session has gone through a successful login.
    pub fn is_authenticated(&self) -> bool {
        self.record.is_authenticated()
    }
}
