/*!
Server-side HTTP sessions, tracked either through a cookie or through a URL path parameter.

# Why do we need sessions?

HTTP is stateless: nothing ties two requests from the same client together.
A login dialogue needs that tie. The user must be challenged on one request,
submit credentials on the next and be recognised on every request after that.

**Sessions** are the solution. The server allocates a random identifier, keeps
the state associated with it in a [`SessionStore`] and hands the identifier to
the client, which sends it back on every request.

# Two channels

The identifier travels back and forth over one of two channels:

- The **session cookie** (`JSESSIONID` by default). The server sets it with a
  `Set-Cookie` header and the client echoes it in the `Cookie` header.
- A **path parameter** appended to the URL path, e.g. `/index;jsessionid=<id>?page=2`.
  It works for clients that can't or won't store cookies, as long as every URL
  the server emits is rewritten through [`SessionPropagation::encode_url`].

When both are present on a request, the cookie wins.

# Session fixation

An identifier handed to a client before it authenticates must not survive the
login, otherwise an attacker who planted it would inherit the authenticated
session. [`SessionStore::rotate`] swaps the identifier atomically while keeping
the state attached to it.

## References

- [RFC 6265](https://datatracker.ietf.org/doc/html/rfc6265);
- [OWASP's session management cheat-sheet](https://cheatsheetseries.owasp.org/cheatsheets/Session_Management_Cheat_Sheet.html).
*/
pub mod config;
mod id;
mod incoming;
mod principal;
pub mod propagation;
mod session_;
mod store_;

pub use id::{InvalidSessionId, SessionId};
pub use incoming::IncomingSession;
pub use principal::Principal;
pub use propagation::SessionPropagation;
pub use session_::{Session, SessionTransport};
pub use store_::SessionStore;

pub mod store {
    //! Types and traits related to [`SessionStore`][super::SessionStore].
    pub use crate::store_::errors;
    pub use crate::store_::{RecordChange, SessionRecord, SessionStorageBackend};
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how sessions are tracked and how long they live.
pub struct SessionConfig {
    #[serde(default)]
    /// Configure the session cookie.
    pub cookie: crate::config::SessionCookieConfig,
    #[serde(default)]
    /// Configure the session lifetime.
    pub state: crate::config::SessionStateConfig,
    #[serde(default)]
    /// Configure the channels used to carry the session identifier.
    pub tracking: crate::config::SessionTrackingConfig,
}
