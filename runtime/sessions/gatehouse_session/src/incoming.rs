use crate::propagation::split_session_path_parameter;
use crate::{SessionConfig, SessionId, SessionTransport};
use biscotti::{Processor, RequestCookies};
use http::HeaderMap;
use http::header::COOKIE;
use tracing_log_error::log_error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// The session identifiers attached to the incoming request.
///
/// Built using [`IncomingSession::extract`].
pub struct IncomingSession {
    cookie: Option<SessionId>,
    path_parameter: Option<SessionId>,
}

impl IncomingSession {
    /// Collect the session identifiers carried by the incoming request.
    ///
    /// The cookie is only looked at if cookie tracking is enabled.
    /// Malformed identifiers are ignored, as if they were absent.
    pub fn extract(
        headers: &HeaderMap,
        path: &str,
        config: &SessionConfig,
        processor: &Processor,
    ) -> Self {
        let cookie = if config.tracking.cookies {
            cookie_session_id(headers, &config.cookie.name, processor)
        } else {
            None
        };
        let (_, raw) = split_session_path_parameter(path, &config.tracking.path_parameter_name);
        let path_parameter = raw.and_then(|raw| parse_id(raw, SessionTransport::PathParameter));
        Self {
            cookie,
            path_parameter,
        }
    }

    /// Assemble an incoming session from identifiers you already hold.
    pub fn from_parts(cookie: Option<SessionId>, path_parameter: Option<SessionId>) -> Self {
        Self {
            cookie,
            path_parameter,
        }
    }

    /// The identifiers to try, in order of precedence: the cookie wins
    /// over the path parameter.
    pub fn candidates(&self) -> impl Iterator<Item = (SessionId, SessionTransport)> + '_ {
        self.cookie
            .map(|id| (id, SessionTransport::Cookie))
            .into_iter()
            .chain(
                self.path_parameter
                    .filter(|id| Some(*id) != self.cookie)
                    .map(|id| (id, SessionTransport::PathParameter)),
            )
    }

    /// The identifier carried by the session cookie, if any.
    pub fn cookie(&self) -> Option<SessionId> {
        self.cookie
    }

    /// The identifier carried as a URL path parameter, if any.
    pub fn path_parameter(&self) -> Option<SessionId> {
        self.path_parameter
    }

    /// Returns `true` if the request didn't reference any session.
    pub fn is_empty(&self) -> bool {
        self.cookie.is_none() && self.path_parameter.is_none()
    }
}

fn cookie_session_id(headers: &HeaderMap, name: &str, processor: &Processor) -> Option<SessionId> {
    let mut cookies = RequestCookies::new();
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            tracing::warn!("A `Cookie` header contains non-ASCII characters, ignoring it");
            continue;
        };
        // A single malformed cookie shouldn't cost the client its session:
        // skip it and keep the rest.
        if let Err(e) = cookies.extend_from_header(header, processor) {
            log_error!(
                e,
                level: tracing::Level::WARN,
                "A request cookie is invalid, ignoring it"
            );
        }
    }
    let cookie = cookies.get(name)?;
    parse_id(cookie.value(), SessionTransport::Cookie)
}

fn parse_id(raw: &str, transport: SessionTransport) -> Option<SessionId> {
    match raw.parse::<SessionId>() {
        Ok(id) => Some(id),
        Err(e) => {
            log_error!(
                e,
                level: tracing::Level::DEBUG,
                session.transport = ?transport,
                "Malformed session identifier, ignoring it"
            );
            None
        }
    }
}
