//! Carry the session identifier back to the client.
//!
//! Two channels are available: the session cookie and a path parameter
//! appended to every URL the server emits (`/index;jsessionid=<id>?q=1`).
//! [`SessionPropagation`] decides which ones are in play for the current
//! response and is the only place where outbound URLs get rewritten.
use crate::{Session, SessionConfig, SessionId, SessionTransport};
use biscotti::{Processor, RemovalCookie, ResponseCookie, ResponseCookies};
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Debug, Clone)]
/// The propagation plan for the session attached to the current request.
pub struct SessionPropagation {
    config: Arc<SessionConfig>,
    id: SessionId,
    transport: SessionTransport,
    cookie: CookieAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CookieAction {
    Keep,
    Issue,
    Remove,
}

impl SessionPropagation {
    /// Plan the propagation for `session`.
    ///
    /// A session created on this request gets a `Set-Cookie` right away.
    pub fn new(config: Arc<SessionConfig>, session: &Session) -> Self {
        let cookie = if session.transport == SessionTransport::None {
            CookieAction::Issue
        } else {
            CookieAction::Keep
        };
        Self {
            config,
            id: session.id,
            transport: session.transport,
            cookie,
        }
    }

    /// The identifier that will be propagated.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// How the client sent the identifier on the current request.
    pub fn transport(&self) -> SessionTransport {
        self.transport
    }

    /// The session identifier has been rotated: propagate the new one.
    pub fn rotated(&mut self, new_id: SessionId) {
        self.id = new_id;
        self.cookie = CookieAction::Issue;
    }

    /// The session has been destroyed: tell the client to forget the cookie.
    pub fn ended(&mut self) {
        self.cookie = CookieAction::Remove;
    }

    /// Returns `true` if outbound URLs must carry the identifier.
    ///
    /// That's the case when cookies are disabled for this context, or when
    /// the client didn't send the identifier back through the cookie on
    /// this request.
    pub fn rewrites_urls(&self) -> bool {
        let tracking = &self.config.tracking;
        if self.cookie == CookieAction::Remove || !tracking.url_rewriting {
            return false;
        }
        !tracking.cookies || self.transport != SessionTransport::Cookie
    }

    /// Rewrite `url` so that it carries the session identifier as a path parameter,
    /// if needed.
    ///
    /// URLs that don't target this context (absolute URLs, URLs outside the
    /// context path, fragments) are returned untouched.
    pub fn encode_url(&self, url: &str) -> String {
        if !self.rewrites_urls() || !self.targets_context(url) {
            return url.to_owned();
        }
        let name = &self.config.tracking.path_parameter_name;
        let split_at = url.find(['?', '#']).unwrap_or(url.len());
        let (path, tail) = url.split_at(split_at);
        let (path, _) = split_session_path_parameter(path, name);
        format!("{path};{name}={}{tail}", self.id)
    }

    /// The `Set-Cookie` to attach to the response, if any.
    pub fn cookie(&self) -> Option<ResponseCookie<'static>> {
        let cookie_config = &self.config.cookie;
        if !self.config.tracking.cookies {
            return None;
        }
        match self.cookie {
            CookieAction::Keep => None,
            CookieAction::Remove => {
                let mut cookie = RemovalCookie::new(cookie_config.name.clone());
                if let Some(domain) = cookie_config.domain.as_deref() {
                    cookie = cookie.set_domain(domain.to_owned());
                }
                if let Some(path) = cookie_config.path.as_deref() {
                    cookie = cookie.set_path(path.to_owned());
                }
                Some(cookie.into())
            }
            CookieAction::Issue => {
                let mut cookie = ResponseCookie::new(cookie_config.name.clone(), self.id.to_string());
                if let Some(domain) = cookie_config.domain.as_deref() {
                    cookie = cookie.set_domain(domain.to_owned());
                }
                if let Some(path) = cookie_config.path.as_deref() {
                    cookie = cookie.set_path(path.to_owned());
                }
                if let Some(same_site) = cookie_config.same_site {
                    cookie = cookie.set_same_site(same_site);
                }
                if cookie_config.secure {
                    cookie = cookie.set_secure(true);
                }
                if cookie_config.http_only {
                    cookie = cookie.set_http_only(true);
                }
                Some(cookie)
            }
        }
    }

    /// Append the `Set-Cookie` header for the session cookie to `headers`, if needed.
    pub fn inject_cookie(
        &self,
        headers: &mut HeaderMap,
        processor: &Processor,
    ) -> Result<(), errors::InjectCookieError> {
        let Some(cookie) = self.cookie() else {
            return Ok(());
        };
        let mut cookies = ResponseCookies::new();
        cookies.insert(cookie);
        for value in cookies.header_values(processor) {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| errors::InjectCookieError { invalid_header_value: value })?;
            headers.append(SET_COOKIE, value);
        }
        Ok(())
    }

    fn targets_context(&self, url: &str) -> bool {
        if url.is_empty() || url.starts_with(['#', '?']) || url.starts_with("//") || has_scheme(url)
        {
            return false;
        }
        if !url.starts_with('/') {
            // Relative references resolve against a URL inside the context.
            return true;
        }
        let context = self.config.cookie.context_path().trim_end_matches('/');
        if context.is_empty() {
            return true;
        }
        match url.strip_prefix(context) {
            Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#', ';']),
            None => false,
        }
    }
}

/// Remove the session path parameter from `path`.
///
/// It returns the cleaned-up path and the raw value of the parameter, if it was present.
/// Only the first occurrence is considered.
pub fn split_session_path_parameter<'a>(path: &'a str, name: &str) -> (Cow<'a, str>, Option<&'a str>) {
    let needle = format!(";{name}=");
    let Some(start) = path.find(&needle) else {
        return (Cow::Borrowed(path), None);
    };
    let value_start = start + needle.len();
    let value_end = path[value_start..]
        .find([';', '/', '?', '#'])
        .map_or(path.len(), |i| value_start + i);
    let mut clean = String::with_capacity(path.len());
    clean.push_str(&path[..start]);
    clean.push_str(&path[value_end..]);
    (Cow::Owned(clean), Some(&path[value_start..value_end]))
}

fn has_scheme(url: &str) -> bool {
    let Some(colon) = url.find(':') else {
        return false;
    };
    let scheme = &url[..colon];
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("`{invalid_header_value}` is not a valid value for the `Set-Cookie` header")]
    /// The error returned by [`SessionPropagation::inject_cookie`][super::SessionPropagation::inject_cookie].
    pub struct InjectCookieError {
        pub invalid_header_value: String,
    }
}
