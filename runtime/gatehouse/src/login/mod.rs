//! The login dialogue.
//!
//! [`FormAuthenticator::handle`] looks at every inbound request and decides,
//! from the session state alone, where the client stands:
//!
//! 1. A request for a protected resource without an authenticated session is
//!    saved and answered with the login challenge.
//! 2. The credential submission is checked against the [`Realm`]. On success the
//!    session identifier is rotated, the session is marked as authenticated and
//!    the client is redirected to the saved request.
//! 3. The client follows the redirect: the saved request is restored, with its
//!    original method and body, and forwarded to the resource.
//! 4. From then on, requests go through as long as the principal holds the
//!    required roles.
//!
//! No state is kept between requests other than what lives in the session store.
mod credentials;
mod page;

pub use page::{ChallengeContext, DefaultLoginPage, LoginPageRenderer};

use crate::config::{ChallengeStyle, FormLoginConfig, GatehouseConfig};
use crate::constraint::errors::ConstraintMismatch;
use crate::constraint::{Classification, ConstraintSet, RequiredRoles};
use crate::errors::{AuthError, RealmUnavailable, SessionStoreError};
use crate::realm::Realm;
use crate::request::{Request, RequestHead, decode_path, strip_path_parameters};
use crate::response::{self, CachePolicy, Response};
use crate::saved_request::errors::SavedRequestError;
use crate::saved_request::{SavedRequest, SavedRequestCache};
use biscotti::{Processor, ProcessorConfig};
use credentials::Credentials;
use gatehouse_session::propagation::errors::InjectCookieError;
use gatehouse_session::propagation::split_session_path_parameter;
use gatehouse_session::store::errors::{ChangeIdError, DeleteError, UpdateError};
use gatehouse_session::{
    IncomingSession, Principal, Session, SessionConfig, SessionId, SessionPropagation,
    SessionStore,
};
use http::{Method, StatusCode};
use std::sync::Arc;
use tracing::Level;
use tracing_log_error::log_error;

#[derive(Clone)]
/// Drives clients through the form login dialogue.
///
/// Cloning is cheap: clones share the same configuration, store and realm.
pub struct FormAuthenticator {
    login: Arc<FormLoginConfig>,
    session: Arc<SessionConfig>,
    store: SessionStore,
    saved_requests: SavedRequestCache,
    constraints: Arc<ConstraintSet>,
    realm: Arc<dyn Realm>,
    renderer: Arc<dyn LoginPageRenderer>,
    processor: Arc<Processor>,
}

impl std::fmt::Debug for FormAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormAuthenticator")
            .field("login", &self.login)
            .field("session", &self.session)
            .field("constraints", &self.constraints)
            .field("realm", &self.realm)
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
#[must_use]
/// What to do with a request, according to [`FormAuthenticator::handle`].
pub enum Decision {
    /// Let the request through to the resource it targets.
    Forward(Forward),
    /// Answer the client with this response. The resource must not be invoked.
    Reply(Response),
}

#[derive(Debug)]
/// A request that may proceed to the resource it targets.
pub struct Forward {
    /// The request to serve.
    ///
    /// When the client is coming back from the login dialogue, this is the
    /// request that was interrupted, not the one the client just sent.
    pub request: Request,
    /// The principal attached to the session, if any.
    pub principal: Option<Principal>,
    /// `true` if `request` was restored from the saved request.
    pub replayed: bool,
    /// Apply this to the response produced by the resource.
    pub outbound: Outbound,
}

/// What the realm made of a credential submission.
enum LoginOutcome {
    Accepted(Principal),
    /// Wrong or malformed credentials. The client gets another chance.
    Rejected,
}

#[derive(Clone)]
/// Session and caching concerns for a response produced outside of the authenticator.
pub struct Outbound {
    propagation: Option<SessionPropagation>,
    cache_policy: CachePolicy,
    processor: Arc<Processor>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("propagation", &self.propagation)
            .field("cache_policy", &self.cache_policy)
            .finish_non_exhaustive()
    }
}

impl Outbound {
    /// Rewrite `url` so that it carries the session identifier, if the client
    /// needs it to.
    ///
    /// Every URL that points back at the application and ends up in the
    /// response (links, form actions, redirects) must go through here.
    pub fn encode_url(&self, url: &str) -> String {
        match &self.propagation {
            Some(propagation) => propagation.encode_url(url),
            None => url.to_owned(),
        }
    }

    /// The identifier of the session the response belongs to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.propagation.as_ref().map(SessionPropagation::id)
    }

    /// Attach the session cookie and the caching headers to `response`.
    pub fn finalize(&self, response: &mut Response) -> Result<(), InjectCookieError> {
        self.cache_policy.apply(response.headers_mut());
        if let Some(propagation) = &self.propagation {
            propagation.inject_cookie(response.headers_mut(), &self.processor)?;
        }
        Ok(())
    }
}

impl FormAuthenticator {
    /// Assemble an authenticator.
    ///
    /// It fails if the security constraints in `config` are malformed.
    pub fn new(
        config: GatehouseConfig,
        store: SessionStore,
        realm: Arc<dyn Realm>,
    ) -> Result<Self, ConstraintMismatch> {
        let constraints = ConstraintSet::from_config(&config.constraints)?;
        Ok(Self {
            login: Arc::new(config.login),
            session: Arc::new(config.session),
            saved_requests: SavedRequestCache::new(store.clone()),
            store,
            constraints: Arc::new(constraints),
            realm,
            renderer: Arc::new(DefaultLoginPage),
            processor: Arc::new(ProcessorConfig::default().into()),
        })
    }

    /// Use a custom login page.
    pub fn login_page_renderer<R>(mut self, renderer: R) -> Self
    where
        R: LoginPageRenderer + 'static,
    {
        self.renderer = Arc::new(renderer);
        self
    }

    /// The session store backing the authenticator.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Purge expired sessions in the background, every `session.state.sweep_period`.
    ///
    /// It must be called from within a tokio runtime. Abort the returned
    /// handle to stop sweeping.
    pub fn spawn_expiry_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.store.spawn_expiry_sweeper(self.session.state.sweep_period)
    }

    /// Decide what to do with an inbound request.
    ///
    /// An error is returned only for failures the dialogue can't recover from,
    /// e.g. an unreachable realm. Access is never granted in that case: answer
    /// with [`AuthError::into_response`].
    #[tracing::instrument(
        name = "Form authentication",
        level = Level::DEBUG,
        skip_all,
        fields(http.method = %request.head.method, http.target = %request.head.target)
    )]
    pub async fn handle(&self, request: Request) -> Result<Decision, AuthError> {
        let incoming = IncomingSession::extract(
            &request.head.headers,
            request.raw_path(),
            &self.session,
            &self.processor,
        );
        let session = self
            .store
            .resolve(&incoming)
            .await
            .map_err(SessionStoreError::from)?;
        if session.is_none() && !incoming.is_empty() {
            tracing::debug!("The session referenced by the request has expired or never existed");
        }

        let clean_path = self.clean_path(&request);
        let mapped_path = strip_path_parameters(&clean_path).into_owned();
        if request.head.method == Method::POST && self.is_login_action(&mapped_path) {
            return self.authenticate(request, session).await;
        }

        let (request, replayed) = match &session {
            Some(session) if session.is_authenticated() => {
                self.restore_saved_request(request, session, &mapped_path)
                    .await?
            }
            _ => (request, false),
        };
        let (clean_path, mapped_path) = if replayed {
            let clean_path = self.clean_path(&request);
            let mapped_path = strip_path_parameters(&clean_path).into_owned();
            (clean_path, mapped_path)
        } else {
            (clean_path, mapped_path)
        };

        // Constraints are matched against the decoded path, with no path parameters.
        let decoded_path = decode_path(&mapped_path);
        if self.is_login_page(&decoded_path) {
            return Ok(Decision::Forward(self.forward(request, session, false, replayed)));
        }
        match self.constraints.classify(&request.head.method, &decoded_path) {
            Classification::Unprotected => {
                Ok(Decision::Forward(self.forward(request, session, false, replayed)))
            }
            Classification::Protected(required) => match session {
                Some(session) if session.is_authenticated() => {
                    self.authorize(request, session, &required, replayed)
                }
                session => self.challenge(request, session, &clean_path).await,
            },
        }
    }

    /// Log the client out: the session is destroyed and the session cookie removed.
    ///
    /// Apply the returned [`Outbound`] to the response sent back to the client.
    #[tracing::instrument(name = "Log out", level = Level::DEBUG, skip_all)]
    pub async fn logout(&self, head: &RequestHead) -> Result<Outbound, AuthError> {
        let incoming =
            IncomingSession::extract(&head.headers, head.target.path(), &self.session, &self.processor);
        let session = self
            .store
            .resolve(&incoming)
            .await
            .map_err(SessionStoreError::from)?;
        let Some(session) = session else {
            return Ok(self.outbound(None, CachePolicy::Unchanged));
        };
        match self.store.invalidate(&session.id).await {
            // Expired or destroyed concurrently: the outcome is the same.
            Ok(()) | Err(DeleteError::UnknownId(_)) => {}
            Err(e) => return Err(SessionStoreError::from(e).into()),
        }
        tracing::info!(
            session.fingerprint = %session.id.fingerprint(),
            principal = session.principal().map(|p| p.name.as_str()),
            "Session invalidated"
        );
        let mut propagation = SessionPropagation::new(self.session.clone(), &session);
        propagation.ended();
        Ok(self.outbound(Some(propagation), CachePolicy::Unchanged))
    }

    async fn authenticate(
        &self,
        request: Request,
        session: Option<Session>,
    ) -> Result<Decision, AuthError> {
        let credentials = match credentials::extract(
            &request.head.headers,
            &request.body,
            &self.login.username_field,
            &self.login.password_field,
        ) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                log_error!(e, level: Level::DEBUG, "Malformed credential submission");
                None
            }
        };
        let outcome = match &credentials {
            Some(credentials) => match self.verify(credentials).await? {
                Some(principal) => LoginOutcome::Accepted(principal),
                None => LoginOutcome::Rejected,
            },
            None => LoginOutcome::Rejected,
        };
        let principal = match outcome {
            LoginOutcome::Accepted(principal) => principal,
            LoginOutcome::Rejected => {
                tracing::info!(
                    username = credentials.as_ref().map(|c| c.username.as_str()),
                    "Credentials rejected"
                );
                return self.reject(&request, session);
            }
        };
        let Some(session) = session else {
            return self.login_without_session(&request, principal).await;
        };

        let mut propagation = SessionPropagation::new(self.session.clone(), &session);
        let mut id = session.id;
        if self.login.change_session_id_on_authentication {
            let new_id = match self.store.rotate(&id).await {
                Ok(new_id) => new_id,
                // Invalidated or rotated by a concurrent request.
                Err(ChangeIdError::UnknownId(_)) => {
                    return self.login_without_session(&request, principal).await;
                }
                Err(e) => return Err(SessionStoreError::from(e).into()),
            };
            tracing::debug!(
                session.fingerprint = %id.fingerprint(),
                session.new_fingerprint = %new_id.fingerprint(),
                "Rotated the session identifier"
            );
            propagation.rotated(new_id);
            id = new_id;
        }
        let username = principal.name.clone();
        match self.store.promote(&id, principal.clone()).await {
            Ok(()) => {}
            Err(UpdateError::UnknownId(_)) => {
                return self.login_without_session(&request, principal).await;
            }
            Err(e) => return Err(SessionStoreError::from(e).into()),
        }
        tracing::info!(
            session.fingerprint = %id.fingerprint(),
            principal = %username,
            "Authenticated"
        );

        let target = match self.saved_requests.peek(&id).await? {
            Some(saved) => saved.uri,
            None => {
                tracing::debug!("There is no saved request to return to, sending the client to the landing page");
                self.login.landing_page.clone()
            }
        };
        let location = propagation.encode_url(&target);
        let response = response::see_other(request.head.version, &location)?;
        self.reply(response, Some(propagation), self.login.cache_policy())
    }

    /// Valid credentials were submitted, but the session that was challenged
    /// is gone. Start over from the landing page.
    async fn login_without_session(
        &self,
        request: &Request,
        principal: Principal,
    ) -> Result<Decision, AuthError> {
        tracing::info!(
            principal = %principal.name,
            "Credentials were submitted for a session that has expired or never existed"
        );
        let session = self
            .store
            .create(self.session.state.max_inactive_interval)
            .await
            .map_err(SessionStoreError::from)?;
        let landing_page = &self.login.landing_page;
        self.saved_requests
            .save(&session.id, &SavedRequest::landing(landing_page))
            .await?;
        let propagation = SessionPropagation::new(self.session.clone(), &session);
        let location = propagation.encode_url(landing_page);
        let response = response::see_other(request.head.version, &location)?;
        self.reply(response, Some(propagation), self.login.cache_policy())
    }

    fn reject(&self, request: &Request, session: Option<Session>) -> Result<Decision, AuthError> {
        let propagation = session
            .as_ref()
            .map(|session| SessionPropagation::new(self.session.clone(), session));
        let response = match &self.login.error_page {
            Some(error_page) => {
                let location = match &propagation {
                    Some(propagation) => propagation.encode_url(error_page),
                    None => error_page.clone(),
                };
                response::see_other(request.head.version, &location)?
            }
            None => {
                let clean_path = self.clean_path(request);
                self.challenge_response(&request.head, propagation.as_ref(), &clean_path, true)?
            }
        };
        self.reply(response, propagation, self.login.cache_policy())
    }

    async fn verify(&self, credentials: &Credentials) -> Result<Option<Principal>, RealmUnavailable> {
        let timeout = self.login.realm_timeout;
        let verification = self
            .realm
            .verify(&credentials.username, &credentials.password);
        let outcome = match tokio::time::timeout(timeout, verification).await {
            Ok(Ok(principal)) => return Ok(principal),
            Ok(Err(e)) => RealmUnavailable::Failed(e),
            Err(_) => RealmUnavailable::TimedOut { timeout },
        };
        log_error!(outcome, "The realm is unavailable, access denied");
        Err(outcome)
    }

    async fn restore_saved_request(
        &self,
        request: Request,
        session: &Session,
        clean_path: &str,
    ) -> Result<(Request, bool), AuthError> {
        let is_pending = SavedRequestCache::saved_in(&session.record)
            .is_some_and(|saved| saved.matches(clean_path));
        if !is_pending {
            return Ok((request, false));
        }
        // Another request may have consumed it in the meantime.
        let Some(saved) = self.saved_requests.take(&session.id).await? else {
            return Ok((request, false));
        };
        match saved.restore(request.head.clone()) {
            Ok(restored) => {
                tracing::debug!(
                    http.original_method = %restored.head.method,
                    "Replaying the request saved before the login"
                );
                Ok((restored, true))
            }
            Err(e) => {
                log_error!(e, level: Level::WARN, "The saved request can't be restored, serving the current one");
                Ok((request, false))
            }
        }
    }

    fn authorize(
        &self,
        request: Request,
        session: Session,
        required: &RequiredRoles,
        replayed: bool,
    ) -> Result<Decision, AuthError> {
        let permitted = session.principal().is_some_and(|principal| {
            required.is_satisfied_by(|role| self.realm.has_role(principal, role))
        });
        if permitted {
            return Ok(Decision::Forward(self.forward(request, Some(session), true, replayed)));
        }
        tracing::info!(
            session.fingerprint = %session.id.fingerprint(),
            principal = session.principal().map(|p| p.name.as_str()),
            "The principal lacks the roles required to access the resource"
        );
        let propagation = SessionPropagation::new(self.session.clone(), &session);
        let response = response::plain(
            StatusCode::FORBIDDEN,
            "Access to the requested resource has been denied",
        );
        self.reply(response, Some(propagation), self.login.cache_policy())
    }

    async fn challenge(
        &self,
        request: Request,
        session: Option<Session>,
        clean_path: &str,
    ) -> Result<Decision, AuthError> {
        let saved = match SavedRequest::capture(&request, clean_path, self.login.max_saved_body_size) {
            Ok(saved) => saved,
            Err(e) => {
                log_error!(e, level: Level::INFO, "The request can't be saved for after the login");
                let response = response::plain(StatusCode::PAYLOAD_TOO_LARGE, e.to_string());
                let propagation = session
                    .as_ref()
                    .map(|session| SessionPropagation::new(self.session.clone(), session));
                return self.reply(response, propagation, CachePolicy::Unchanged);
            }
        };
        let session = match session {
            Some(session) => session,
            None => self
                .store
                .create(self.session.state.max_inactive_interval)
                .await
                .map_err(SessionStoreError::from)?,
        };
        let session = match self.saved_requests.save(&session.id, &saved).await {
            Ok(()) => session,
            Err(SavedRequestError::UnknownSession) => {
                tracing::debug!(
                    session.fingerprint = %session.id.fingerprint(),
                    "The session went away before the request could be saved, starting a new one"
                );
                let session = self
                    .store
                    .create(self.session.state.max_inactive_interval)
                    .await
                    .map_err(SessionStoreError::from)?;
                self.saved_requests.save(&session.id, &saved).await?;
                session
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            session.fingerprint = %session.id.fingerprint(),
            "Authentication required, challenging the client"
        );
        let propagation = SessionPropagation::new(self.session.clone(), &session);
        let response = self.challenge_response(&request.head, Some(&propagation), clean_path, false)?;
        self.reply(response, Some(propagation), self.login.cache_policy())
    }

    fn challenge_response(
        &self,
        head: &RequestHead,
        propagation: Option<&SessionPropagation>,
        clean_path: &str,
        failed: bool,
    ) -> Result<Response, AuthError> {
        let encode = |url: &str| match propagation {
            Some(propagation) => propagation.encode_url(url),
            None => url.to_owned(),
        };
        match self.login.challenge {
            ChallengeStyle::Render => {
                let action = encode(&format!("{}{}", directory(clean_path), self.login.action));
                let page = self.renderer.render(&ChallengeContext {
                    action: &action,
                    username_field: &self.login.username_field,
                    password_field: &self.login.password_field,
                    failed,
                });
                Ok(response::html(StatusCode::OK, page))
            }
            ChallengeStyle::Redirect => {
                let location = encode(&self.login.login_page);
                Ok(response::see_other(head.version, &location)?)
            }
        }
    }

    fn forward(
        &self,
        request: Request,
        session: Option<Session>,
        protected: bool,
        replayed: bool,
    ) -> Forward {
        let propagation = session
            .as_ref()
            .map(|session| SessionPropagation::new(self.session.clone(), session));
        let cache_policy = if protected {
            self.login.cache_policy()
        } else {
            CachePolicy::Unchanged
        };
        Forward {
            request,
            principal: session.and_then(|session| session.record.principal),
            replayed,
            outbound: self.outbound(propagation, cache_policy),
        }
    }

    fn reply(
        &self,
        mut response: Response,
        propagation: Option<SessionPropagation>,
        cache_policy: CachePolicy,
    ) -> Result<Decision, AuthError> {
        self.outbound(propagation, cache_policy)
            .finalize(&mut response)?;
        Ok(Decision::Reply(response))
    }

    fn outbound(&self, propagation: Option<SessionPropagation>, cache_policy: CachePolicy) -> Outbound {
        Outbound {
            propagation,
            cache_policy,
            processor: self.processor.clone(),
        }
    }

    /// The request path, without the session path parameter.
    fn clean_path(&self, request: &Request) -> String {
        let name = &self.session.tracking.path_parameter_name;
        split_session_path_parameter(request.raw_path(), name)
            .0
            .into_owned()
    }

    fn is_login_action(&self, clean_path: &str) -> bool {
        clean_path.rsplit('/').next() == Some(self.login.action.as_str())
    }

    fn is_login_page(&self, decoded_path: &str) -> bool {
        let path_of = |url: &str| url.split(['?', '#']).next().unwrap_or(url).to_owned();
        path_of(&self.login.login_page) == decoded_path
            || self
                .login
                .error_page
                .as_deref()
                .is_some_and(|error_page| path_of(error_page) == decoded_path)
    }
}

/// Everything up to, and including, the last `/`.
fn directory(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    }
}
