use crate::config::InactivityTimeout;
use crate::incoming::IncomingSession;
use crate::{Principal, Session, SessionId, SessionTransport};
use errors::{
    ChangeIdError, CreateError, DeleteError, DeleteExpiredError, LoadError, ResolveError,
    TouchError, UpdateError,
};
use jiff::Timestamp;
use serde_json::Value;
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc, time::Duration};
use tracing_log_error::log_error;

/// How many times we draw a fresh identifier before giving up
/// on a collision with a live session.
const MAX_ID_DRAWS: usize = 8;

/// Where server-side session records are stored.
///
/// It is a thin wrapper
/// [around your chosen storage backend implementation][`SessionStorageBackend`],
/// removing the need to specify the concrete type of the storage backend
/// everywhere in your code.
///
/// Cloning is cheap: all clones share the same backend.
#[derive(Debug, Clone)]
pub struct SessionStore(Arc<dyn SessionStorageBackend>);

impl SessionStore {
    /// Creates a new session store using the provided backend.
    pub fn new<Backend>(backend: Backend) -> Self
    where
        Backend: SessionStorageBackend + 'static,
    {
        Self(Arc::new(backend))
    }

    /// Find the live session referenced by the incoming request, if any.
    ///
    /// Candidates are tried in order of precedence (cookie first, then the
    /// URL path parameter). The first one that refers to a live session wins
    /// and its last-access time is refreshed.
    /// Expired sessions are evicted and never returned.
    #[tracing::instrument(name = "Resolve session", level = tracing::Level::TRACE, skip_all)]
    pub async fn resolve(&self, incoming: &IncomingSession) -> Result<Option<Session>, ResolveError> {
        for (id, transport) in incoming.candidates() {
            match self.0.touch(&id, Timestamp::now()).await {
                Ok(record) => {
                    return Ok(Some(Session {
                        id,
                        record,
                        transport,
                    }));
                }
                Err(TouchError::UnknownId(_)) => {
                    tracing::debug!(
                        session.fingerprint = %id.fingerprint(),
                        session.transport = ?transport,
                        "The requested session doesn't exist or has expired"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Allocate a brand-new, unauthenticated session.
    ///
    /// The identifier is guaranteed not to collide with any live session:
    /// on a collision a new one is drawn.
    #[tracing::instrument(name = "Create session", level = tracing::Level::TRACE, skip_all)]
    pub async fn create(
        &self,
        max_inactive_interval: InactivityTimeout,
    ) -> Result<Session, CreateError> {
        let record = SessionRecord::new(max_inactive_interval);
        let mut attempt = 1;
        loop {
            let id = SessionId::random();
            match self.0.create(&id, record.clone()).await {
                Ok(()) => {
                    return Ok(Session {
                        id,
                        record,
                        transport: SessionTransport::None,
                    });
                }
                Err(CreateError::DuplicateId(e)) if attempt < MAX_ID_DRAWS => {
                    log_error!(e, level: tracing::Level::WARN, "Session id collision, drawing a new one");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Give an existing session a new identifier, preserving all of its state.
    ///
    /// The cutover is atomic: once this call returns, the old identifier
    /// no longer resolves and the new one does. There is no window in which
    /// both are valid.
    #[tracing::instrument(name = "Rotate session id", level = tracing::Level::TRACE, skip_all)]
    pub async fn rotate(&self, old_id: &SessionId) -> Result<SessionId, ChangeIdError> {
        let mut attempt = 1;
        loop {
            let new_id = SessionId::random();
            match self.0.change_id(old_id, &new_id).await {
                Ok(()) => return Ok(new_id),
                Err(ChangeIdError::DuplicateId(e)) if attempt < MAX_ID_DRAWS => {
                    log_error!(e, level: tracing::Level::WARN, "Session id collision, drawing a new one");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Refresh the last-access time of a session, extending its lifetime.
    pub async fn touch(&self, id: &SessionId) -> Result<SessionRecord, TouchError> {
        self.0.touch(id, Timestamp::now()).await
    }

    /// Loads an existing session record from the store using the provided ID.
    ///
    /// If the session does not exist or has expired, `None` is returned.
    pub async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        self.0.load(id).await
    }

    /// Overwrite the record of an existing session.
    pub async fn update(&self, id: &SessionId, record: &SessionRecord) -> Result<(), UpdateError> {
        self.0.update(id, record.clone()).await
    }

    /// Apply `change` to the record of a live session, atomically.
    ///
    /// No other write to the same session can slip in between reading the
    /// record and storing the changed version. It returns the record as it
    /// was before the change.
    pub async fn modify<F>(&self, id: &SessionId, change: F) -> Result<SessionRecord, UpdateError>
    where
        F: FnOnce(&mut SessionRecord) + Send + 'static,
    {
        self.0.modify(id, Box::new(change)).await
    }

    /// Attach an authenticated principal to an existing session.
    pub async fn promote(&self, id: &SessionId, principal: Principal) -> Result<(), UpdateError> {
        self.modify(id, move |record| record.principal = Some(principal))
            .await?;
        Ok(())
    }

    /// Destroy a session, e.g. on logout.
    pub async fn invalidate(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.0.delete(id).await
    }

    /// Remove every session whose inactivity interval has elapsed.
    ///
    /// It returns the number of sessions that were removed.
    #[tracing::instrument(name = "Sweep expired sessions", level = tracing::Level::TRACE, skip_all)]
    pub async fn expire_sweep(&self) -> Result<usize, DeleteExpiredError> {
        self.0.delete_expired(None).await
    }

    /// Run [`SessionStore::expire_sweep`] periodically on the current tokio runtime.
    ///
    /// Abort the returned handle to stop the sweeper.
    pub fn spawn_expiry_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match store.expire_sweep().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(sessions.removed = n, "Purged expired sessions"),
                    Err(e) => {
                        log_error!(e, level: tracing::Level::WARN, "Failed to purge expired sessions")
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
/// The interface of a session storage backend.
///
/// Implementations must be safe to call concurrently from any number of tasks.
/// In particular [`change_id`](SessionStorageBackend::change_id) must be
/// atomic with respect to every other operation.
pub trait SessionStorageBackend: std::fmt::Debug + Send + Sync {
    /// Creates a new session record in the store using the provided ID.
    async fn create(&self, id: &SessionId, record: SessionRecord) -> Result<(), CreateError>;

    /// Update the state of an existing session in the store.
    ///
    /// It overwrites the existing record with the provided one.
    async fn update(&self, id: &SessionId, record: SessionRecord) -> Result<(), UpdateError>;

    /// Apply `change` to the record of a live session and return the record
    /// as it was before.
    ///
    /// Reading, changing and writing back must be a single atomic step with
    /// respect to every other operation on the same session.
    async fn modify(&self, id: &SessionId, change: RecordChange) -> Result<SessionRecord, UpdateError>;

    /// Set the last-access time of a live session to `now` and return
    /// the refreshed record.
    ///
    /// Stale sessions must be reported as unknown.
    async fn touch(&self, id: &SessionId, now: Timestamp) -> Result<SessionRecord, TouchError>;

    /// Loads an existing session record from the store using the provided ID.
    ///
    /// If a session with the given ID exists, it is returned. If the session
    /// does not exist or has been invalidated (e.g., expired), `None` is
    /// returned.
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError>;

    /// Deletes a session record from the store using the provided ID.
    ///
    /// If the session exists, it is removed from the store.
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError>;

    /// Change the session id associated with an existing session record.
    ///
    /// The server-side state is left unchanged.
    async fn change_id(&self, old_id: &SessionId, new_id: &SessionId) -> Result<(), ChangeIdError>;

    /// Deletes expired session records from the store.
    ///
    /// If `batch_size` is provided, at most `batch_size` records are removed
    /// in a single call. It returns the number of deleted records.
    async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError>;
}

/// An in-place change to a session record, see [`SessionStorageBackend::modify`].
pub type RecordChange = Box<dyn FnOnce(&mut SessionRecord) + Send>;

/// A server-side session record.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// When the session was created.
    pub created_at: Timestamp,
    /// When the session was last resolved by a request.
    pub last_accessed_at: Timestamp,
    /// How long the session may stay idle.
    pub max_inactive_interval: InactivityTimeout,
    /// The authenticated principal, if the session went through a successful login.
    pub principal: Option<Principal>,
    /// Other key-value pairs attached to the session.
    pub state: HashMap<String, Value>,
}

impl SessionRecord {
    /// A fresh, unauthenticated record.
    pub fn new(max_inactive_interval: InactivityTimeout) -> Self {
        let now = Timestamp::now();
        Self {
            created_at: now,
            last_accessed_at: now,
            max_inactive_interval,
            principal: None,
            state: HashMap::new(),
        }
    }

    /// Returns `true` if the inactivity interval has elapsed at `now`.
    pub fn is_stale_at(&self, now: Timestamp) -> bool {
        self.max_inactive_interval
            .deadline(self.last_accessed_at)
            .is_some_and(|deadline| deadline <= now)
    }

    /// Returns `true` if a principal is attached to the session.
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}

/// Errors that can occur when interacting with a session storage backend.
pub mod errors {
    use crate::SessionId;

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::create`][super::SessionStorageBackend::create].
    pub enum CreateError {
        #[error(transparent)]
        /// A session with the same ID already exists.
        DuplicateId(#[from] DuplicateIdError),
        /// Something else went wrong when creating a new session record.
        #[error("Something went wrong when creating a new session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::update`][super::SessionStorageBackend::update].
    pub enum UpdateError {
        #[error(transparent)]
        /// There is no session with the given ID.
        UnknownId(#[from] UnknownIdError),
        /// Something else went wrong when updating the session record.
        #[error("Something went wrong when updating the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::touch`][super::SessionStorageBackend::touch].
    pub enum TouchError {
        #[error(transparent)]
        /// There is no live session with the given ID.
        UnknownId(#[from] UnknownIdError),
        /// Something else went wrong when refreshing the session record.
        #[error("Something went wrong when refreshing the last-access time of the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::load`][super::SessionStorageBackend::load].
    pub enum LoadError {
        /// Something went wrong when loading the session record.
        #[error("Something went wrong when loading the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::delete`][super::SessionStorageBackend::delete].
    pub enum DeleteError {
        #[error(transparent)]
        /// There is no session with the given ID.
        UnknownId(#[from] UnknownIdError),
        /// Something else went wrong when deleting the session record.
        #[error("Something went wrong when deleting the session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::change_id`][super::SessionStorageBackend::change_id].
    pub enum ChangeIdError {
        #[error(transparent)]
        /// There is no session with the given ID.
        UnknownId(#[from] UnknownIdError),
        #[error(transparent)]
        /// There is already a session associated with the new ID.
        DuplicateId(#[from] DuplicateIdError),
        /// Something else went wrong when changing the session id.
        #[error("Something went wrong when changing the session id for a session record.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorageBackend::delete_expired`][super::SessionStorageBackend::delete_expired].
    pub enum DeleteExpiredError {
        /// Something went wrong when deleting expired sessions.
        #[error("Something went wrong when deleting expired sessions.")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::resolve`][super::SessionStore::resolve].
    pub enum ResolveError {
        #[error("Failed to refresh the requested session")]
        TouchError(#[from] TouchError),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("There is no session with the given id")]
    /// There is no session with the given ID.
    pub struct UnknownIdError {
        pub id: SessionId,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("A session with the same ID already exists.")]
    /// A session with the same ID already exists.
    pub struct DuplicateIdError {
        pub id: SessionId,
    }
}
