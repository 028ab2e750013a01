//! An in-memory session store for `gatehouse_session`.
use jiff::Timestamp;
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};
use tokio::sync::{Mutex, MutexGuard};

use gatehouse_session::{
    SessionId,
    store::{
        RecordChange, SessionRecord, SessionStorageBackend,
        errors::{
            ChangeIdError, CreateError, DeleteError, DeleteExpiredError, DuplicateIdError,
            LoadError, TouchError, UnknownIdError, UpdateError,
        },
    },
};

#[derive(Clone)]
/// An in-memory session store.
///
/// Every operation runs under a single lock, which makes identifier rotation
/// an atomic cutover: a concurrent reader sees either the old identifier or
/// the new one, never both and never neither.
///
/// Stale records are evicted lazily, whenever an operation stumbles upon them,
/// and in bulk by [`SessionStorageBackend::delete_expired`].
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
pub struct InMemorySessionStore(Arc<Mutex<HashMap<SessionId, SessionRecord>>>);

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .finish_non_exhaustive()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new (empty) in-memory session store.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }

    /// The number of records currently held, stale ones included.
    pub async fn len(&self) -> usize {
        self.0.lock().await.len()
    }

    /// Returns `true` if the store holds no records at all.
    pub async fn is_empty(&self) -> bool {
        self.0.lock().await.is_empty()
    }

    fn get_mut_if_fresh<'a, 'b, 'c: 'a>(
        guard: &'a mut MutexGuard<'c, HashMap<SessionId, SessionRecord>>,
        id: &'b SessionId,
        now: Timestamp,
    ) -> Result<&'a mut SessionRecord, UnknownIdError> {
        let is_stale = match guard.get(id) {
            None => return Err(UnknownIdError { id: *id }),
            Some(record) => record.is_stale_at(now),
        };
        if is_stale {
            guard.remove(id);
            tracing::trace!("Evicted a stale session record");
            return Err(UnknownIdError { id: *id });
        }
        guard
            .get_mut(id)
            .ok_or(UnknownIdError { id: *id })
    }

    fn _delete(
        guard: &mut MutexGuard<'_, HashMap<SessionId, SessionRecord>>,
        id: &SessionId,
        now: Timestamp,
    ) -> Result<SessionRecord, UnknownIdError> {
        let Some(old_record) = guard.remove(id) else {
            return Err(UnknownIdError { id: *id });
        };
        if old_record.is_stale_at(now) {
            return Err(UnknownIdError { id: *id });
        }
        Ok(old_record)
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for InMemorySessionStore {
    #[tracing::instrument(name = "Create server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn create(&self, id: &SessionId, record: SessionRecord) -> Result<(), CreateError> {
        let mut guard = self.0.lock().await;
        if Self::get_mut_if_fresh(&mut guard, id, Timestamp::now()).is_ok() {
            return Err(CreateError::DuplicateId(DuplicateIdError { id: *id }));
        }
        guard.insert(*id, record);
        Ok(())
    }

    #[tracing::instrument(name = "Update server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn update(&self, id: &SessionId, record: SessionRecord) -> Result<(), UpdateError> {
        let mut guard = self.0.lock().await;
        let old_record = Self::get_mut_if_fresh(&mut guard, id, Timestamp::now())?;
        *old_record = record;
        Ok(())
    }

    #[tracing::instrument(name = "Modify server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn modify(&self, id: &SessionId, change: RecordChange) -> Result<SessionRecord, UpdateError> {
        let mut guard = self.0.lock().await;
        let record = Self::get_mut_if_fresh(&mut guard, id, Timestamp::now())?;
        let before = record.clone();
        change(record);
        Ok(before)
    }

    #[tracing::instrument(name = "Touch server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn touch(&self, id: &SessionId, now: Timestamp) -> Result<SessionRecord, TouchError> {
        let mut guard = self.0.lock().await;
        let record = Self::get_mut_if_fresh(&mut guard, id, now)?;
        record.last_accessed_at = now;
        Ok(record.clone())
    }

    #[tracing::instrument(name = "Load server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        let mut guard = self.0.lock().await;
        let outcome = Self::get_mut_if_fresh(&mut guard, id, Timestamp::now())
            .ok()
            .map(|record| record.clone());
        Ok(outcome)
    }

    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        let mut guard = self.0.lock().await;
        Self::_delete(&mut guard, id, Timestamp::now())?;
        Ok(())
    }

    #[tracing::instrument(name = "Change id for server-side session record", level = tracing::Level::TRACE, skip_all)]
    async fn change_id(&self, old_id: &SessionId, new_id: &SessionId) -> Result<(), ChangeIdError> {
        let mut guard = self.0.lock().await;
        let now = Timestamp::now();
        if Self::get_mut_if_fresh(&mut guard, new_id, now).is_ok() {
            return Err(DuplicateIdError { id: *new_id }.into());
        }
        let record = Self::_delete(&mut guard, old_id, now)?;
        guard.insert(*new_id, record);
        Ok(())
    }

    #[tracing::instrument(name = "Delete expired records", level = tracing::Level::TRACE, skip_all)]
    async fn delete_expired(
        &self,
        batch_size: Option<NonZeroUsize>,
    ) -> Result<usize, DeleteExpiredError> {
        let mut guard = self.0.lock().await;
        let now = Timestamp::now();
        let mut stale_ids = Vec::new();
        for (id, record) in guard.iter() {
            if record.is_stale_at(now) {
                stale_ids.push(*id);
                if let Some(batch_size) = batch_size {
                    if stale_ids.len() >= batch_size.get() {
                        break;
                    }
                }
            }
        }
        let num_deleted = stale_ids.len();
        for id in stale_ids {
            guard.remove(&id);
        }
        Ok(num_deleted)
    }
}
