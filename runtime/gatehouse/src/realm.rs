//! The credential store the authenticator delegates to.
use gatehouse_session::Principal;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeSet, HashMap};

#[async_trait::async_trait]
/// Verifies credentials and answers role membership questions.
///
/// Implementations are supplied by the hosting application: a database, a
/// directory service, a static file. The authenticator treats every call as
/// potentially slow and bounds it with a timeout.
///
/// Implementations must never log the credential.
pub trait Realm: std::fmt::Debug + Send + Sync {
    /// Check `password` for the user called `username`.
    ///
    /// Returns the authenticated principal, with its roles, if the credentials are valid
    /// and `None` if they aren't.
    /// An error signals that the check couldn't be performed at all.
    async fn verify(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<Principal>, RealmError>;

    /// Returns `true` if `principal` holds `role`.
    fn has_role(&self, principal: &Principal, role: &str) -> bool {
        principal.has_role(role)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("The realm failed to verify the submitted credentials")]
/// The realm couldn't perform the verification.
pub struct RealmError(#[source] pub anyhow::Error);

impl RealmError {
    pub fn new(e: impl Into<anyhow::Error>) -> Self {
        Self(e.into())
    }
}

#[derive(Default)]
/// A realm backed by a fixed set of users, kept in memory.
pub struct MemoryRealm {
    users: HashMap<String, MemoryUser>,
}

struct MemoryUser {
    password: SecretString,
    roles: BTreeSet<String>,
}

impl std::fmt::Debug for MemoryRealm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRealm")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MemoryRealm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user, replacing any previous user with the same name.
    pub fn with_user<I, R>(mut self, username: &str, password: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.users.insert(
            username.to_owned(),
            MemoryUser {
                password: SecretString::from(password),
                roles: roles.into_iter().map(Into::into).collect(),
            },
        );
        self
    }
}

#[async_trait::async_trait]
impl Realm for MemoryRealm {
    async fn verify(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<Principal>, RealmError> {
        let Some(user) = self.users.get(username) else {
            return Ok(None);
        };
        if user.password.expose_secret() != password.expose_secret() {
            return Ok(None);
        }
        Ok(Some(Principal::new(username, user.roles.iter().cloned())))
    }
}
