use std::sync::Arc;
use std::time::Duration;

use gatehouse::config::GatehouseConfig;
use gatehouse::constraint::ConstraintRuleConfig;
use gatehouse::realm::RealmError;
use gatehouse::{Decision, FormAuthenticator, MemoryRealm, Realm, Request, Response};
use gatehouse_session::store::errors::{
    ChangeIdError, CreateError, DeleteError, DeleteExpiredError, LoadError, TouchError,
    UpdateError,
};
use gatehouse_session::store::{RecordChange, SessionRecord, SessionStorageBackend};
use gatehouse_session::{Principal, SessionId, SessionStore};
use std::num::NonZeroUsize;
use gatehouse_session_memory_store::InMemorySessionStore;
use secrecy::SecretString;

fn constraint(pattern: &str, methods: &[&str], roles: &[&str]) -> ConstraintRuleConfig {
    ConstraintRuleConfig {
        patterns: vec![pattern.to_owned()],
        methods: methods.iter().map(|m| m.to_string()).collect(),
        roles: Some(roles.iter().map(|r| r.to_string()).collect()),
        ..Default::default()
    }
}

/// - `/protected/*` requires the `tomcat` role, for every method.
/// - `/test` requires the `tomcat` role, for `PUT` only.
/// - `/admin/*` requires the `admin` role.
/// - `/closed/*` is off-limits to everybody.
pub fn config() -> GatehouseConfig {
    let mut config = GatehouseConfig::default();
    config.constraints = vec![
        constraint("/protected/*", &[], &["tomcat"]),
        constraint("/test", &["PUT"], &["tomcat"]),
        constraint("/admin/*", &[], &["admin"]),
        constraint("/closed/*", &[], &[]),
    ];
    config
}

pub fn realm() -> MemoryRealm {
    MemoryRealm::new()
        .with_user("tomcat", "tomcat", ["tomcat"])
        .with_user("admin", "admin", ["admin", "tomcat"])
}

pub fn authenticator(config: GatehouseConfig) -> FormAuthenticator {
    authenticator_with_realm(config, realm())
}

pub fn authenticator_with_realm<R: Realm + 'static>(config: GatehouseConfig, realm: R) -> FormAuthenticator {
    let store = SessionStore::new(InMemorySessionStore::default());
    FormAuthenticator::new(config, store, Arc::new(realm)).unwrap()
}

pub fn authenticator_with_store(config: GatehouseConfig, store: SessionStore) -> FormAuthenticator {
    FormAuthenticator::new(config, store, Arc::new(realm())).unwrap()
}

/// Play the role of the application behind the authenticator.
///
/// Resources answer with a description of the request they received.
pub async fn serve(auth: &FormAuthenticator, request: Request) -> Response {
    match auth.handle(request).await {
        Ok(Decision::Reply(response)) => response,
        Ok(Decision::Forward(forward)) => {
            let request = &forward.request;
            let user = forward
                .principal
                .as_ref()
                .map_or("-", |principal| principal.name.as_str());
            let body = format!(
                "OK {} {} user={} body={}",
                request.head.method,
                request.head.target,
                user,
                String::from_utf8_lossy(&request.body)
            );
            let mut response = Response::new(body.into());
            forward.outbound.finalize(&mut response).unwrap();
            response
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug)]
/// A realm that can't be reached.
pub struct BrokenRealm;

#[async_trait::async_trait]
impl Realm for BrokenRealm {
    async fn verify(&self, _: &str, _: &SecretString) -> Result<Option<Principal>, RealmError> {
        Err(RealmError::new(anyhow::anyhow!("connection refused")))
    }
}

#[derive(Debug)]
/// A realm that takes forever to answer.
pub struct SlowRealm;

#[async_trait::async_trait]
impl Realm for SlowRealm {
    async fn verify(&self, _: &str, _: &SecretString) -> Result<Option<Principal>, RealmError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }
}

#[derive(Debug, Default)]
/// A store where sessions disappear as soon as a request has resolved them,
/// as if another request had invalidated them right after.
pub struct VanishingSessions(InMemorySessionStore);

#[async_trait::async_trait]
impl SessionStorageBackend for VanishingSessions {
    async fn create(&self, id: &SessionId, record: SessionRecord) -> Result<(), CreateError> {
        self.0.create(id, record).await
    }
    async fn update(&self, id: &SessionId, record: SessionRecord) -> Result<(), UpdateError> {
        self.0.update(id, record).await
    }
    async fn modify(&self, id: &SessionId, change: RecordChange) -> Result<SessionRecord, UpdateError> {
        self.0.modify(id, change).await
    }
    async fn touch(&self, id: &SessionId, now: jiff::Timestamp) -> Result<SessionRecord, TouchError> {
        let record = self.0.touch(id, now).await?;
        self.0.delete(id).await.unwrap();
        Ok(record)
    }
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, LoadError> {
        self.0.load(id).await
    }
    async fn delete(&self, id: &SessionId) -> Result<(), DeleteError> {
        self.0.delete(id).await
    }
    async fn change_id(&self, old_id: &SessionId, new_id: &SessionId) -> Result<(), ChangeIdError> {
        self.0.change_id(old_id, new_id).await
    }
    async fn delete_expired(&self, batch_size: Option<NonZeroUsize>) -> Result<usize, DeleteExpiredError> {
        self.0.delete_expired(batch_size).await
    }
}
