use biscotti::{Processor, ProcessorConfig};
use gatehouse_session::config::InactivityTimeout;
use gatehouse_session::{Principal, Session, SessionConfig, SessionStore};
use gatehouse_session_memory_store::InMemorySessionStore;
use http::HeaderMap;
use http::header::COOKIE;
use std::time::Duration;

/// An empty in-memory session store.
pub fn store() -> SessionStore {
    SessionStore::new(InMemorySessionStore::default())
}

/// An empty in-memory session store, together with a handle on the backend
/// to inspect its content.
pub fn inspectable_store() -> (SessionStore, InMemorySessionStore) {
    let backend = InMemorySessionStore::default();
    (SessionStore::new(backend.clone()), backend)
}

pub fn processor() -> Processor {
    ProcessorConfig::default().into()
}

/// A timeout short enough to elapse while the test is running.
pub fn short_timeout() -> InactivityTimeout {
    InactivityTimeout::After(Duration::from_millis(40))
}

/// Long enough to outlive the test.
pub fn long_timeout() -> InactivityTimeout {
    InactivityTimeout::After(Duration::from_secs(1000))
}

/// Wait until sessions created with [`short_timeout`] have expired.
pub async fn wait_for_expiry() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

pub fn cookie_headers(config: &SessionConfig, value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        format!("theme=dark; {}={value}", config.cookie.name)
            .parse()
            .unwrap(),
    );
    headers
}

pub async fn authenticated_session(store: &SessionStore) -> Session {
    let session = store.create(long_timeout()).await.unwrap();
    store
        .promote(&session.id, Principal::new("tomcat", ["tomcat"]))
        .await
        .unwrap();
    session
}
