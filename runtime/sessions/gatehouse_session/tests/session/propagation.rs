//! Outbound URLs and `Set-Cookie` headers carry the identifier back to the client.
use std::sync::Arc;

use gatehouse_session::{Session, SessionConfig, SessionId, SessionPropagation, SessionTransport};
use gatehouse_session::store::SessionRecord;
use gatehouse_session::config::InactivityTimeout;
use googletest::{
    expect_that,
    prelude::{eq, none, some},
};
use http::HeaderMap;
use http::header::SET_COOKIE;

use crate::fixtures::processor;

fn session(transport: SessionTransport) -> Session {
    Session {
        id: SessionId::random(),
        record: SessionRecord::new(InactivityTimeout::Never),
        transport,
    }
}

fn plan(config: SessionConfig, session: &Session) -> SessionPropagation {
    SessionPropagation::new(Arc::new(config), session)
}

#[googletest::test]
fn a_new_session_gets_a_cookie_and_rewritten_urls() {
    let session = session(SessionTransport::None);
    let propagation = plan(SessionConfig::default(), &session);

    assert!(propagation.rewrites_urls());
    assert_eq!(
        propagation.encode_url("/app/index?page=2#top"),
        format!("/app/index;jsessionid={}?page=2#top", session.id)
    );
    let cookie = propagation.cookie().unwrap();
    expect_that!(cookie.name(), eq("JSESSIONID"));
    expect_that!(cookie.value(), eq(session.id.to_string().as_str()));
}

#[googletest::test]
fn a_session_tracked_through_the_cookie_is_left_alone() {
    let session = session(SessionTransport::Cookie);
    let propagation = plan(SessionConfig::default(), &session);

    assert!(!propagation.rewrites_urls());
    assert_eq!(propagation.encode_url("/app/index"), "/app/index");
    assert!(propagation.cookie().is_none());
}

#[googletest::test]
fn a_client_without_cookies_keeps_getting_rewritten_urls() {
    let session = session(SessionTransport::PathParameter);
    let propagation = plan(SessionConfig::default(), &session);

    assert!(propagation.rewrites_urls());
    assert_eq!(
        propagation.encode_url("/app/j_security_check"),
        format!("/app/j_security_check;jsessionid={}", session.id)
    );
}

#[googletest::test]
fn cookies_can_be_disabled_altogether() {
    let mut config = SessionConfig::default();
    config.tracking.cookies = false;
    let session = session(SessionTransport::None);
    let propagation = plan(config, &session);

    assert!(propagation.rewrites_urls());
    assert!(propagation.cookie().is_none());
}

#[googletest::test]
fn url_rewriting_can_be_disabled() {
    let mut config = SessionConfig::default();
    config.tracking.url_rewriting = false;
    let session = session(SessionTransport::None);
    let propagation = plan(config, &session);

    assert_eq!(propagation.encode_url("/app/index"), "/app/index");
    assert!(propagation.cookie().is_some());
}

#[googletest::test]
fn a_stale_path_parameter_is_replaced() {
    let session = session(SessionTransport::PathParameter);
    let propagation = plan(SessionConfig::default(), &session);

    assert_eq!(
        propagation.encode_url("/app/index;jsessionid=0123?x=1"),
        format!("/app/index;jsessionid={}?x=1", session.id)
    );
}

#[googletest::test]
fn urls_outside_the_context_are_untouched() {
    let mut config = SessionConfig::default();
    config.cookie.path = Some("/app".into());
    let session = session(SessionTransport::None);
    let propagation = plan(config, &session);

    for url in [
        "https://example.com/app/index",
        "//example.com/app/index",
        "/other/index",
        "/application",
        "#fragment",
        "",
    ] {
        assert_eq!(propagation.encode_url(url), url, "{url} was rewritten");
    }
    assert_eq!(
        propagation.encode_url("/app"),
        format!("/app;jsessionid={}", session.id)
    );
    assert_eq!(
        propagation.encode_url("index.html"),
        format!("index.html;jsessionid={}", session.id)
    );
}

#[googletest::test]
fn rotation_issues_a_cookie_with_the_new_identifier() {
    let session = session(SessionTransport::Cookie);
    let mut propagation = plan(SessionConfig::default(), &session);
    let new_id = SessionId::random();

    propagation.rotated(new_id);

    assert_eq!(propagation.id(), new_id);
    let cookie = propagation.cookie().unwrap();
    expect_that!(cookie.value(), eq(new_id.to_string().as_str()));
}

#[googletest::test]
fn ended_sessions_get_a_removal_cookie() {
    let session = session(SessionTransport::Cookie);
    let mut propagation = plan(SessionConfig::default(), &session);

    propagation.ended();

    assert!(!propagation.rewrites_urls());
    let cookie = propagation.cookie().unwrap();
    expect_that!(cookie.name(), eq("JSESSIONID"));
    expect_that!(cookie.value(), eq(""));
    expect_that!(cookie.path(), some(eq("/")));
}

#[googletest::test]
fn cookie_attributes_follow_the_configuration() {
    let mut config = SessionConfig::default();
    config.cookie.domain = Some("example.com".into());
    config.cookie.path = Some("/app".into());
    config.cookie.secure = false;
    let session = session(SessionTransport::None);
    let propagation = plan(config, &session);

    let cookie = propagation.cookie().unwrap();
    expect_that!(cookie.domain(), some(eq("example.com")));
    expect_that!(cookie.path(), some(eq("/app")));
    expect_that!(cookie.secure(), none());
    expect_that!(cookie.http_only(), some(eq(true)));
}

#[googletest::test]
fn the_cookie_is_injected_as_a_set_cookie_header() {
    let session = session(SessionTransport::None);
    let propagation = plan(SessionConfig::default(), &session);
    let mut headers = HeaderMap::new();

    propagation.inject_cookie(&mut headers, &processor()).unwrap();

    let values: Vec<_> = headers
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect();
    assert_eq!(values.len(), 1);
    assert!(values[0].starts_with(&format!("JSESSIONID={}", session.id)));
    assert!(values[0].contains("HttpOnly"));
}
