//! Identifiers are picked up from the request, whatever channel they travel on.
use gatehouse_session::{IncomingSession, SessionConfig, SessionId};
use googletest::{assert_that, prelude::eq};
use http::HeaderMap;

use crate::fixtures::{cookie_headers, processor};

#[test]
fn the_session_cookie_is_extracted() {
    let config = SessionConfig::default();
    let id = SessionId::random();
    let headers = cookie_headers(&config, &id.to_string());

    let incoming = IncomingSession::extract(&headers, "/app/index", &config, &processor());

    assert_that!(incoming.cookie(), eq(Some(id)));
    assert_that!(incoming.path_parameter(), eq(None));
}

#[test]
fn the_path_parameter_is_extracted() {
    let config = SessionConfig::default();
    let id = SessionId::random();
    let path = format!("/app/index;jsessionid={id}");

    let incoming = IncomingSession::extract(&HeaderMap::new(), &path, &config, &processor());

    assert_that!(incoming.cookie(), eq(None));
    assert_that!(incoming.path_parameter(), eq(Some(id)));
}

#[test]
fn the_cookie_is_ignored_when_cookie_tracking_is_disabled() {
    let mut config = SessionConfig::default();
    config.tracking.cookies = false;
    let id = SessionId::random();
    let headers = cookie_headers(&config, &id.to_string());

    let incoming = IncomingSession::extract(&headers, "/app/index", &config, &processor());

    assert!(incoming.is_empty());
}

#[test]
fn a_custom_cookie_name_is_honoured() {
    let mut config = SessionConfig::default();
    config.cookie.name = "SID".into();
    let id = SessionId::random();
    let headers = cookie_headers(&config, &id.to_string());

    let incoming = IncomingSession::extract(&headers, "/", &config, &processor());

    assert_that!(incoming.cookie(), eq(Some(id)));
}

#[test]
fn malformed_identifiers_are_treated_as_absent() {
    let config = SessionConfig::default();
    let headers = cookie_headers(&config, "not-a-session-id");

    let incoming =
        IncomingSession::extract(&headers, "/app;jsessionid=XYZ/index", &config, &processor());

    assert!(incoming.is_empty());
}

#[test]
fn the_cookie_comes_first_and_duplicates_are_collapsed() {
    let (a, b) = (SessionId::random(), SessionId::random());

    let both = IncomingSession::from_parts(Some(a), Some(b));
    let order: Vec<_> = both.candidates().map(|(id, _)| id).collect();
    assert_eq!(order, vec![a, b]);

    let same = IncomingSession::from_parts(Some(a), Some(a));
    assert_eq!(same.candidates().count(), 1);
}
