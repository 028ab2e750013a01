use std::time::Duration;

use client::{FormAuthClient, body, form_action, is_challenge, location, session_cookie};
use fixtures::{authenticator, authenticator_with_store, config};
use gatehouse_session::{SessionId, SessionStore};
use gatehouse_session_memory_store::InMemorySessionStore;
use gatehouse_session::config::InactivityTimeout;
use googletest::{
    assert_that,
    prelude::{contains_substring, eq, not, starts_with},
};
use http::{Method, StatusCode};

mod fixtures;

#[tokio::test]
async fn protected_requests_are_challenged_and_saved() {
    let auth = authenticator(config());
    let mut client = FormAuthClient::new(auth.clone());

    let response = client.get("/protected/index.jsp?role=bar").await;

    assert!(is_challenge(&response));
    let id: SessionId = client.cookie.as_deref().unwrap().parse().unwrap();
    // The client hasn't proven it returns cookies yet: the action carries the identifier too.
    assert_that!(
        form_action(&response),
        eq(&format!("/protected/j_security_check;jsessionid={id}"))
    );
    let record = auth.store().load(&id).await.unwrap().unwrap();
    assert!(!record.is_authenticated());
    let saved = gatehouse::saved_request::SavedRequestCache::saved_in(&record).unwrap();
    assert_that!(saved.uri.as_str(), eq("/protected/index.jsp?role=bar"));
    assert_that!(saved.method.as_str(), eq("GET"));
}

#[tokio::test]
async fn login_with_cookies() {
    let auth = authenticator(config());
    let mut client = FormAuthClient::new(auth.clone());

    let challenge = client.get("/protected/index.jsp?role=bar").await;
    let challenged_id = client.cookie.clone().unwrap();
    let redirect = client
        .login(&form_action(&challenge), "tomcat", "tomcat")
        .await;

    assert_that!(redirect.status(), eq(StatusCode::SEE_OTHER));
    assert_that!(location(&redirect), eq("/protected/index.jsp?role=bar"));
    // The identifier was rotated and the old one is dead.
    let authenticated_id = client.cookie.clone().unwrap();
    assert_ne!(authenticated_id, challenged_id);
    let old_id: SessionId = challenged_id.parse().unwrap();
    assert!(auth.store().load(&old_id).await.unwrap().is_none());

    let resource = client.get(&location(&redirect)).await;
    assert_that!(resource.status(), eq(StatusCode::OK));
    assert_that!(
        body(&resource),
        eq("OK GET /protected/index.jsp?role=bar user=tomcat body=")
    );
    assert_eq!(resource.headers()["cache-control"], "private");
    assert_eq!(resource.headers()["expires"], "Thu, 01 Jan 1970 00:00:00 GMT");
    assert!(session_cookie(&resource).is_none());
}

#[tokio::test]
async fn repeated_access_never_triggers_the_challenge_again() {
    let auth = authenticator(config());
    let mut client = FormAuthClient::new(auth);

    let first = client
        .login_to("/protected/index.jsp?role=bar", "tomcat", "tomcat")
        .await;
    assert_that!(body(&first), starts_with("OK GET /protected/index.jsp?role=bar"));

    for _ in 0..3 {
        let again = client.get("/protected/index.jsp?role=bar").await;
        assert_that!(again.status(), eq(StatusCode::OK));
        assert_that!(
            body(&again),
            eq("OK GET /protected/index.jsp?role=bar user=tomcat body=")
        );
    }
}

#[tokio::test]
async fn clients_without_cookies_are_tracked_through_the_url() {
    let auth = authenticator(config());
    let mut client = FormAuthClient::new(auth.clone()).without_cookies();

    let challenge = client.get("/protected/index.jsp?role=bar").await;
    let action = form_action(&challenge);
    assert_that!(action, starts_with("/protected/j_security_check;jsessionid="));

    let redirect = client.login(&action, "tomcat", "tomcat").await;
    let location = location(&redirect);
    assert_that!(location, starts_with("/protected/index.jsp;jsessionid="));
    assert_that!(location, contains_substring("?role=bar"));
    // The identifier in the redirect is the rotated one.
    assert_that!(location, not(contains_substring(action.split('=').nth(1).unwrap())));

    let resource = client.get(&location).await;
    assert_that!(
        body(&resource),
        eq("OK GET /protected/index.jsp?role=bar user=tomcat body=")
    );
    // Keep going with the identifier in the URL only.
    let again = client.get(&location).await;
    assert_that!(again.status(), eq(StatusCode::OK));
    assert!(!is_challenge(&again));
}

#[tokio::test]
async fn server_side_cookies_can_be_disabled() {
    let mut config = config();
    config.session.tracking.cookies = false;
    let mut client = FormAuthClient::new(authenticator(config));

    let challenge = client.get("/protected/index.jsp").await;
    assert!(session_cookie(&challenge).is_none());
    let action = form_action(&challenge);
    assert_that!(action, starts_with("/protected/j_security_check;jsessionid="));

    let redirect = client.login(&action, "tomcat", "tomcat").await;
    assert!(session_cookie(&redirect).is_none());
    let resource = client.get(&location(&redirect)).await;
    assert_that!(body(&resource), eq("OK GET /protected/index.jsp user=tomcat body="));
    assert!(client.cookie.is_none());
}

#[tokio::test]
async fn fixation_protection_can_be_disabled() {
    let mut config = config();
    config.login.change_session_id_on_authentication = false;
    let auth = authenticator(config);
    let mut client = FormAuthClient::new(auth.clone());

    let challenge = client.get("/protected/index.jsp").await;
    let challenged_id = client.cookie.clone().unwrap();
    let redirect = client
        .login(&form_action(&challenge), "tomcat", "tomcat")
        .await;

    assert!(session_cookie(&redirect).is_none());
    assert_that!(client.cookie.as_deref(), eq(Some(challenged_id.as_str())));
    let id: SessionId = challenged_id.parse().unwrap();
    assert!(auth.store().load(&id).await.unwrap().unwrap().is_authenticated());
    let resource = client.get(&location(&redirect)).await;
    assert_that!(resource.status(), eq(StatusCode::OK));
}

#[tokio::test]
async fn fixation_protection_also_covers_cookieless_clients() {
    let mut config = config();
    config.login.change_session_id_on_authentication = false;
    let mut client = FormAuthClient::new(authenticator(config)).without_cookies();

    let challenge = client.get("/protected/index.jsp").await;
    let action = form_action(&challenge);
    let redirect = client.login(&action, "tomcat", "tomcat").await;

    let challenged = action.split_once(";jsessionid=").unwrap().1;
    let redirected = location(&redirect);
    assert_that!(
        redirected,
        eq(&format!("/protected/index.jsp;jsessionid={challenged}"))
    );
}

#[tokio::test]
async fn http_10_clients_are_redirected_with_a_302() {
    let mut client = FormAuthClient::new(authenticator(config())).http_10();

    let challenge = client.get("/protected/index.jsp").await;
    let redirect = client
        .login(&form_action(&challenge), "tomcat", "tomcat")
        .await;

    assert_that!(redirect.status(), eq(StatusCode::FOUND));
    let resource = client.get(&location(&redirect)).await;
    assert_that!(resource.status(), eq(StatusCode::OK));
}

#[tokio::test]
async fn protection_can_target_specific_methods() {
    let auth = authenticator(config());

    // GET and POST on `/test` are public.
    let mut anonymous = FormAuthClient::new(auth.clone());
    let get = anonymous.get("/test?TestParam=TestValue").await;
    assert_that!(body(&get), eq("OK GET /test?TestParam=TestValue user=- body="));
    let post = anonymous
        .send(Method::POST, "/test", Some(("text/plain", "hello")))
        .await;
    assert_that!(body(&post), eq("OK POST /test user=- body=hello"));
    assert!(anonymous.cookie.is_none());

    // PUT is not.
    let mut client = FormAuthClient::new(auth);
    let challenge = client
        .send(
            Method::PUT,
            "/test?TestParam=TestValue",
            Some(("text/plain", "payload")),
        )
        .await;
    assert!(is_challenge(&challenge));

    // The credential submission and the follow-up GET are public taken individually,
    // yet they complete the dialogue.
    let redirect = client
        .login(&form_action(&challenge), "tomcat", "tomcat")
        .await;
    assert_that!(location(&redirect), eq("/test?TestParam=TestValue"));
    let replayed = client.get(&location(&redirect)).await;
    assert_that!(
        body(&replayed),
        eq("OK PUT /test?TestParam=TestValue user=tomcat body=payload")
    );

    // The saved request is gone: the next GET is just a GET.
    let get = client.get("/test?TestParam=TestValue").await;
    assert_that!(
        body(&get),
        eq("OK GET /test?TestParam=TestValue user=tomcat body=")
    );
    let put = client.send(Method::PUT, "/test", Some(("text/plain", "again"))).await;
    assert_that!(body(&put), eq("OK PUT /test user=tomcat body=again"));
}

#[tokio::test]
async fn path_parameters_do_not_hide_protected_resources() {
    let auth = authenticator(config());

    let mut client = FormAuthClient::new(auth.clone());
    let put = client
        .send(Method::PUT, "/test;x=1", Some(("text/plain", "payload")))
        .await;
    assert!(is_challenge(&put));

    let mut client = FormAuthClient::new(auth.clone());
    let nested = client.get("/protected;x=1/index.jsp").await;
    assert!(is_challenge(&nested));

    let mut client = FormAuthClient::new(auth);
    let closed = client.get("/closed;a=b/secret;c=d").await;
    assert!(is_challenge(&closed));
}

#[tokio::test]
async fn the_saved_request_is_replayed_whatever_path_parameters_come_back() {
    let mut client = FormAuthClient::new(authenticator(config()));

    let challenge = client
        .send(Method::PUT, "/test;x=1", Some(("text/plain", "payload")))
        .await;
    client
        .login(&form_action(&challenge), "tomcat", "tomcat")
        .await;
    let replayed = client.get("/test;y=2").await;

    assert_that!(
        body(&replayed),
        eq("OK PUT /test;x=1 user=tomcat body=payload")
    );
}

#[tokio::test]
async fn the_last_interrupted_request_wins() {
    let mut client = FormAuthClient::new(authenticator(config()));

    client.get("/protected/first").await;
    let challenge = client.get("/protected/second").await;
    let redirect = client
        .login(&form_action(&challenge), "tomcat", "tomcat")
        .await;

    assert_that!(location(&redirect), eq("/protected/second"));
}

#[tokio::test]
async fn expired_sessions_are_challenged_again() {
    let mut config = config();
    config.session.state.max_inactive_interval = InactivityTimeout::After(Duration::from_millis(200));
    let mut client = FormAuthClient::new(authenticator(config));

    let resource = client.login_to("/protected/index.jsp", "tomcat", "tomcat").await;
    assert_that!(resource.status(), eq(StatusCode::OK));

    tokio::time::sleep(Duration::from_millis(400)).await;

    let after_expiry = client.get("/protected/index.jsp").await;
    assert!(is_challenge(&after_expiry));
}

#[tokio::test]
async fn expired_sessions_are_swept_in_the_background() {
    let mut config = config();
    config.session.state.max_inactive_interval = InactivityTimeout::After(Duration::from_millis(30));
    config.session.state.sweep_period = Duration::from_millis(20);
    let backend = InMemorySessionStore::default();
    let auth = authenticator_with_store(config, SessionStore::new(backend.clone()));
    let mut client = FormAuthClient::new(auth.clone());
    client.get("/protected/index.jsp").await;
    assert_eq!(backend.len().await, 1);

    let sweeper = auth.spawn_expiry_sweeper();
    tokio::time::sleep(Duration::from_millis(200)).await;
    sweeper.abort();

    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn unprotected_requests_keep_the_session() {
    let mut client = FormAuthClient::new(authenticator(config()));
    client.login_to("/protected/index.jsp", "tomcat", "tomcat").await;

    let public = client.get("/public/page").await;

    assert_that!(body(&public), eq("OK GET /public/page user=tomcat body="));
    assert!(public.headers().get("cache-control").is_none());
}

#[tokio::test]
async fn the_challenge_can_redirect_to_the_login_page() {
    let mut config = config();
    config.login.challenge = gatehouse::config::ChallengeStyle::Redirect;
    config.login.login_page = "/login.html".into();
    let mut client = FormAuthClient::new(authenticator(config)).without_cookies();

    let challenge = client.get("/protected/index.jsp").await;

    assert_that!(challenge.status(), eq(StatusCode::SEE_OTHER));
    let login_page = location(&challenge);
    assert_that!(login_page, starts_with("/login.html;jsessionid="));
    // The login page itself is never challenged.
    let page = client.get(&login_page).await;
    assert_that!(body(&page), starts_with("OK GET /login.html"));
}

#[tokio::test]
async fn logout_destroys_the_session() {
    let auth = authenticator(config());
    let mut client = FormAuthClient::new(auth.clone());
    client.login_to("/protected/index.jsp", "tomcat", "tomcat").await;
    let id: SessionId = client.cookie.as_deref().unwrap().parse().unwrap();

    let head = gatehouse::RequestHead {
        method: Method::POST,
        target: "/logout".parse().unwrap(),
        version: http::Version::HTTP_11,
        headers: {
            let mut headers = http::HeaderMap::new();
            headers.insert("cookie", format!("JSESSIONID={id}").parse().unwrap());
            headers
        },
    };
    let outbound = auth.logout(&head).await.unwrap();
    let mut response = gatehouse::Response::new(bytes::Bytes::new());
    outbound.finalize(&mut response).unwrap();

    let removal = session_cookie(&response);
    assert_that!(removal.as_deref(), eq(Some("")));
    assert!(auth.store().load(&id).await.unwrap().is_none());
    let after_logout = client.get("/protected/index.jsp").await;
    assert!(is_challenge(&after_logout));
}
