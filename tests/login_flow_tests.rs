//! End-to-end login flow tests
//!
//! Drives the full router in-process (`tower::ServiceExt::oneshot`) against
//! wiremock stand-ins for the identity provider and the upstream service:
//! - Anonymous request → redirect to IdP with a parked request
//! - Callback with a valid code → session cookie + resumed request
//! - Rejected code → no session, parked request kept
//! - Expired / forged sessions → treated as anonymous
//! - Redirect resume mode and missing-entry fallback

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use auth_gateway::config::{Config, ResumeMode};
use auth_gateway::gateway::{AuthGateway, create_router};
use auth_gateway::secrets::SecretString;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION_SECRET: &str = "integration-test-secret-0123456789abcdef";

struct Harness {
    idp: MockServer,
    upstream: MockServer,
    gateway: Arc<AuthGateway>,
    router: Router,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let idp = MockServer::start().await;
        let upstream = MockServer::start().await;

        let mut config = Config::default();
        config.idp.domain = idp.uri();
        config.idp.client_id = "client-123".to_string();
        config.idp.client_secret = SecretString::new("client-secret");
        config.idp.redirect_uri = "https://app.example.com/callback".to_string();
        config.upstream.url = Some(upstream.uri());
        config.upstream.timeout = Duration::from_secs(5);
        config.session.secret = SecretString::new(SESSION_SECRET);
        customize(&mut config);
        config.validate().expect("test config must be valid");

        let gateway = Arc::new(AuthGateway::from_config(&config).unwrap());
        let router = create_router(Arc::clone(&gateway));

        Self {
            idp,
            upstream,
            gateway,
            router,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn get_with_cookie(&self, uri: &str, cookie: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn mount_token_endpoint(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
            })))
            .mount(&self.idp)
            .await;
    }

    async fn mount_upstream(&self, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.upstream)
            .await;
    }

    /// Start a login for `uri` and return the state token from the redirect
    async fn start_login(&self, uri: &str) -> String {
        let response = self.get(uri).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        state_from_location(&response)
    }
}

fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("Location header")
        .to_str()
        .unwrap()
}

fn state_from_location(response: &Response<Body>) -> String {
    Url::parse(location(response))
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state parameter")
}

fn set_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string())
}

/// `name=value` part of a Set-Cookie header, usable as a Cookie header
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Redirect to the identity provider
// ============================================================================

#[tokio::test]
async fn anonymous_request_redirects_to_authorize_endpoint() {
    // GIVEN: a gateway with nothing in front of it
    let h = Harness::start().await;

    // WHEN: an anonymous browser asks for /dashboard
    let response = h.get("/dashboard").await;

    // THEN: 303 to {idp}/authorize with the OAuth parameters
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let url = Url::parse(location(&response)).unwrap();
    assert!(url.as_str().starts_with(&format!("{}/authorize?", h.idp.uri())));

    let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["client_id"], "client-123");
    assert_eq!(query["redirect_uri"], "https://app.example.com/callback");

    // AND: the state token is parked in the cache
    assert!(h.gateway.pending().contains(&query["state"]));
    assert!(set_cookie(&response).is_none());
    assert!(h.upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_redirects_get_distinct_state_tokens() {
    let h = Harness::start().await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10_000 {
        let router = h.router.clone();
        tasks.spawn(async move {
            let request = Request::builder()
                .uri(format!("/page/{i}"))
                .body(Body::empty())
                .unwrap();
            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            state_from_location(&response)
        });
    }

    let mut states = HashSet::new();
    while let Some(state) = tasks.join_next().await {
        states.insert(state.unwrap());
    }

    assert_eq!(states.len(), 10_000);
    assert_eq!(h.gateway.pending().len(), 10_000);
}

// ============================================================================
// Callback handling
// ============================================================================

#[tokio::test]
async fn end_to_end_login_resumes_original_request() {
    // GIVEN: an IdP that accepts code XYZ and an upstream serving /dashboard
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({
            "grant_type": "authorization_code",
            "client_id": "client-123",
            "client_secret": "client-secret",
            "code": "XYZ",
            "redirect_uri": "https://app.example.com/callback",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "at"})))
        .expect(1)
        .mount(&h.idp)
        .await;
    h.mount_upstream("/dashboard", "dashboard contents").await;

    // WHEN: the browser starts at /dashboard and comes back from the IdP
    let state = h.start_login("/dashboard").await;
    let response = h.get(&format!("/callback?code=XYZ&state={state}")).await;

    // THEN: the session cookie is set with the configured lifetime
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response).expect("session cookie");
    assert!(cookie.starts_with("gateway-session="));
    assert!(cookie.contains("Max-Age=3600"));
    assert!(cookie.contains("HttpOnly"));

    // AND: the original request was forwarded and its response returned
    assert_eq!(body_text(response).await, "dashboard contents");
    let received = h.upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].url.path(), "/dashboard");

    // AND: the parked entry is consumed
    assert!(!h.gateway.pending().contains(&state));

    // AND: the cookie authenticates follow-up requests without the IdP
    let response = h.get_with_cookie("/dashboard", &cookie_pair(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).is_none());
}

#[tokio::test]
async fn original_query_string_is_preserved() {
    let h = Harness::start().await;
    h.mount_token_endpoint(200).await;
    Mock::given(method("GET"))
        .and(path("/reports"))
        .and(query_param("year", "2024"))
        .respond_with(ResponseTemplate::new(200).set_body_string("2024 report"))
        .expect(1)
        .mount(&h.upstream)
        .await;

    let state = h.start_login("/reports?year=2024").await;
    let response = h.get(&format!("/callback?code=XYZ&state={state}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "2024 report");
}

#[tokio::test]
async fn rejected_code_sets_no_session_and_keeps_entry() {
    for status in [401u16, 403, 500] {
        // GIVEN: an IdP that refuses the code
        let h = Harness::start().await;
        h.mount_token_endpoint(status).await;
        let state = h.start_login("/dashboard").await;

        // WHEN: the callback arrives
        let response = h.get(&format!("/callback?code=BAD&state={state}")).await;

        // THEN: error response, no cookie, nothing forwarded, entry kept
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "IdP status {status}");
        assert!(set_cookie(&response).is_none());
        assert!(h.upstream.received_requests().await.unwrap().is_empty());
        assert!(h.gateway.pending().contains(&state));
    }
}

#[tokio::test]
async fn unreachable_idp_is_bad_gateway() {
    let h = Harness::start_with(|config| {
        config.idp.domain = "http://127.0.0.1:9".to_string();
    })
    .await;
    let state = h.start_login("/dashboard").await;

    let response = h.get(&format!("/callback?code=XYZ&state={state}")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(set_cookie(&response).is_none());
    assert!(h.gateway.pending().contains(&state));
}

#[tokio::test]
async fn unknown_state_forwards_the_callback_request() {
    let h = Harness::start().await;
    h.mount_token_endpoint(200).await;
    h.mount_upstream("/callback", "callback page").await;

    let response = h.get("/callback?code=XYZ&state=never-issued").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).is_some());
    assert_eq!(body_text(response).await, "callback page");
}

#[tokio::test]
async fn state_token_is_single_use() {
    let h = Harness::start().await;
    h.mount_token_endpoint(200).await;
    h.mount_upstream("/dashboard", "dashboard").await;
    h.mount_upstream("/callback", "callback page").await;

    let state = h.start_login("/dashboard").await;
    let first = h.get(&format!("/callback?code=A&state={state}")).await;
    let second = h.get(&format!("/callback?code=B&state={state}")).await;

    assert_eq!(body_text(first).await, "dashboard");
    // Second use finds no entry and falls back to forwarding the callback
    assert_eq!(body_text(second).await, "callback page");
}

#[tokio::test]
async fn redirect_resume_mode_sends_browser_back() {
    let h = Harness::start_with(|config| config.pending.resume = ResumeMode::Redirect).await;
    h.mount_token_endpoint(200).await;

    let state = h.start_login("/dashboard?tab=2").await;
    let response = h.get(&format!("/callback?code=XYZ&state={state}")).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/dashboard?tab=2");
    assert!(set_cookie(&response).is_some());
    assert!(h.upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn idp_error_callback_returns_401_instead_of_looping() {
    let h = Harness::start().await;
    let state = h.start_login("/dashboard").await;

    let response = h
        .get(&format!(
            "/callback?error=access_denied&error_description=User%20cancelled&state={state}"
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::LOCATION).is_none());
    assert!(!h.gateway.pending().contains(&state));
    assert!(body_text(response).await.contains("User cancelled"));
}

#[tokio::test]
async fn error_parameter_with_unissued_state_still_redirects() {
    // GIVEN: no login in progress
    let h = Harness::start().await;

    // WHEN: an anonymous page happens to use `error` and `state` itself
    let response = h.get("/search?error=none&state=anything").await;

    // THEN: it is sent to the IdP like any other anonymous request
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with(&format!("{}/authorize?", h.idp.uri())));
    let state = state_from_location(&response);
    assert_ne!(state, "anything");
    assert!(h.gateway.pending().contains(&state));
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn expired_session_redirects_again() {
    // GIVEN: one-second sessions and a completed login
    let h = Harness::start_with(|config| config.session.timeout = Duration::from_secs(1)).await;
    h.mount_token_endpoint(200).await;
    h.mount_upstream("/dashboard", "dashboard").await;
    let state = h.start_login("/dashboard").await;
    let response = h.get(&format!("/callback?code=XYZ&state={state}")).await;
    let cookie = cookie_pair(&set_cookie(&response).unwrap());

    // WHEN: the session outlives its timeout
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let response = h.get_with_cookie("/dashboard", &cookie).await;

    // THEN: back to the IdP
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).contains("/authorize?"));
}

#[tokio::test]
async fn cookie_signed_with_another_secret_is_rejected() {
    let h = Harness::start().await;
    let other = Harness::start_with(|config| {
        config.session.secret = SecretString::new("a-completely-different-secret-value-42");
    })
    .await;
    other.mount_token_endpoint(200).await;
    other.mount_upstream("/callback", "ok").await;

    let response = other.get("/callback?code=XYZ").await;
    let foreign_cookie = cookie_pair(&set_cookie(&response).unwrap());

    let response = h.get_with_cookie("/dashboard", &foreign_cookie).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn public_paths_bypass_login() {
    let h = Harness::start_with(|config| config.session.public_paths = vec!["/health".into()]).await;
    h.mount_upstream("/health", "ok").await;

    let response = h.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
    assert!(h.gateway.pending().is_empty());
}

#[tokio::test]
async fn upstream_down_is_bad_gateway() {
    let h = Harness::start_with(|config| {
        config.upstream.url = Some("http://127.0.0.1:9".to_string());
        config.session.public_paths = vec!["/".into()];
    })
    .await;

    let response = h.get("/anything").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let h = Harness::start_with(|config| {
        config.server.max_body_size = 8;
        config.session.public_paths = vec!["/upload".into()];
    })
    .await;

    let response = h
        .send(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(header::CONTENT_LENGTH, "32")
                .body(Body::from(vec![b'x'; 32]))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.upstream.received_requests().await.unwrap().is_empty());
}
