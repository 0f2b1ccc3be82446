use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use bytes::Bytes;
use chrono::Utc;
use tower::ServiceExt;

use vaultgate::config::GatewayConfig;
use vaultgate::identity::{InMemoryStorage, Session, SessionDeduplicator, SessionStore, StorageHandle, StorageSessionStore, StoreError};
use vaultgate::memory::{InMemoryGrants, InMemoryVault};
use vaultgate::middleware::{require_session, SessionLayer};
use vaultgate::server::{build_router, AppState};
use vaultgate::vault::{AccessGrant, AccessMode, VaultResource};

const ALICE: &str = "https://id.example/alice#me";

struct Fixture {
    app: Router,
    sid: String,
}

fn encode(url: &str) -> String {
    url.replace(':', "%3A").replace('/', "%2F")
}

fn grant(id: &str, grantee: &str, resources: &[&str], expired: bool) -> AccessGrant {
    AccessGrant {
        id: id.to_string(),
        grantee: grantee.to_string(),
        resources: resources.iter().map(|s| s.to_string()).collect(),
        modes: vec![AccessMode::Read],
        expires_at: Some(if expired { Utc::now() - chrono::Duration::minutes(1) } else { Utc::now() + chrono::Duration::hours(1) }),
    }
}

async fn fixture() -> Fixture {
    let sessions = StorageSessionStore::new(InMemoryStorage::handle());
    let vault = Arc::new(InMemoryVault::new());
    let grants = Arc::new(InMemoryGrants::new());
    vault.insert(VaultResource {
        url: "https://pod.example/notes/todo.txt".into(),
        content_type: "text/plain".into(),
        body: Bytes::from_static(b"buy milk"),
    });
    vault.insert(VaultResource {
        url: "https://pod.example/private/diary.txt".into(),
        content_type: "text/plain".into(),
        body: Bytes::from_static(b"secret"),
    });
    grants.insert(grant("g-ok", ALICE, &["https://pod.example/notes/"], false));
    grants.insert(grant("g-old", ALICE, &["https://pod.example/notes/"], true));
    grants.insert(grant("g-bob", "https://id.example/bob#me", &["https://pod.example/notes/"], false));
    let mut rw = grant("g-rw", ALICE, &["https://pod.example/notes/"], false);
    rw.modes.push(AccessMode::Write);
    grants.insert(rw);

    let sess = sessions.issue(ALICE, None, None).await.unwrap();
    let state = AppState::new(GatewayConfig::default(), sessions, vault, grants);
    Fixture { app: build_router(state), sid: sess.session_id }
}

fn get_req(uri: &str, sid: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().uri(uri);
    if let Some(sid) = sid {
        b = b.header(header::COOKIE, format!("vaultgate_session={sid}"));
    }
    b.body(Body::empty()).unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let f = fixture().await;
    let resp = f.app.oneshot(get_req("/", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "vaultgate ok");
}

#[tokio::test]
async fn session_route_requires_cookie() {
    let f = fixture().await;
    let resp = f.app.clone().oneshot(get_req("/session", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = f.app.oneshot(get_req("/session", Some("unknown"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(body_string(resp).await.contains("no_session"));
}

#[tokio::test]
async fn session_route_returns_session() {
    let f = fixture().await;
    let resp = f.app.oneshot(get_req("/session", Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["webId"], ALICE);
    assert_eq!(v["sessionId"], f.sid.as_str());
    assert_eq!(v["isLoggedIn"], true);
}

#[tokio::test]
async fn resource_read_and_missing() {
    let f = fixture().await;
    let uri = format!("/resources/{}", encode("https://pod.example/notes/todo.txt"));
    let resp = f.app.clone().oneshot(get_req(&uri, Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_string(resp).await, "buy milk");

    let uri = format!("/resources/{}", encode("https://pod.example/notes/none.txt"));
    let resp = f.app.clone().oneshot(get_req(&uri, Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = f.app.oneshot(get_req(&uri, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn grant_checks() {
    let f = fixture().await;
    let cases = [
        ("/grants/g-ok", StatusCode::OK),
        ("/grants/g-old", StatusCode::FORBIDDEN),
        ("/grants/g-bob", StatusCode::FORBIDDEN),
        ("/grants/g-none", StatusCode::NOT_FOUND),
    ];
    for (uri, want) in cases {
        let resp = f.app.clone().oneshot(get_req(uri, Some(&f.sid))).await.unwrap();
        assert_eq!(resp.status(), want, "{uri}");
    }
    let resp = f.app.oneshot(get_req("/grants/g-ok", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn grant_scoped_resource_access() {
    let f = fixture().await;
    let inside = format!("/grants/g-ok/resources/{}", encode("https://pod.example/notes/todo.txt"));
    let resp = f.app.clone().oneshot(get_req(&inside, Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "buy milk");

    let outside = format!("/grants/g-ok/resources/{}", encode("https://pod.example/private/diary.txt"));
    let resp = f.app.clone().oneshot(get_req(&outside, Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let expired = format!("/grants/g-old/resources/{}", encode("https://pod.example/notes/todo.txt"));
    let resp = f.app.oneshot(get_req(&expired, Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_clears_session() {
    let f = fixture().await;
    let req = Request::builder()
        .method("POST")
        .uri("/logout")
        .header(header::COOKIE, format!("vaultgate_session={}", f.sid))
        .body(Body::empty())
        .unwrap();
    let resp = f.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("vaultgate_session=deleted"));

    let resp = f.app.oneshot(get_req("/session", Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

struct SlowFailingStore;

#[async_trait]
impl SessionStore for SlowFailingStore {
    async fn fetch_session_by_id(&self, _id: &str, _storage: Option<StorageHandle>) -> Result<Option<Session>, StoreError> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Err(StoreError::Backend("connection reset".into()))
    }
}

async fn whoami(Extension(session): Extension<Session>) -> impl IntoResponse {
    session.session_id
}

// The request that triggered the fetch sees "no session"; a request that
// joined it sees the failure.
#[tokio::test]
async fn concurrent_requests_on_failing_store_split_401_and_500() {
    let layer = SessionLayer {
        dedup: SessionDeduplicator::new(Arc::new(SlowFailingStore)),
        cookie_name: "sid".into(),
        storage: None,
    };
    let app = Router::new().route("/me", get(whoami)).layer(from_fn_with_state(layer, require_session));
    let req = || Request::builder().uri("/me").header(header::COOKIE, "sid=abc").body(Body::empty()).unwrap();

    let (first, second) = tokio::join!(app.clone().oneshot(req()), app.clone().oneshot(req()));
    assert_eq!(first.unwrap().status(), StatusCode::UNAUTHORIZED);
    let second = second.unwrap();
    assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_string(second).await.contains("session_fetch_failed"));
}

#[tokio::test]
async fn logged_out_session_record_is_rejected() {
    let storage = InMemoryStorage::handle();
    let sessions = StorageSessionStore::new(storage);
    let sess = Session { session_id: "half".into(), web_id: Some(ALICE.into()), is_logged_in: false, client_id: None, expires_at: None };
    sessions.save(&sess, None).await.unwrap();
    let layer = SessionLayer { dedup: SessionDeduplicator::new(Arc::new(sessions)), cookie_name: "sid".into(), storage: None };
    let app = Router::new().route("/me", get(whoami)).layer(from_fn_with_state(layer, require_session));
    let req = Request::builder().uri("/me").header(header::COOKIE, "sid=half").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

fn put_req(uri: &str, sid: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::COOKIE, format!("vaultgate_session={sid}"))
        .header(header::CONTENT_TYPE, "text/markdown")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn resource_write_then_read() {
    let f = fixture().await;
    let uri = format!("/resources/{}", encode("https://pod.example/notes/plan.md"));
    let resp = f.app.clone().oneshot(put_req(&uri, &f.sid, "# plan")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = f.app.clone().oneshot(get_req(&uri, Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/markdown");
    assert_eq!(body_string(resp).await, "# plan");

    let req = Request::builder().method("PUT").uri(&uri).body(Body::from("x")).unwrap();
    assert_eq!(f.app.oneshot(req).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn grant_scoped_write_needs_write_mode() {
    let f = fixture().await;
    let todo = encode("https://pod.example/notes/todo.txt");

    let read_only = format!("/grants/g-ok/resources/{todo}");
    let resp = f.app.clone().oneshot(put_req(&read_only, &f.sid, "sell milk")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let outside = format!("/grants/g-rw/resources/{}", encode("https://pod.example/private/diary.txt"));
    let resp = f.app.clone().oneshot(put_req(&outside, &f.sid, "overwritten")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let writable = format!("/grants/g-rw/resources/{todo}");
    let resp = f.app.clone().oneshot(put_req(&writable, &f.sid, "sell milk")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = f.app.oneshot(get_req(&writable, Some(&f.sid))).await.unwrap();
    assert_eq!(body_string(resp).await, "sell milk");
}

#[tokio::test]
async fn renew_rotates_session_cookie() {
    let f = fixture().await;
    let req = Request::builder()
        .method("POST")
        .uri("/session/renew")
        .header(header::COOKIE, format!("vaultgate_session={}", f.sid))
        .body(Body::empty())
        .unwrap();
    let resp = f.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.contains("HttpOnly; Secure; SameSite=Strict"));
    let new_sid = cookie
        .strip_prefix("vaultgate_session=")
        .and_then(|rest| rest.split(';').next())
        .unwrap()
        .to_string();
    assert_ne!(new_sid, f.sid);

    let resp = f.app.clone().oneshot(get_req("/session", Some(&new_sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["webId"], ALICE);

    let resp = f.app.oneshot(get_req("/session", Some(&f.sid))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// Session records kept in the configured override storage, not the store's default.
#[tokio::test]
async fn session_lookup_uses_configured_storage() {
    let sessions = StorageSessionStore::new(InMemoryStorage::handle());
    let tenant = InMemoryStorage::handle();
    let sess = sessions.issue(ALICE, None, Some(tenant.clone())).await.unwrap();
    let state = AppState::new(
        GatewayConfig::default(),
        sessions,
        Arc::new(InMemoryVault::new()),
        Arc::new(InMemoryGrants::new()),
    );

    let plain = build_router(state.clone());
    let resp = plain.oneshot(get_req("/session", Some(&sess.session_id))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let app = build_router(state.with_session_storage(tenant.clone()));
    let resp = app.oneshot(get_req("/session", Some(&sess.session_id))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["sessionId"], sess.session_id.as_str());
}
