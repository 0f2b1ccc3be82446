//!
//! vaultgate HTTP server
//! ---------------------
//! Axum router wiring the identity and vault middleware onto routes.
//!
//! Responsibilities:
//! - Session resolution through the deduplicating session lookup.
//! - Access-grant checks on grant-scoped routes.
//! - Vault resource reads and writes on behalf of the session.
//! - Session renewal (reissues the session under a fresh id).
//! - Logout (drops the stored session record and clears the cookie).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{FromRef, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{InMemoryStorage, Session, SessionDeduplicator, StorageHandle, StorageSessionStore};
use crate::memory::{InMemoryGrants, InMemoryVault};
use crate::middleware::{
    clear_session_cookie, fetch_resource, require_access_grant, require_session, session_cookie, store_resource, AccessLayer,
    ResourceLayer, SessionLayer,
};
use crate::vault::{AccessGrant, SharedGrants, SharedVault};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub sessions: StorageSessionStore,
    pub dedup: SessionDeduplicator,
    /// Storage override for session lookups; `None` uses the store's default.
    pub session_storage: Option<StorageHandle>,
    pub vault: SharedVault,
    pub grants: SharedGrants,
}

impl AppState {
    pub fn new(config: GatewayConfig, sessions: StorageSessionStore, vault: SharedVault, grants: SharedGrants) -> Self {
        let dedup = SessionDeduplicator::new(Arc::new(sessions.clone()));
        Self { config: Arc::new(config), sessions, dedup, session_storage: None, vault, grants }
    }

    /// State backed entirely by process-local storage.
    pub fn in_memory(config: GatewayConfig) -> Self {
        Self::new(
            config,
            StorageSessionStore::new(InMemoryStorage::handle()),
            Arc::new(InMemoryVault::new()),
            Arc::new(InMemoryGrants::new()),
        )
    }

    /// Read and write session records through `storage` instead of the
    /// store's default storage.
    pub fn with_session_storage(mut self, storage: StorageHandle) -> Self {
        self.session_storage = Some(storage);
        self
    }

    pub fn session_layer(&self) -> SessionLayer {
        SessionLayer {
            dedup: self.dedup.clone(),
            cookie_name: self.config.session_cookie.clone(),
            storage: self.session_storage.clone(),
        }
    }

    pub fn access_layer(&self) -> AccessLayer {
        AccessLayer { grants: self.grants.clone(), param_key: self.config.grant_param.clone() }
    }
}

impl FromRef<AppState> for ResourceLayer {
    fn from_ref(state: &AppState) -> Self {
        ResourceLayer { vault: state.vault.clone(), param_key: state.config.resource_param.clone() }
    }
}

/// Build the router. Path parameter names come from the configuration.
pub fn build_router(state: AppState) -> Router {
    let session = from_fn_with_state(state.session_layer(), require_session);
    let access = from_fn_with_state(state.access_layer(), require_access_grant);
    let grant_seg = format!("{{{}}}", state.config.grant_param);
    let resource_seg = format!("{{{}}}", state.config.resource_param);

    Router::new()
        .route("/", get(|| async { "vaultgate ok" }))
        .route("/session", get(session_info).route_layer(session.clone()))
        .route("/session/renew", post(renew_session).route_layer(session.clone()))
        .route("/logout", post(logout).route_layer(session.clone()))
        .route(
            &format!("/grants/{grant_seg}"),
            get(grant_info).route_layer(access.clone()).route_layer(session.clone()),
        )
        .route(
            &format!("/resources/{resource_seg}"),
            get(fetch_resource).put(store_resource).route_layer(session.clone()),
        )
        .route(
            &format!("/grants/{grant_seg}/resources/{resource_seg}"),
            get(fetch_resource).put(store_resource).route_layer(access).route_layer(session),
        )
        .with_state(state)
}

fn log_startup(config: &GatewayConfig) {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "vaultgate starting: RUST_LOG='{}', listen={}, session_cookie='{}', secure_cookie={}, grant_param='{}', resource_param='{}'",
        rust_log, config.listen_addr(), config.session_cookie, config.secure_cookie, config.grant_param, config.resource_param
    );
}

/// Serve `state` on the configured address until the listener fails.
pub async fn run_with_state(state: AppState) -> anyhow::Result<()> {
    log_startup(&state.config);
    let addr: SocketAddr = state
        .config
        .listen_addr()
        .parse()
        .with_context(|| format!("invalid listen address: {}", state.config.listen_addr()))?;
    let app = build_router(state);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Convenience entry point with process-local collaborators.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    run_with_state(AppState::in_memory(config)).await
}

async fn session_info(Extension(session): Extension<Session>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessionId": session.session_id,
        "webId": session.web_id,
        "isLoggedIn": session.is_logged_in,
        "expiresAt": session.expires_at,
    }))
}

async fn grant_info(Extension(grant): Extension<AccessGrant>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "grant": grant }))
}

// Reissue the current session under a fresh id and retire the old record.
async fn renew_session(State(state): State<AppState>, Extension(session): Extension<Session>) -> AppResult<impl IntoResponse> {
    let Some(web_id) = session.web_id.as_deref() else {
        return Err(AppError::auth("no_web_id", "session has no web id"));
    };
    let renewed = state.sessions.issue(web_id, session.client_id.clone(), state.session_storage.clone()).await?;
    state.sessions.remove(&session.session_id, state.session_storage.clone()).await?;
    info!(target: "session", web_id, "session renewed");
    let cookie = session_cookie(&state.config.session_cookie, &renewed.session_id, state.config.secure_cookie)
        .map_err(|e| AppError::internal("cookie".to_string(), e.to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert("Set-Cookie", cookie);
    Ok((StatusCode::OK, headers, Json(serde_json::json!({ "status": "ok", "expiresAt": renewed.expires_at }))))
}

async fn logout(State(state): State<AppState>, Extension(session): Extension<Session>) -> AppResult<impl IntoResponse> {
    let removed = state.sessions.remove(&session.session_id, state.session_storage.clone()).await?;
    info!(target: "session", web_id = ?session.web_id, removed, "logout");
    let cookie = clear_session_cookie(&state.config.session_cookie, state.config.secure_cookie)
        .map_err(|e| AppError::internal("cookie".to_string(), e.to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert("Set-Cookie", cookie);
    Ok((StatusCode::OK, headers, Json(serde_json::json!({"status":"ok"}))))
}
