use std::collections::HashMap;

use axum::body::to_bytes;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::error::AppError;
use crate::identity::Session;
use crate::vault::{AccessGrant, AccessMode, SharedVault, VaultResource};

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// State for [`fetch_resource`].
#[derive(Clone)]
pub struct ResourceLayer {
    pub vault: SharedVault,
    /// Route path parameter holding the (percent-encoded) resource URL.
    pub param_key: String,
}

/// Read the vault resource named by the configured path parameter on behalf of
/// the request's session. When an access grant is attached, the resource must
/// fall within it and the grant must allow reads.
pub async fn fetch_resource(
    State(layer): State<ResourceLayer>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Result<Response, AppError> {
    let Some(url) = params.get(&layer.param_key).filter(|u| !u.is_empty()) else {
        return Err(AppError::user("missing_resource", "resource url missing from path"));
    };
    let Some(session) = request.extensions().get::<Session>().cloned() else {
        return Err(AppError::auth("no_session", "login required"));
    };
    if let Some(grant) = request.extensions().get::<AccessGrant>() {
        if !grant.covers(url) || !grant.allows(AccessMode::Read) {
            return Err(AppError::forbidden("outside_grant", "resource not covered by access grant"));
        }
    }
    drop(request);

    match layer.vault.read_file(url, &session).await {
        Ok(Some(res)) => Ok((StatusCode::OK, [(header::CONTENT_TYPE, res.content_type)], res.body).into_response()),
        Ok(None) => Err(AppError::not_found("resource_not_found", "resource not found")),
        Err(e) => {
            error!(target: "middleware", url = %url, error = %e, "vault read failed");
            Err(e.into())
        }
    }
}

/// Replace the vault resource named by the configured path parameter with the
/// request body. When an access grant is attached, it must cover the resource
/// and allow writes.
pub async fn store_resource(
    State(layer): State<ResourceLayer>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Result<Response, AppError> {
    let Some(url) = params.get(&layer.param_key).filter(|u| !u.is_empty()) else {
        return Err(AppError::user("missing_resource", "resource url missing from path"));
    };
    let Some(session) = request.extensions().get::<Session>().cloned() else {
        return Err(AppError::auth("no_session", "login required"));
    };
    if let Some(grant) = request.extensions().get::<AccessGrant>() {
        if !grant.covers(url) || !grant.allows(AccessMode::Write) {
            return Err(AppError::forbidden("outside_grant", "resource not writable under access grant"));
        }
    }
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = to_bytes(request.into_body(), MAX_UPLOAD_BYTES)
        .await
        .map_err(|e| AppError::user("bad_body".to_string(), e.to_string()))?;

    let resource = VaultResource { url: url.clone(), content_type, body };
    match layer.vault.write_file(url, resource, &session).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => {
            error!(target: "middleware", url = %url, error = %e, "vault write failed");
            Err(e.into())
        }
    }
}
