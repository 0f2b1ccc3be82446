use std::collections::HashMap;

use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::{error, info};

use crate::error::AppError;
use crate::identity::Session;
use crate::vault::SharedGrants;

/// State for [`require_access_grant`].
#[derive(Clone)]
pub struct AccessLayer {
    pub grants: SharedGrants,
    /// Route path parameter holding the grant id.
    pub param_key: String,
}

/// Look up the grant named by the configured path parameter and attach it as a
/// request extension. Must run after [`super::require_session`].
pub async fn require_access_grant(
    State(layer): State<AccessLayer>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(grant_id) = params.get(&layer.param_key).filter(|g| !g.is_empty()) else {
        return Err(AppError::user("missing_grant", "access grant id missing from path"));
    };
    let Some(session) = request.extensions().get::<Session>().cloned() else {
        return Err(AppError::auth("no_session", "login required"));
    };

    let grant = match layer.grants.get_grant(grant_id, &session).await {
        Ok(Some(g)) => g,
        Ok(None) => return Err(AppError::not_found("grant_not_found", "access grant not found")),
        Err(e) => {
            error!(target: "middleware", grant_id = %grant_id, error = %e, "grant lookup failed");
            return Err(e.into());
        }
    };
    if grant.is_expired_at(Utc::now()) {
        info!(target: "middleware", grant_id = %grant_id, "rejecting expired access grant");
        return Err(AppError::forbidden("grant_expired", "access grant expired"));
    }
    if let Some(web_id) = session.web_id.as_deref() {
        if grant.grantee != web_id {
            return Err(AppError::forbidden("grant_not_issued_to_session", "access grant was issued to another agent"));
        }
    }

    request.extensions_mut().insert(grant);
    Ok(next.run(request).await)
}
