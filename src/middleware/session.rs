use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, error};

use super::parse_cookie;
use crate::error::AppError;
use crate::identity::{SessionDeduplicator, StorageHandle};

/// State for [`require_session`].
#[derive(Clone)]
pub struct SessionLayer {
    pub dedup: SessionDeduplicator,
    pub cookie_name: String,
    /// Storage override handed to the backing store on every lookup.
    pub storage: Option<StorageHandle>,
}

/// Resolve the session cookie and attach the logged-in `Session` as a request
/// extension.
///
/// # Errors
/// - 401 when the cookie is missing, the session is unknown or not logged in.
/// - 500 when a shared backing-store fetch failed.
pub async fn require_session(
    State(layer): State<SessionLayer>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(sid) = parse_cookie(request.headers(), &layer.cookie_name) else {
        return Err(AppError::auth("no_session", "session cookie missing"));
    };
    match layer.dedup.fetch(&sid, layer.storage.clone()).await {
        Ok(Some(session)) if session.is_logged_in => {
            request.extensions_mut().insert(session);
            Ok(next.run(request).await)
        }
        Ok(_) => {
            debug!(target: "middleware", "no live session for cookie");
            Err(AppError::auth("no_session", "session not found or not logged in"))
        }
        Err(e) => {
            error!(target: "middleware", session_id = e.session_id(), error = %e, "session lookup failed");
            Err(e.into())
        }
    }
}
