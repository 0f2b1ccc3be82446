//! axum middleware between the HTTP layer and the identity/vault collaborators.
//!
//! Each middleware takes an explicit layer struct as its state, built once by
//! the server from [`crate::config::GatewayConfig`]:
//! - [`require_session`]: session cookie to [`crate::identity::Session`] extension.
//! - [`require_access_grant`]: grant path parameter to [`crate::vault::AccessGrant`] extension.
//! - [`fetch_resource`] / [`store_resource`]: resource path parameter to vault
//!   file read or write.

mod access;
mod resource;
mod session;

pub use access::{require_access_grant, AccessLayer};
pub use resource::{fetch_resource, store_resource, ResourceLayer};
pub use session::{require_session, SessionLayer};

use axum::http::header::{InvalidHeaderValue, COOKIE};
use axum::http::{HeaderMap, HeaderValue};

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(COOKIE) {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k == name && !v.is_empty() { return Some(v.to_string()); }
            }
        }
    }
    None
}

// HttpOnly cookie scoped to path / with SameSite=Strict
pub fn session_cookie(name: &str, sid: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!("{name}={sid}; HttpOnly{secure}; SameSite=Strict; Path=/"))
}

pub fn clear_session_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!("{name}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly{secure}; SameSite=Strict; Path=/"))
}
