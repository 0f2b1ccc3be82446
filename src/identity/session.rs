use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::storage::{KeyValueStorage, StorageHandle, StoreError};
use crate::tprintln;

const SESSION_KEY_PREFIX: &str = "session:";

/// Authenticated identity context tied to a session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub web_id: Option<String>,
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Backing store lookup of a session by id.
///
/// `Ok(None)` means the store has no (live) session for the id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn fetch_session_by_id(
        &self,
        session_id: &str,
        storage: Option<StorageHandle>,
    ) -> Result<Option<Session>, StoreError>;
}

pub fn session_key(session_id: &str) -> String { format!("{SESSION_KEY_PREFIX}{session_id}") }

/// 256-bit random identifier, base64url without padding.
pub fn new_session_id() -> Result<String, StoreError> { session_id_from(getrandom::getrandom) }

fn session_id_from<F>(fill: F) -> Result<String, StoreError>
where
    F: FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
{
    let mut buf = [0u8; 32];
    fill(&mut buf).map_err(|e| StoreError::Backend(format!("session id generation failed: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Session store that keeps JSON session records in a [`KeyValueStorage`].
#[derive(Clone)]
pub struct StorageSessionStore {
    default_storage: StorageHandle,
    pub ttl: Duration,
}

impl StorageSessionStore {
    pub fn new(default_storage: StorageHandle) -> Self {
        Self { default_storage, ttl: Duration::hours(1) }
    }

    fn pick<'a>(&'a self, storage: &'a Option<StorageHandle>) -> &'a dyn KeyValueStorage {
        storage.as_deref().unwrap_or(self.default_storage.as_ref())
    }

    /// Mint and persist a logged-in session for `web_id`.
    pub async fn issue(&self, web_id: &str, client_id: Option<String>, storage: Option<StorageHandle>) -> Result<Session, StoreError> {
        self.issue_with(web_id, client_id, storage, getrandom::getrandom).await
    }

    async fn issue_with<F>(
        &self,
        web_id: &str,
        client_id: Option<String>,
        storage: Option<StorageHandle>,
        fill: F,
    ) -> Result<Session, StoreError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), getrandom::Error> + Send,
    {
        let sess = Session {
            session_id: session_id_from(fill)?,
            web_id: Some(web_id.to_string()),
            is_logged_in: true,
            client_id,
            expires_at: Some(Utc::now() + self.ttl),
        };
        self.save(&sess, storage).await?;
        tprintln!("session.issue web_id={} sid={} ttl_secs={}", web_id, sess.session_id, self.ttl.num_seconds());
        Ok(sess)
    }

    pub async fn save(&self, session: &Session, storage: Option<StorageHandle>) -> Result<(), StoreError> {
        if session.session_id.is_empty() { return Err(StoreError::InvalidId); }
        let key = session_key(&session.session_id);
        let body = serde_json::to_string(session).map_err(|source| StoreError::Corrupt { key: key.clone(), source })?;
        self.pick(&storage).set(&key, body).await
    }

    pub async fn remove(&self, session_id: &str, storage: Option<StorageHandle>) -> Result<bool, StoreError> {
        if session_id.is_empty() { return Err(StoreError::InvalidId); }
        self.pick(&storage).delete(&session_key(session_id)).await
    }
}

#[async_trait]
impl SessionStore for StorageSessionStore {
    async fn fetch_session_by_id(
        &self,
        session_id: &str,
        storage: Option<StorageHandle>,
    ) -> Result<Option<Session>, StoreError> {
        if session_id.is_empty() { return Err(StoreError::InvalidId); }
        let key = session_key(session_id);
        let Some(raw) = self.pick(&storage).get(&key).await? else { return Ok(None); };
        let sess: Session = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { key, source })?;
        if sess.is_expired_at(Utc::now()) {
            debug!(target: "session_store", session_id, "stored session expired");
            return Ok(None);
        }
        Ok(Some(sess))
    }
}

/// Shareable backing store handle.
pub type SharedSessionStore = Arc<dyn SessionStore>;
