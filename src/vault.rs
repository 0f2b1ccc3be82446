//! Data-vault and access-grant collaborators.
//!
//! The vault wire protocol and grant cryptography live outside this crate;
//! middleware only sees these traits. [`crate::memory`] has process-local
//! implementations for tests and single-node runs.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Session;

/// A file read from a user's data vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultResource {
    pub url: String,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault request failed ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("vault unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait VaultClient: Send + Sync {
    /// `Ok(None)` when the vault has no resource at `url`.
    async fn read_file(&self, url: &str, session: &Session) -> Result<Option<VaultResource>, VaultError>;
    async fn write_file(&self, url: &str, resource: VaultResource, session: &Session) -> Result<(), VaultError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Append,
}

/// Credential letting an application act on a resource owner's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub id: String,
    pub grantee: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub modes: Vec<AccessMode>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    /// True if `url` is one of the granted resources or lies beneath a granted
    /// container (a resource ending in `/`).
    pub fn covers(&self, url: &str) -> bool {
        self.resources.iter().any(|r| r == url || (r.ends_with('/') && url.starts_with(r.as_str())))
    }

    pub fn allows(&self, mode: AccessMode) -> bool { self.modes.contains(&mode) }
}

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("grant service error: {0}")]
    Service(String),

    #[error("grant {0} failed verification")]
    Invalid(String),
}

#[async_trait]
pub trait AccessGrantSource: Send + Sync {
    async fn get_grant(&self, grant_id: &str, session: &Session) -> Result<Option<AccessGrant>, GrantError>;
}

pub type SharedVault = Arc<dyn VaultClient>;
pub type SharedGrants = Arc<dyn AccessGrantSource>;
