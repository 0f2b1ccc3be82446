//! Key/value storage seam used by the session backing store.
//!
//! A `StorageHandle` is the optional per-call storage override callers may pass
//! down to the backing store. When absent, the store falls back to its own
//! default storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::tprintln;

/// Errors raised by a session backing store or its key/value storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend could not be reached or refused the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded.
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The identifier cannot address a record (for example, it is empty).
    #[error("invalid session id")]
    InvalidId,
}

#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    /// Returns true if a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

pub type StorageHandle = Arc<dyn KeyValueStorage>;

/// Process-local storage. Suitable for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn handle() -> StorageHandle { Arc::new(Self::new()) }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }
}

#[async_trait]
impl KeyValueStorage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        tprintln!("storage.set key={} bytes={}", key, value.len());
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let s = InMemoryStorage::new();
        assert!(s.get("a").await.unwrap().is_none());
        s.set("a", "1".into()).await.unwrap();
        assert_eq!(s.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(s.len(), 1);
        assert!(s.delete("a").await.unwrap());
        assert!(!s.delete("a").await.unwrap());
        assert!(s.is_empty());
    }

    #[test]
    fn corrupt_error_display_names_key() {
        let src = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StoreError::Corrupt { key: "session:x".into(), source: src };
        assert!(err.to_string().starts_with("corrupt record at session:x"));
    }
}
