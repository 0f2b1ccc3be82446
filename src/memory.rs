//! Process-local vault and grant sources.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::identity::Session;
use crate::vault::{AccessGrant, AccessGrantSource, GrantError, VaultClient, VaultError, VaultResource};

#[derive(Debug, Default)]
pub struct InMemoryVault {
    files: RwLock<HashMap<String, VaultResource>>,
}

impl InMemoryVault {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, resource: VaultResource) {
        self.files.write().insert(resource.url.clone(), resource);
    }
}

#[async_trait]
impl VaultClient for InMemoryVault {
    async fn read_file(&self, url: &str, _session: &Session) -> Result<Option<VaultResource>, VaultError> {
        Ok(self.files.read().get(url).cloned())
    }

    async fn write_file(&self, url: &str, mut resource: VaultResource, _session: &Session) -> Result<(), VaultError> {
        resource.url = url.to_string();
        self.insert(resource);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryGrants {
    grants: RwLock<HashMap<String, AccessGrant>>,
}

impl InMemoryGrants {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, grant: AccessGrant) {
        self.grants.write().insert(grant.id.clone(), grant);
    }
}

#[async_trait]
impl AccessGrantSource for InMemoryGrants {
    async fn get_grant(&self, grant_id: &str, _session: &Session) -> Result<Option<AccessGrant>, GrantError> {
        Ok(self.grants.read().get(grant_id).cloned())
    }
}
