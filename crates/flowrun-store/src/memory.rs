use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::BoxFuture;

use flowrun_core::credential::Credential;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::CredentialStore;

/// Credential store held in memory. Used by the CLI and tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: Credential) {
        if let Ok(mut map) = self.credentials.write() {
            map.insert(credential.id.clone(), credential);
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Credential> for MemoryCredentialStore {
    fn from_iter<I: IntoIterator<Item = Credential>>(iter: I) -> Self {
        let map = iter.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            credentials: RwLock::new(map),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credential(&self, id: &str) -> BoxFuture<'_, Result<Credential>> {
        let found = self
            .credentials
            .read()
            .map_err(|e| FlowError::Database(e.to_string()))
            .and_then(|map| {
                map.get(id)
                    .cloned()
                    .ok_or_else(|| FlowError::CredentialNotFound(id.to_string()))
            });
        Box::pin(async move { found })
    }
}
