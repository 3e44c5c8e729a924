use std::sync::Arc;

use tracing::debug;

use flowrun_core::credential::CredentialPayload;
use flowrun_core::error::Result;
use flowrun_core::traits::CredentialStore;

/// Fetches and decodes credentials for node handlers.
///
/// Every call goes to the store; nothing is cached between nodes.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Fetch `id` and decode it as `T`. An unknown id is `CredentialNotFound`;
    /// a type mismatch or bad payload is a configuration error.
    pub async fn resolve<T: CredentialPayload>(&self, id: &str) -> Result<T> {
        let credential = self.store.get_credential(id).await?;
        debug!(
            credential_id = %id,
            credential_type = %credential.credential_type,
            "Credential fetched"
        );
        credential.decode::<T>()
    }
}
