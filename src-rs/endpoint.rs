use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage::ClientStorage;

/// One model URL per document, stored under the document's derived filename.
#[derive(Debug)]
pub struct ModelEndpointStore<S> {
    storage: S,
    key: String,
    default_url: String,
}

impl<S: ClientStorage> ModelEndpointStore<S> {
    pub fn new(storage: S, key: impl Into<String>, default_url: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            default_url: default_url.into(),
        }
    }

    pub fn default_url(&self) -> &str {
        &self.default_url
    }

    /// Stored URL, or the default when nothing (or an empty value) is stored.
    pub async fn current(&self) -> Result<String, StorageError> {
        let stored = self.storage.get(&self.key).await?;
        match stored.filter(|url| !url.trim().is_empty()) {
            Some(url) => Ok(url),
            None => {
                debug!(key = %self.key, "no stored model URL; using default");
                Ok(self.default_url.clone())
            }
        }
    }

    pub async fn update(&self, url: &str) -> Result<(), StorageError> {
        self.storage.set(&self.key, url).await?;
        info!(key = %self.key, %url, "model URL saved");
        Ok(())
    }

    /// Forgets the stored URL and returns the default now in effect.
    pub async fn reset(&self) -> Result<String, StorageError> {
        self.storage.delete(&self.key).await?;
        info!(key = %self.key, "model URL reset to default");
        Ok(self.default_url.clone())
    }

    /// Removes every key in client storage, returning how many remain afterwards.
    pub async fn clear_all(&self) -> Result<usize, StorageError> {
        let keys = self.storage.keys().await?;
        info!(count = keys.len(), "removing all client storage data");
        for key in &keys {
            self.storage.delete(key).await?;
        }
        Ok(self.storage.keys().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MODEL_URL;
    use crate::storage::MemoryStorage;

    fn store() -> ModelEndpointStore<MemoryStorage> {
        ModelEndpointStore::new(MemoryStorage::default(), "marketing_site_v2", DEFAULT_MODEL_URL)
    }

    #[tokio::test]
    async fn absent_or_empty_values_fall_back_to_default() {
        let endpoints = store();
        assert_eq!(endpoints.current().await.unwrap(), DEFAULT_MODEL_URL);
        endpoints.update("").await.unwrap();
        assert_eq!(endpoints.current().await.unwrap(), DEFAULT_MODEL_URL);
    }

    #[tokio::test]
    async fn update_then_reset() {
        let endpoints = store();
        endpoints.update("https://models.example/v3/").await.unwrap();
        assert_eq!(endpoints.current().await.unwrap(), "https://models.example/v3/");
        assert_eq!(endpoints.reset().await.unwrap(), DEFAULT_MODEL_URL);
        assert_eq!(endpoints.current().await.unwrap(), DEFAULT_MODEL_URL);
    }

    #[tokio::test]
    async fn clear_all_drops_other_documents_too() {
        let endpoints = store();
        endpoints.update("https://a/").await.unwrap();
        endpoints.storage.set("other_doc", "https://b/").await.unwrap();
        assert_eq!(endpoints.clear_all().await.unwrap(), 0);
        assert_eq!(endpoints.current().await.unwrap(), DEFAULT_MODEL_URL);
    }
}
