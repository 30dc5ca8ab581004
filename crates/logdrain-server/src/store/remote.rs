//! Backend that delegates persistence to a host-provided storage API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::StorageResult;
use super::model::Document;

/// Host key-value storage capability for a single document.
///
/// `force` asks the host to commit unconditionally instead of rejecting writes
/// that raced with another writer.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn get(&self) -> StorageResult<Option<Value>>;
    async fn set(&self, document: Value, force: bool) -> StorageResult<()>;
}

/// Force-overwrite backend. The host serializes writes per instance, so the last
/// committed write wins.
#[derive(Clone)]
pub struct RemoteBackend {
    provider: Arc<dyn StorageProvider>,
}

impl RemoteBackend {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }

    pub async fn read(&self) -> StorageResult<Document> {
        match self.provider.get().await? {
            Some(value) => Document::from_value(value),
            None => Ok(Document::new()),
        }
    }

    pub async fn write(&self, doc: Document) -> StorageResult<Document> {
        self.provider.set(doc.clone().into_value(), true).await?;
        debug!(fields = doc.fields().count(), "committed state to remote storage");
        Ok(doc)
    }
}

/// In-process [`StorageProvider`], for embedding hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    value: Arc<RwLock<Option<Value>>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            value: Arc::new(RwLock::new(Some(value))),
        }
    }

    /// Current raw value, bypassing the store.
    pub async fn snapshot(&self) -> Option<Value> {
        self.value.read().await.clone()
    }
}

#[async_trait]
impl StorageProvider for InMemoryProvider {
    async fn get(&self) -> StorageResult<Option<Value>> {
        Ok(self.value.read().await.clone())
    }

    async fn set(&self, document: Value, _force: bool) -> StorageResult<()> {
        *self.value.write().await = Some(document);
        Ok(())
    }
}
