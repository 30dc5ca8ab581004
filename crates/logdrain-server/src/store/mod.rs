//! Persistence of the single extension-wide state document.
//!
//! Two backends, chosen once when the store is constructed:
//!
//! - [`RemoteBackend`]: a host-provided storage API. Writes are forced; the host
//!   serializes them, so the last committed write wins.
//! - [`FileBackend`]: a JSON file on disk. Writes re-read the file and merge the
//!   new document over it field by field. This only protects writers inside one
//!   process.

pub mod error;
pub mod file;
pub mod model;
pub mod remote;

use std::path::Path;
use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, STATE_FILE};
pub use model::{Document, RunReport};
pub use remote::{InMemoryProvider, RemoteBackend, StorageProvider};

#[derive(Clone)]
enum Backend {
    Remote(RemoteBackend),
    LocalFile(FileBackend),
}

/// Cheaply cloneable handle to the state document.
#[derive(Clone)]
pub struct StateStore {
    backend: Backend,
}

impl StateStore {
    pub fn remote(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            backend: Backend::Remote(RemoteBackend::new(provider)),
        }
    }

    pub fn local_file(path: impl AsRef<Path>) -> Self {
        Self {
            backend: Backend::LocalFile(FileBackend::new(path.as_ref())),
        }
    }

    /// Remote storage when the host supplied a provider, otherwise
    /// `<data_dir>/data.json`.
    pub fn select(provider: Option<Arc<dyn StorageProvider>>, data_dir: &Path) -> Self {
        match provider {
            Some(p) => Self::remote(p),
            None => Self::local_file(data_dir.join(STATE_FILE)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Remote(_) => "remote",
            Backend::LocalFile(_) => "file",
        }
    }

    /// Current document; empty when nothing has been stored yet.
    pub async fn read(&self) -> StorageResult<Document> {
        match &self.backend {
            Backend::Remote(b) => b.read().await,
            Backend::LocalFile(b) => b.read().await,
        }
    }

    /// Commit `doc` under the backend's write policy and return what was
    /// committed. For the file backend that is the merged document.
    pub async fn write(&self, doc: Document) -> StorageResult<Document> {
        match &self.backend {
            Backend::Remote(b) => b.write(doc).await,
            Backend::LocalFile(b) => b.write(doc).await,
        }
    }

    pub async fn read_modify_write<F>(&self, mutator: F) -> StorageResult<Document>
    where
        F: FnOnce(Document) -> Document + Send,
    {
        self.try_read_modify_write(|doc| Ok(mutator(doc))).await
    }

    /// Like [`read_modify_write`](Self::read_modify_write); nothing is committed
    /// when the mutator fails.
    pub async fn try_read_modify_write<F>(&self, mutator: F) -> StorageResult<Document>
    where
        F: FnOnce(Document) -> StorageResult<Document> + Send,
    {
        let current = self.read().await?;
        self.write(mutator(current)?).await
    }

    /// Overwrite the document with an empty one, bypassing merge-on-write.
    pub async fn reset(&self) -> StorageResult<()> {
        match &self.backend {
            Backend::Remote(b) => b.write(Document::new()).await.map(|_| ()),
            Backend::LocalFile(b) => b.reset().await,
        }
    }
}
