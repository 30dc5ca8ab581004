//! Backend that keeps the document in a JSON file on local disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::StorageResult;
use super::model::Document;

/// File name of the document inside the data directory.
pub const STATE_FILE: &str = "data.json";

/// Merge-on-write backend.
///
/// Every commit re-reads the file under an in-process lock and merges the new
/// document over it, so concurrent writers of different fields within this process
/// do not clobber each other. Nothing guards against other processes writing the
/// same file.
#[derive(Clone)]
pub struct FileBackend {
    path: PathBuf,
    commit_lock: Arc<Mutex<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> StorageResult<Document> {
        load(&self.path).await
    }

    /// Merge `doc` over the current file contents and persist the result.
    pub async fn write(&self, doc: Document) -> StorageResult<Document> {
        let _guard = self.commit_lock.lock().await;
        let current = load(&self.path).await?;
        let merged = doc.merged_over(current);
        self.persist(&merged).await?;
        debug!(path = %self.path.display(), fields = merged.fields().count(), "committed state to file");
        Ok(merged)
    }

    /// Replace the file with an empty document, without merging.
    pub async fn reset(&self) -> StorageResult<()> {
        let _guard = self.commit_lock.lock().await;
        self.persist(&Document::new()).await
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn persist(&self, doc: &Document) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.temp_path();
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove temp state file");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(STATE_FILE);
        let suffix: [u8; 6] = rand::thread_rng().gen();
        self.path
            .with_file_name(format!(".{name}.{}.tmp", hex::encode(suffix)))
    }
}

async fn load(path: &Path) -> StorageResult<Document> {
    match fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::new()),
        Ok(bytes) => Document::from_value(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
        Err(e) => Err(e.into()),
    }
}
