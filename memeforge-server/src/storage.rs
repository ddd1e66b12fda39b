//! Local file store
//!
//! Generated images live under `<root>/files`. The database only stores paths
//! relative to that directory, and the HTTP layer serves it at `/files`.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// URL prefix the store is mounted under
pub const FILES_URL_PREFIX: &str = "/files";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Location of a file written to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the store root, always `/`-separated
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to `<category>/<uuid>.<extension>`
    pub async fn save(
        &self,
        category: &str,
        extension: &str,
        bytes: &[u8],
    ) -> StorageResult<StoredFile> {
        let name = format!("{}.{}", Uuid::new_v4(), extension);
        self.write(&format!("{}/{}", category, name), bytes).await
    }

    /// Write `bytes` to `<category>/<sub>/<name>`, replacing any existing file
    pub async fn save_in(
        &self,
        category: &str,
        sub: &str,
        name: &str,
        bytes: &[u8],
    ) -> StorageResult<StoredFile> {
        self.write(&format!("{}/{}/{}", category, sub, name), bytes)
            .await
    }

    pub async fn read(&self, relative: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(relative)?;
        Ok(fs::read(path).await?)
    }

    /// Remove a file; a file that is already gone is not an error
    pub async fn delete(&self, relative: &str) -> StorageResult<()> {
        let path = self.resolve(relative)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "File already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Public URL of a stored file
    pub fn url_for(&self, relative: &str) -> String {
        format!("{}/{}", FILES_URL_PREFIX, relative.trim_start_matches('/'))
    }

    /// Absolute path of a relative store path
    ///
    /// Rejects absolute paths and any `..` component.
    pub fn resolve(&self, relative: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() {
            return Err(StorageError::InvalidPath("empty path".to_string()));
        }

        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(relative.to_string())),
            }
        }

        Ok(self.root.join(rel))
    }

    async fn write(&self, relative: &str, bytes: &[u8]) -> StorageResult<StoredFile> {
        let absolute_path = self.resolve(relative)?;
        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&absolute_path, bytes).await?;

        tracing::debug!(path = relative, bytes = bytes.len(), "Stored file");

        Ok(StoredFile {
            relative_path: relative.to_string(),
            absolute_path,
        })
    }
}
