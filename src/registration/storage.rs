//! Parking photo storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::runtime::Handle;

const PHOTO_DIRECTORY: &str = "parking_photos";
const NAME_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("path `{0}` escapes the storage root")]
    InvalidPath(String),
}

/// Where uploaded photos live.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write `bytes` under a fresh name and return its path relative to the
    /// store root.
    async fn store(&self, bytes: &[u8], extension: &str)
    -> Result<String, StorageError>;

    /// Remove a file previously returned by [`FileStore::store`]. Removing a
    /// missing file succeeds.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    fn absolute_path(&self, path: &str) -> PathBuf;
}

/// [`FileStore`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            root: std::path::absolute(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let inside = relative.components().all(|component| {
            matches!(component, std::path::Component::Normal(_))
        });

        if !inside {
            return Err(StorageError::InvalidPath(path.to_owned()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(
        &self,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, StorageError> {
        let directory = self.root.join(PHOTO_DIRECTORY);
        tokio::fs::create_dir_all(&directory).await?;

        let mut name = [0u8; NAME_BYTES];
        OsRng.fill_bytes(&mut name);
        let file_name = format!("{}.{extension}", hex::encode(name));

        tokio::fs::write(directory.join(&file_name), bytes).await?;

        Ok(format!("{PHOTO_DIRECTORY}/{file_name}"))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err.into())
            },
            _ => Ok(()),
        }
    }

    fn absolute_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

/// A stored file that is removed again unless it is committed.
///
/// Dropping it without calling [`TentativeFile::commit`] schedules the
/// deletion on the current runtime.
pub struct TentativeFile {
    store: Arc<dyn FileStore>,
    path: String,
    armed: bool,
}

impl TentativeFile {
    pub async fn store(
        store: Arc<dyn FileStore>,
        bytes: &[u8],
        extension: &str,
    ) -> Result<Self, StorageError> {
        let path = store.store(bytes, extension).await?;
        tracing::debug!(%path, "tentative file stored");

        Ok(Self {
            store,
            path,
            armed: true,
        })
    }

    /// Path relative to the store root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn absolute_path(&self) -> PathBuf {
        self.store.absolute_path(&self.path)
    }

    /// Keep the file and hand back its relative path.
    pub fn commit(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Delete the file now.
    pub async fn discard(mut self) -> Result<(), StorageError> {
        self.armed = false;
        self.store.delete(&self.path).await
    }
}

impl Drop for TentativeFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = Arc::clone(&self.store);
        let path = std::mem::take(&mut self.path);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.delete(&path).await {
                        tracing::error!(%path, error = %err, "abandoned file not deleted");
                    }
                });
            },
            Err(_) => {
                tracing::error!(%path, "no runtime to delete abandoned file");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn store(dir: &tempfile::TempDir) -> Arc<dyn FileStore> {
        Arc::new(LocalFileStore::new(dir.path()).unwrap())
    }

    #[tokio::test]
    async fn test_store_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let path = store.store(b"photo", "png").await.unwrap();
        assert!(path.starts_with("parking_photos/"));
        assert!(path.ends_with(".png"));

        let absolute = store.absolute_path(&path);
        assert!(absolute.is_absolute());
        assert_eq!(std::fs::read(&absolute).unwrap(), b"photo");

        store.delete(&path).await.unwrap();
        assert!(!absolute.exists());

        // Already gone.
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store.delete("../etc/passwd").await,
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            store.delete("/etc/passwd").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = TentativeFile::store(store(&dir), b"photo", "jpg")
            .await
            .unwrap();
        let absolute = file.absolute_path();

        let path = file.commit();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(absolute.exists());
        assert!(absolute.ends_with(&path));
    }

    #[tokio::test]
    async fn test_discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = TentativeFile::store(store(&dir), b"photo", "jpg")
            .await
            .unwrap();
        let absolute = file.absolute_path();

        file.discard().await.unwrap();
        assert!(!absolute.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = TentativeFile::store(store(&dir), b"photo", "jpg")
            .await
            .unwrap();
        let absolute = file.absolute_path();

        drop(file);

        for _ in 0..100 {
            if !absolute.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("abandoned file still on disk");
    }
}
