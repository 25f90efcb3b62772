use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;

use super::StorageBackend;

/// One file per blob under a root directory.
///
/// Writes go to `<name>.tmp`, are synced, then renamed over `<name>`, so a
/// crash mid-write leaves the previous contents in place.
#[derive(Clone, Debug)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Use `root` as the data directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root.display().to_string(), e))?;
        Ok(FileBackend { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StorageError::Io {
                name: name.to_string(),
                reason: "invalid blob name".into(),
            });
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(name, e)),
        }
    }

    async fn write(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        let tmp = self.root.join(format!("{}.tmp", name));

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| io_error(name, e))?;
        file.write_all(&bytes).await.map_err(|e| io_error(name, e))?;
        file.sync_all().await.map_err(|e| io_error(name, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(name, e))
    }

    async fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(name, e)),
        }
    }
}

fn io_error(name: &str, err: std::io::Error) -> StorageError {
    StorageError::Io {
        name: name.to_string(),
        reason: err.to_string(),
    }
}
