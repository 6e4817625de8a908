use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;

use super::{validate_key, DocumentError, DocumentStore, VersionedDocument};

/// Documents as files under a root directory, versioned by content hash.
pub struct JsonFileDocumentStore {
    root: PathBuf,
    /// Serializes read-compare-write within this process.
    write_lock: Mutex<()>,
}

fn version_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl JsonFileDocumentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self, key: &str) -> Result<PathBuf, DocumentError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, DocumentError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<VersionedDocument>, DocumentError> {
        let path = self.path(key)?;
        let Some(bytes) = Self::read_bytes(&path).await? else {
            return Ok(None);
        };
        let content = serde_json::from_slice(&bytes).map_err(|source| DocumentError::Malformed {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(VersionedDocument {
            content,
            version: version_of(&bytes),
        }))
    }

    async fn write(
        &self,
        key: &str,
        content: &Value,
        expected_version: Option<&str>,
        _message: &str,
    ) -> Result<String, DocumentError> {
        let path = self.path(key)?;
        let _guard = self.write_lock.lock().await;

        let current = Self::read_bytes(&path).await?.map(|b| version_of(&b));
        if current.as_deref() != expected_version {
            return Err(DocumentError::Conflict {
                key: key.to_string(),
            });
        }

        let bytes = serde_json::to_vec_pretty(content).map_err(|source| DocumentError::Malformed {
            key: key.to_string(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        Ok(version_of(&bytes))
    }
}
