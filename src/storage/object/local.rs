use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{
    content_type_for, expires_at, ObjectStore, SignedUrl, StorageBackend, StorageError, StorageObject, StorageResult,
    UploadedObject,
};

/// Filesystem backend rooted at one directory. Keys map to relative paths.
pub struct LocalStore {
    root: PathBuf,
    base_url: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key inside the root. Absolute keys and `..` are rejected.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }

    fn bucket(&self) -> Option<&str> {
        None
    }

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<UploadedObject> {
        let dest = self.path_for(key)?;
        if !local_path.exists() {
            return Err(StorageError::NotFound(local_path.display().to_string()));
        }
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // re-uploading an object onto itself is a no-op
        let same_file = match (tokio::fs::canonicalize(local_path).await, tokio::fs::canonicalize(&dest).await) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            tokio::fs::copy(local_path, &dest).await?;
        }
        debug!("Stored {} as {} ({} metadata keys)", local_path.display(), key, metadata.len());

        let size = tokio::fs::metadata(&dest).await?.len();
        Ok(UploadedObject {
            remote_key: key.to_string(),
            size,
            content_type: content_type_for(key),
            url: self.url_for(key),
            bucket: None,
            local_path: Some(dest),
        })
    }

    /// Static link under the configured URL prefix. `expires_at` is advisory:
    /// the local backend cannot revoke the link once issued.
    async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl> {
        let expires_at = expires_at(expires_in)?;
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(SignedUrl {
            signed_url: self.url_for(key),
            expires_in: expires_in.as_secs(),
            expires_at,
            local_path: Some(path),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageObject>> {
        let mut objects = Vec::new();
        if !self.root.exists() {
            return Ok(objects);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Some(key) = self.key_for(&path) else { continue };
                if !key.starts_with(prefix) {
                    continue;
                }
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                objects.push(StorageObject {
                    content_type: Some(content_type_for(&key)),
                    key,
                    size: meta.len(),
                    last_modified,
                    etag: None,
                    local_path: Some(path),
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
