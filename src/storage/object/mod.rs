//! Storage abstraction over an object-store backend, with a local
//! filesystem fallback.

mod local;
mod manager;
mod r2;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::error::JobError;

pub use local::LocalStore;
pub use manager::{Delivery, StorageInfo, StorageManager};
pub use r2::R2Store;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("link expiry of {0}s is out of range")]
    InvalidExpiry(u64),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for JobError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => JobError::NotFound(key),
            StorageError::Unavailable(what) => JobError::Unavailable(what),
            StorageError::InvalidExpiry(_) => JobError::Validation(e.to_string()),
            other => JobError::Storage(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    CloudflareR2,
    Local,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudflareR2 => "cloudflare_r2",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedObject {
    pub remote_key: String,
    pub size: u64,
    pub content_type: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub signed_url: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    fn bucket(&self) -> Option<&str>;

    /// Uploads a local file. An existing object under `key` is overwritten.
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<UploadedObject>;

    async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageObject>>;
}

/// Content type from the file extension, `application/octet-stream` otherwise.
pub fn content_type_for(path: impl AsRef<Path>) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Absolute expiry of a link issued now and valid for `expires_in`.
pub fn expires_at(expires_in: Duration) -> StorageResult<DateTime<Utc>> {
    let secs = expires_in.as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or(StorageError::InvalidExpiry(secs))
}

/// `{category}/{task_id}_{basename}`
pub fn remote_key(category: &str, task_id: &str, file: &Path) -> String {
    let basename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}/{}_{}", category.trim_end_matches('/'), task_id, basename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("a/b/clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("speech.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("notes.txt"), "text/plain");
        assert_eq!(content_type_for("blob.zzunknown"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn remote_key_layout() {
        let key = remote_key("processed/audio", "t-1", Path::new("/tmp/processed/t-1_normalize_audio_0.wav"));
        assert_eq!(key, "processed/audio/t-1_t-1_normalize_audio_0.wav");
        assert_eq!(remote_key("downloads/", "t-2", Path::new("clip.mp4")), "downloads/t-2_clip.mp4");
    }
}
