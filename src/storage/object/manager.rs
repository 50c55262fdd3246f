use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{LocalStore, ObjectStore, R2Store, SignedUrl, StorageObject, StorageResult, UploadedObject};
use crate::config::Settings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub storage_type: String,
    pub r2_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// whether signed URLs stop working after `expires_at`
    pub expiry_enforced: bool,
}

/// Outcome of uploading a finished artifact. Failures are recorded, not
/// raised, so processing success and delivery success stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub remote_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Owns the single active backend, chosen once at startup.
#[derive(Clone)]
pub struct StorageManager {
    store: Arc<dyn ObjectStore>,
}

impl StorageManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Remote backend when its credentials are complete and the bucket
    /// answers, local filesystem otherwise.
    pub async fn select(settings: &Settings) -> Self {
        let local = LocalStore::new(&settings.local_storage_dir, &settings.local_storage_url);
        let remote = match &settings.r2 {
            Some(creds) => Some(
                R2Store::connect(creds)
                    .await
                    .map(|store| Arc::new(store) as Arc<dyn ObjectStore>),
            ),
            None => None,
        };
        Self::choose(remote, local)
    }

    pub fn choose(remote: Option<StorageResult<Arc<dyn ObjectStore>>>, local: LocalStore) -> Self {
        match remote {
            Some(Ok(store)) => {
                info!("Using {} storage", store.backend().as_str());
                Self::new(store)
            }
            Some(Err(e)) => {
                warn!("Remote storage unavailable ({}), falling back to local storage at {}", e, local.root().display());
                Self::new(Arc::new(local))
            }
            None => {
                info!("No remote storage credentials, using local storage at {}", local.root().display());
                Self::new(Arc::new(local))
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn storage_type(&self) -> &'static str {
        self.store.backend().as_str()
    }

    pub fn info(&self) -> StorageInfo {
        let remote = self.store.backend() != super::StorageBackend::Local;
        StorageInfo {
            storage_type: self.storage_type().to_string(),
            r2_available: remote,
            bucket_name: self.store.bucket().map(str::to_string),
            expiry_enforced: remote,
        }
    }

    pub async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<UploadedObject> {
        self.store.upload(local_path, key, metadata).await
    }

    pub async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl> {
        self.store.sign_url(key, expires_in).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.store.delete(key).await
    }

    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageObject>> {
        self.store.list(prefix).await
    }

    /// Uploads a finished artifact and signs a download link for it.
    pub async fn deliver(
        &self,
        local_path: &Path,
        remote_key: &str,
        metadata: &HashMap<String, String>,
        ttl: Duration,
    ) -> Delivery {
        let mut delivery = Delivery {
            remote_key: remote_key.to_string(),
            ..Default::default()
        };

        let uploaded = match self.upload(local_path, remote_key, metadata).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                error!("Failed to upload {} as {}: {}", local_path.display(), remote_key, e);
                delivery.error = Some(format!("upload failed: {}", e));
                return delivery;
            }
        };
        delivery.storage_url = Some(uploaded.url);
        delivery.size = Some(uploaded.size);

        match self.sign_url(remote_key, ttl).await {
            Ok(signed) => delivery.download_url = Some(signed.signed_url),
            Err(e) => {
                error!("Failed to sign {}: {}", remote_key, e);
                delivery.error = Some(format!("signing failed: {}", e));
            }
        }
        delivery
    }
}
