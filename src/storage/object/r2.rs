use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::{
    content_type_for, expires_at, ObjectStore, SignedUrl, StorageBackend, StorageError, StorageObject, StorageResult,
    UploadedObject,
};
use crate::config::R2Credentials;

/// Cloudflare R2 through its S3-compatible API.
pub struct R2Store {
    client: Client,
    bucket: String,
}

impl R2Store {
    pub fn new(creds: &R2Credentials) -> Self {
        let credentials = Credentials::new(
            &creds.access_key_id,
            &creds.secret_access_key,
            None,
            None,
            "mediaflow-r2",
        );

        let config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .endpoint_url(creds.endpoint_url())
            .force_path_style(true)
            .behavior_version_latest()
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: creds.bucket.clone(),
        }
    }

    /// Builds the client and checks the bucket is reachable.
    pub async fn connect(creds: &R2Credentials) -> StorageResult<Self> {
        let store = Self::new(creds);
        store
            .client
            .head_bucket()
            .bucket(&store.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("bucket {}: {}", store.bucket, e)))?;
        info!("Connected to R2 bucket {}", store.bucket);
        Ok(store)
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://{}.r2.dev/{}", self.bucket, key)
    }
}

fn to_utc(value: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    value
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl ObjectStore for R2Store {
    fn backend(&self) -> StorageBackend {
        StorageBackend::CloudflareR2
    }

    fn bucket(&self) -> Option<&str> {
        Some(&self.bucket)
    }

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<UploadedObject> {
        if !local_path.exists() {
            return Err(StorageError::NotFound(local_path.display().to_string()));
        }
        let size = tokio::fs::metadata(local_path).await?.len();
        let content_type = content_type_for(local_path);
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(&content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(UploadedObject {
            remote_key: key.to_string(),
            size,
            content_type,
            url: self.public_url(key),
            bucket: Some(self.bucket.clone()),
            local_path: None,
        })
    }

    async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl> {
        let expires_at = expires_at(expires_in)?;
        let presigning =
            PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Backend(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(SignedUrl {
            signed_url: request.uri().to_string(),
            expires_in: expires_in.as_secs(),
            expires_at,
            local_path: None,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<StorageObject>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(StorageObject {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: to_utc(object.last_modified()),
                    content_type: None,
                    etag: object.e_tag().map(|t| t.trim_matches('"').to_string()),
                    local_path: None,
                });
            }

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> R2Credentials {
        R2Credentials {
            account_id: "acc123".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            bucket: "media".to_string(),
            endpoint: None,
        }
    }

    #[test]
    fn endpoint_and_public_url() {
        assert_eq!(creds().endpoint_url(), "https://acc123.r2.cloudflarestorage.com");
        let store = R2Store::new(&creds());
        assert_eq!(store.public_url("speech/t1_speech.mp3"), "https://media.r2.dev/speech/t1_speech.mp3");
        assert_eq!(store.backend().as_str(), "cloudflare_r2");
        assert_eq!(store.bucket(), Some("media"));
    }

    #[tokio::test]
    async fn presigned_url_carries_expiry() -> anyhow::Result<()> {
        // presigning is local, no request is sent
        let store = R2Store::new(&creds());
        let signed = store.sign_url("a/b.mp4", Duration::from_secs(900)).await?;
        assert!(signed.signed_url.contains("X-Amz-Expires=900"));
        assert!(signed.signed_url.contains("a/b.mp4"));
        assert_eq!(signed.expires_in, 900);
        Ok(())
    }
}
