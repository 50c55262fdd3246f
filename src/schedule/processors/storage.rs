use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::{non_empty, wrong_params, ArtifactDelivery, TaskContext, TaskProcessor};
use crate::error::{JobError, JobResult};
use crate::schedule::types::{
    BatchUploadParams, BatchUploadResult, CleanupParams, CleanupResult, FileFailure, LinkOutcome, LinksParams,
    LinksResult, Task, TaskParams, TaskResult, TaskType, UploadParams, UploadResult,
};
use crate::storage::object::StorageManager;

/// Presigned links cannot outlive a week on S3-compatible stores.
pub const MAX_LINK_SECS: u64 = 7 * 24 * 3600;

/// A century; older cutoffs make no sense for scratch storage.
const MAX_CLEANUP_AGE_DAYS: u32 = 36500;

fn cleanup_cutoff(now: DateTime<Utc>, max_age_days: u32) -> JobResult<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(max_age_days))
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| JobError::Validation(format!("max_age_days {} is out of range", max_age_days)))
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

/// Uploads one local file and signs a download link for it.
pub struct UploadProcessor {
    delivery: ArtifactDelivery,
}

impl UploadProcessor {
    pub fn new(delivery: ArtifactDelivery) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl TaskProcessor for UploadProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::StorageUpload
    }

    async fn process(&self, task: &Task, _ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = match &task.config.params {
            TaskParams::StorageUpload(p) => p,
            other => return Err(wrong_params(TaskType::StorageUpload, other)),
        };
        if !params.file_path.exists() {
            return Err(JobError::NotFound(params.file_path.display().to_string()));
        }

        let key = params
            .remote_key
            .clone()
            .unwrap_or_else(|| format!("uploads/{}", basename(&params.file_path)));
        let storage = self.delivery.storage();
        let object = storage.upload(&params.file_path, &key, &params.metadata).await?;

        let (download_url, error) = match storage.sign_url(&key, self.delivery.ttl()).await {
            Ok(signed) => (Some(signed.signed_url), None),
            Err(e) => {
                warn!("Uploaded {} but could not sign it: {}", key, e);
                (None, Some(e.to_string()))
            }
        };
        info!("Task {} uploaded {}", task.id, key);

        Ok(TaskResult::Upload(UploadResult {
            object,
            download_url,
            error,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        match params {
            TaskParams::StorageUpload(UploadParams { file_path, remote_key, .. }) => {
                if file_path.as_os_str().is_empty() {
                    return Err(JobError::Validation("file_path must not be empty".into()));
                }
                if let Some(key) = remote_key {
                    non_empty(key, "remote_key")?;
                }
                Ok(())
            }
            other => Err(wrong_params(TaskType::StorageUpload, other)),
        }
    }

    async fn cleanup(&self, _task: &Task) -> anyhow::Result<()> {
        // the uploaded file belongs to the caller
        Ok(())
    }
}

/// Uploads several files under one prefix, recording each outcome.
pub struct BatchUploadProcessor {
    storage: StorageManager,
}

impl BatchUploadProcessor {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TaskProcessor for BatchUploadProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::BatchUpload
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = match &task.config.params {
            TaskParams::BatchUpload(p) => p,
            other => return Err(wrong_params(TaskType::BatchUpload, other)),
        };

        let total = params.file_paths.len();
        let mut uploaded = Vec::new();
        let mut failed = Vec::new();
        for (i, path) in params.file_paths.iter().enumerate() {
            ctx.progress
                .report(i as u32, total as u32, &format!("Uploading {}", basename(path)))
                .await;
            let key = format!("{}/{}", params.prefix.trim_end_matches('/'), basename(path));
            let metadata = HashMap::from([("task_id".to_string(), task.id.clone())]);
            match self.storage.upload(path, &key, &metadata).await {
                Ok(object) => uploaded.push(object),
                Err(e) => {
                    warn!("Batch {} failed to upload {}: {}", task.id, path.display(), e);
                    failed.push(FileFailure {
                        file: path.display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!("Batch {} uploaded {}/{} files", task.id, uploaded.len(), total);

        Ok(TaskResult::BatchUpload(BatchUploadResult {
            succeeded: uploaded.len(),
            uploaded,
            failed,
            total,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        match params {
            TaskParams::BatchUpload(BatchUploadParams { file_paths, prefix }) => {
                if file_paths.is_empty() {
                    return Err(JobError::Validation("file_paths must not be empty".into()));
                }
                non_empty(prefix, "prefix")
            }
            other => Err(wrong_params(TaskType::BatchUpload, other)),
        }
    }

    async fn cleanup(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Deletes stored objects older than a cutoff.
pub struct CleanupProcessor {
    storage: StorageManager,
}

impl CleanupProcessor {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TaskProcessor for CleanupProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Cleanup
    }

    async fn process(&self, task: &Task, _ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = match &task.config.params {
            TaskParams::Cleanup(p) => p,
            other => return Err(wrong_params(TaskType::Cleanup, other)),
        };

        let cutoff = cleanup_cutoff(Utc::now(), params.max_age_days)?;
        let objects = self.storage.list(&params.prefix).await?;
        let scanned = objects.len();
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        for object in objects.into_iter().filter(|o| o.last_modified <= cutoff) {
            match self.storage.delete(&object.key).await {
                Ok(()) => deleted.push(object.key),
                Err(e) => failed.push(FileFailure {
                    file: object.key,
                    error: e.to_string(),
                }),
            }
        }
        info!(
            "Cleanup {} scanned {} objects under {:?}, deleted {}",
            task.id,
            scanned,
            params.prefix,
            deleted.len()
        );

        Ok(TaskResult::Cleanup(CleanupResult {
            scanned,
            deleted,
            failed,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        match params {
            TaskParams::Cleanup(CleanupParams { max_age_days, .. }) => {
                if *max_age_days > MAX_CLEANUP_AGE_DAYS {
                    return Err(JobError::Validation(format!(
                        "max_age_days must be at most {}",
                        MAX_CLEANUP_AGE_DAYS
                    )));
                }
                Ok(())
            }
            other => Err(wrong_params(TaskType::Cleanup, other)),
        }
    }

    async fn cleanup(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Signs download links for existing keys.
pub struct LinksProcessor {
    storage: StorageManager,
}

impl LinksProcessor {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TaskProcessor for LinksProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::GenerateLinks
    }

    async fn process(&self, task: &Task, _ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = match &task.config.params {
            TaskParams::GenerateLinks(p) => p,
            other => return Err(wrong_params(TaskType::GenerateLinks, other)),
        };

        let mut links = Vec::with_capacity(params.keys.len());
        for key in &params.keys {
            let outcome = match self.storage.sign_url(key, Duration::from_secs(params.expires_in)).await {
                Ok(signed) => LinkOutcome {
                    key: key.clone(),
                    url: Some(signed.signed_url),
                    expires_at: Some(signed.expires_at),
                    error: None,
                },
                Err(e) => LinkOutcome {
                    key: key.clone(),
                    url: None,
                    expires_at: None,
                    error: Some(e.to_string()),
                },
            };
            links.push(outcome);
        }
        Ok(TaskResult::Links(LinksResult { links }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        match params {
            TaskParams::GenerateLinks(LinksParams { keys, expires_in }) => {
                if keys.is_empty() {
                    return Err(JobError::Validation("keys must not be empty".into()));
                }
                if *expires_in == 0 || *expires_in > MAX_LINK_SECS {
                    return Err(JobError::Validation(format!(
                        "expires_in must be between 1 and {} seconds",
                        MAX_LINK_SECS
                    )));
                }
                Ok(())
            }
            other => Err(wrong_params(TaskType::GenerateLinks, other)),
        }
    }

    async fn cleanup(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schedule::progress::NoProgress;
    use crate::schedule::types::TaskConfig;
    use crate::storage::object::LocalStore;
    use anyhow::Result;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn setup() -> Result<(TempDir, StorageManager, TaskContext)> {
        let root = TempDir::new()?;
        let storage = StorageManager::new(Arc::new(LocalStore::new(root.path().join("store"), "/files")));
        let ctx = TaskContext {
            cancel: CancellationToken::new(),
            progress: Arc::new(NoProgress),
        };
        Ok((root, storage, ctx))
    }

    #[tokio::test]
    async fn batch_upload_reports_each_file() -> Result<()> {
        let (root, storage, ctx) = setup()?;
        let good = root.path().join("a.txt");
        std::fs::write(&good, "a")?;
        let processor = BatchUploadProcessor::new(storage);

        let task = Task::new(
            "batch-1",
            TaskConfig::new(TaskParams::BatchUpload(BatchUploadParams {
                file_paths: vec![good, root.path().join("missing.txt")],
                prefix: "reports/".into(),
            })),
        );
        let TaskResult::BatchUpload(result) = processor.process(&task, &ctx).await? else {
            panic!("unexpected result");
        };
        assert_eq!((result.total, result.succeeded), (2, 1));
        assert_eq!(result.uploaded[0].remote_key, "reports/a.txt");
        assert!(result.failed[0].file.ends_with("missing.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn upload_then_cleanup_then_links() -> Result<()> {
        let (root, storage, ctx) = setup()?;
        let file = root.path().join("clip.mp3");
        std::fs::write(&file, b"sound")?;

        let upload = UploadProcessor::new(ArtifactDelivery::new(storage.clone(), Duration::from_secs(60)));
        let task = Task::new(
            "up-1",
            TaskConfig::new(TaskParams::StorageUpload(UploadParams {
                file_path: file.clone(),
                remote_key: None,
                metadata: HashMap::new(),
            })),
        );
        let TaskResult::Upload(result) = upload.process(&task, &ctx).await? else {
            panic!("unexpected result");
        };
        assert_eq!(result.object.remote_key, "uploads/clip.mp3");
        assert_eq!(result.download_url.as_deref(), Some("/files/uploads/clip.mp3"));

        let links = LinksProcessor::new(storage.clone());
        let links_task = Task::new(
            "links-1",
            TaskConfig::new(TaskParams::GenerateLinks(LinksParams {
                keys: vec!["uploads/clip.mp3".into(), "uploads/none.mp3".into()],
                expires_in: 600,
            })),
        );
        let TaskResult::Links(result) = links.process(&links_task, &ctx).await? else {
            panic!("unexpected result");
        };
        assert!(result.links[0].url.is_some());
        assert!(result.links[1].error.is_some());

        let cleanup = CleanupProcessor::new(storage.clone());
        let keep = Task::new(
            "clean-1",
            TaskConfig::new(TaskParams::Cleanup(CleanupParams {
                prefix: "uploads/".into(),
                max_age_days: 7,
            })),
        );
        let TaskResult::Cleanup(result) = cleanup.process(&keep, &ctx).await? else {
            panic!("unexpected result");
        };
        assert_eq!((result.scanned, result.deleted.len()), (1, 0));

        let purge = Task::new(
            "clean-2",
            TaskConfig::new(TaskParams::Cleanup(CleanupParams {
                prefix: "uploads/".into(),
                max_age_days: 0,
            })),
        );
        let TaskResult::Cleanup(result) = cleanup.process(&purge, &ctx).await? else {
            panic!("unexpected result");
        };
        assert_eq!(result.deleted, vec!["uploads/clip.mp3".to_string()]);
        assert!(storage.list("uploads/").await?.is_empty());

        let missing = Task::new(
            "up-2",
            TaskConfig::new(TaskParams::StorageUpload(UploadParams {
                file_path: root.path().join("gone.mp3"),
                remote_key: None,
                metadata: HashMap::new(),
            })),
        );
        assert_eq!(upload.process(&missing, &ctx).await.unwrap_err().kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_rejects_ages_beyond_a_century() -> Result<()> {
        let (_root, storage, ctx) = setup()?;
        let cleanup = CleanupProcessor::new(storage);
        let params = TaskParams::Cleanup(CleanupParams {
            prefix: "uploads/".into(),
            max_age_days: u32::MAX,
        });

        let err = cleanup.validate_params(&params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        // a record that bypassed submission still fails cleanly
        let task = Task::new("clean-3", TaskConfig::new(params));
        let err = cleanup.process(&task, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let edge = TaskParams::Cleanup(CleanupParams {
            prefix: "uploads/".into(),
            max_age_days: MAX_CLEANUP_AGE_DAYS,
        });
        assert!(cleanup.validate_params(&edge).is_ok());
        Ok(())
    }
}
