pub mod download;
pub mod media;
pub mod speech;
pub mod storage;
pub mod transcribe;
pub mod translate;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{JobError, JobResult};
use crate::schedule::progress::ProgressSink;
use crate::schedule::types::{Task, TaskParams, TaskResult, TaskType};
use crate::storage::object::{Delivery, StorageManager};

pub use download::DownloadProcessor;
pub use media::PipelineProcessor;
pub use speech::SpeechProcessor;
pub use storage::{BatchUploadProcessor, CleanupProcessor, LinksProcessor, UploadProcessor};
pub use transcribe::TranscribeProcessor;
pub use translate::TranslateProcessor;

/// Per-run handles a processor gets from the worker.
pub struct TaskContext {
    /// Fires at the soft time limit.
    pub cancel: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn task_type(&self) -> TaskType;

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult>;

    /// Called at submission, before anything is queued.
    fn validate_params(&self, params: &TaskParams) -> JobResult<()>;

    /// Removes the job's local artifacts once its record expires.
    async fn cleanup(&self, task: &Task) -> anyhow::Result<()> {
        if let Some(path) = task.result.as_ref().and_then(TaskResult::output_path) {
            remove_artifact(path).await;
        }
        Ok(())
    }
}

pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

pub(crate) fn wrong_params(expected: TaskType, got: &TaskParams) -> JobError {
    JobError::Validation(format!(
        "{} processor received {} params",
        expected.as_str(),
        got.task_type().as_str()
    ))
}

/// Uploads finished artifacts and signs their download links.
#[derive(Clone)]
pub struct ArtifactDelivery {
    storage: StorageManager,
    ttl: Duration,
}

impl ArtifactDelivery {
    pub fn new(storage: StorageManager, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn deliver(&self, local_path: &Path, remote_key: &str, metadata: &[(&str, String)]) -> Delivery {
        let metadata: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.storage.deliver(local_path, remote_key, &metadata, self.ttl).await
    }
}

fn non_empty(value: &str, field: &str) -> JobResult<()> {
    if value.trim().is_empty() {
        return Err(JobError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
