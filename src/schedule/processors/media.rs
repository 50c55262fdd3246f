use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{wrong_params, ArtifactDelivery, TaskContext, TaskProcessor};
use crate::error::{JobError, JobResult};
use crate::media::{MediaDomain, PipelineExecutor};
use crate::schedule::types::{PipelineParams, PipelineResult, Task, TaskParams, TaskResult, TaskType};
use crate::storage::object::remote_key;

/// Runs a video or audio operation pipeline and delivers the result.
pub struct PipelineProcessor {
    domain: MediaDomain,
    executor: Arc<PipelineExecutor>,
    delivery: ArtifactDelivery,
}

impl PipelineProcessor {
    pub fn new(domain: MediaDomain, executor: Arc<PipelineExecutor>, delivery: ArtifactDelivery) -> Self {
        Self {
            domain,
            executor,
            delivery,
        }
    }

    fn params<'a>(&self, params: &'a TaskParams) -> JobResult<&'a PipelineParams> {
        match (self.domain, params) {
            (MediaDomain::Video, TaskParams::VideoProcess(p)) | (MediaDomain::Audio, TaskParams::AudioProcess(p)) => {
                Ok(p)
            }
            _ => Err(wrong_params(self.task_type(), params)),
        }
    }

    fn category(&self) -> &'static str {
        match self.domain {
            MediaDomain::Video => "processed/video",
            MediaDomain::Audio => "processed/audio",
        }
    }
}

#[async_trait]
impl TaskProcessor for PipelineProcessor {
    fn task_type(&self) -> TaskType {
        match self.domain {
            MediaDomain::Video => TaskType::VideoProcess,
            MediaDomain::Audio => TaskType::AudioProcess,
        }
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = self.params(&task.config.params)?;
        info!(
            "Processing task {}: {} operation(s) on {}",
            task.id,
            params.operations.len(),
            params.input_path.display()
        );

        let output = self
            .executor
            .execute(
                &task.id,
                &params.input_path,
                &params.operations,
                ctx.progress.as_ref(),
                &ctx.cancel,
            )
            .await?;

        let key = remote_key(self.category(), &task.id, &output.output_path);
        let delivery = self
            .delivery
            .deliver(
                &output.output_path,
                &key,
                &[
                    ("task_id", task.id.clone()),
                    ("operations", output.operations_applied.join(",")),
                    ("original_file", params.input_path.display().to_string()),
                ],
            )
            .await;
        if !delivery.is_delivered() {
            warn!("Task {} processed but not delivered", task.id);
        }

        Ok(TaskResult::Pipeline(PipelineResult {
            input_path: params.input_path.clone(),
            output_path: output.output_path,
            operations_applied: output.operations_applied,
            metadata: output.metadata,
            delivery,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        let params = self.params(params)?;
        if params.input_path.as_os_str().is_empty() {
            return Err(JobError::Validation("input_path must not be empty".into()));
        }
        if params.operations.is_empty() {
            return Err(JobError::Validation("at least one operation is required".into()));
        }
        for op in &params.operations {
            if op.domain() != self.domain {
                return Err(JobError::Validation(format!(
                    "{} is not a {:?} operation",
                    op.name(),
                    self.domain
                )));
            }
            op.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::media::operation::{NormalizeParams, ResizeParams};
    use crate::media::{Operation, OperationRegistry};
    use crate::schedule::progress::NoProgress;
    use crate::schedule::types::TaskConfig;
    use crate::storage::object::{LocalStore, StorageManager};
    use crate::testing::{tools, write_media, FakeRunner};
    use anyhow::Result;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn processor(root: &TempDir, domain: MediaDomain) -> PipelineProcessor {
        let registry = Arc::new(OperationRegistry::new(tools(), FakeRunner::new()));
        let executor = Arc::new(PipelineExecutor::new(registry, root.path().join("processed")));
        let storage = StorageManager::new(Arc::new(LocalStore::new(root.path().join("store"), "/files")));
        PipelineProcessor::new(domain, executor, ArtifactDelivery::new(storage, Duration::from_secs(60)))
    }

    fn ctx() -> TaskContext {
        TaskContext {
            cancel: CancellationToken::new(),
            progress: Arc::new(NoProgress),
        }
    }

    #[test]
    fn rejects_operations_from_the_other_domain() -> Result<()> {
        let root = TempDir::new()?;
        let audio = processor(&root, MediaDomain::Audio);
        let params = TaskParams::AudioProcess(PipelineParams {
            input_path: "in.wav".into(),
            operations: vec![Operation::ResizeVideo(ResizeParams::default())],
        });
        assert_eq!(audio.validate_params(&params).unwrap_err().kind(), ErrorKind::ValidationError);

        let empty = TaskParams::AudioProcess(PipelineParams {
            input_path: "in.wav".into(),
            operations: Vec::new(),
        });
        assert!(audio.validate_params(&empty).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn normalize_delivers_artifact() -> Result<()> {
        let root = TempDir::new()?;
        let audio = processor(&root, MediaDomain::Audio);
        let input = write_media(&root.path().join("in.wav"), 10.0, "voice");
        let task = Task::new(
            "job-1",
            TaskConfig::new(TaskParams::AudioProcess(PipelineParams {
                input_path: input,
                operations: vec![Operation::NormalizeAudio(NormalizeParams {
                    target_level: -3.0,
                    ..Default::default()
                })],
            })),
        );

        let result = audio.process(&task, &ctx()).await?;
        let TaskResult::Pipeline(result) = result else {
            panic!("unexpected result");
        };
        assert!((result.metadata.duration - 10.0).abs() < 0.1);
        assert_eq!(result.delivery.remote_key, "processed/audio/job-1_job-1_normalize_audio_0.wav");
        assert!(result.delivery.download_url.is_some());

        audio.cleanup(&Task { result: Some(TaskResult::Pipeline(result.clone())), ..task }).await?;
        assert!(!result.output_path.exists());
        Ok(())
    }
}
