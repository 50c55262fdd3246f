use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{wrong_params, ArtifactDelivery, TaskContext, TaskProcessor};
use crate::ai::AiServices;
use crate::error::{JobError, JobResult};
use crate::schedule::types::{Task, TaskParams, TaskResult, TaskType, TranscribeParams, TranscribeResult};

const MODEL_SIZES: [&str; 7] = ["tiny", "base", "small", "medium", "large", "large-v2", "large-v3"];

#[derive(Clone)]
pub struct TranscribeProcessor {
    ai: AiServices,
    output_dir: PathBuf,
    delivery: ArtifactDelivery,
}

impl TranscribeProcessor {
    pub fn new(ai: AiServices, output_dir: impl Into<PathBuf>, delivery: ArtifactDelivery) -> Self {
        Self {
            ai,
            output_dir: output_dir.into(),
            delivery,
        }
    }

    fn params<'a>(&self, params: &'a TaskParams) -> JobResult<&'a TranscribeParams> {
        match params {
            TaskParams::Transcribe(p) => Ok(p),
            other => Err(wrong_params(TaskType::Transcribe, other)),
        }
    }
}

#[async_trait]
impl TaskProcessor for TranscribeProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Transcribe
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = self.params(&task.config.params)?;
        info!("Transcribing {} for task {}", params.audio_path.display(), task.id);
        ctx.progress.report(0, 2, "Transcribing").await;

        let transcription = tokio::select! {
            result = self.ai.transcribe(&params.audio_path, params.language.as_deref(), &params.model_size) => result?,
            _ = ctx.cancel.cancelled() => return Err(JobError::Timeout("transcription".into())),
        };

        ctx.progress.report(1, 2, "Saving transcript").await;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let transcript_path = self.output_dir.join(format!("{}_transcript.txt", task.id));
        tokio::fs::write(&transcript_path, transcription.to_transcript()).await?;

        let delivery = self
            .delivery
            .deliver(
                &transcript_path,
                &format!("transcripts/{}_transcript.txt", task.id),
                &[
                    ("task_id", task.id.clone()),
                    ("language", transcription.language.clone()),
                ],
            )
            .await;
        if !delivery.is_delivered() {
            warn!("Transcript of task {} was not uploaded", task.id);
        }

        Ok(TaskResult::Transcribe(TranscribeResult {
            text: transcription.text,
            language: transcription.language,
            segments: transcription.segments,
            duration: transcription.duration,
            transcript_path,
            delivery,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        let params = self.params(params)?;
        if params.audio_path.as_os_str().is_empty() {
            return Err(JobError::Validation("audio_path must not be empty".into()));
        }
        if !MODEL_SIZES.contains(&params.model_size.as_str()) {
            return Err(JobError::Validation(format!("unknown model size: {}", params.model_size)));
        }
        Ok(())
    }
}
