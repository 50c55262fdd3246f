use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use super::{non_empty, wrong_params, ArtifactDelivery, TaskContext, TaskProcessor};
use crate::ai::AiServices;
use crate::error::{JobError, JobResult};
use crate::schedule::types::{SpeechParams, SpeechResult, Task, TaskParams, TaskResult, TaskType};

pub struct SpeechProcessor {
    ai: AiServices,
    output_dir: PathBuf,
    delivery: ArtifactDelivery,
}

impl SpeechProcessor {
    pub fn new(ai: AiServices, output_dir: impl Into<PathBuf>, delivery: ArtifactDelivery) -> Self {
        Self {
            ai,
            output_dir: output_dir.into(),
            delivery,
        }
    }

    fn params<'a>(&self, params: &'a TaskParams) -> JobResult<&'a SpeechParams> {
        match params {
            TaskParams::TextToSpeech(p) => Ok(p),
            other => Err(wrong_params(TaskType::TextToSpeech, other)),
        }
    }
}

#[async_trait]
impl TaskProcessor for SpeechProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::TextToSpeech
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = self.params(&task.config.params)?;
        let provider = params.provider.as_deref().unwrap_or(self.ai.default_provider());
        info!("Synthesizing speech for task {} with {}", task.id, provider);
        ctx.progress.report(0, 2, "Synthesizing").await;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_dir.join(format!("{}_speech.mp3", task.id));
        let speech = tokio::select! {
            result = self.ai.synthesize(
                &params.text,
                &params.language,
                params.voice.as_deref(),
                params.provider.as_deref(),
                &output,
            ) => result?,
            _ = ctx.cancel.cancelled() => return Err(JobError::Timeout("speech synthesis".into())),
        };

        ctx.progress.report(1, 2, "Uploading").await;
        let delivery = self
            .delivery
            .deliver(
                &speech.audio_path,
                &format!("speech/{}_speech.mp3", task.id),
                &[
                    ("task_id", task.id.clone()),
                    ("provider", speech.provider.clone()),
                    ("language", speech.language.clone()),
                ],
            )
            .await;

        Ok(TaskResult::TextToSpeech(SpeechResult {
            audio_path: speech.audio_path,
            provider: speech.provider,
            language: speech.language,
            voice: speech.voice,
            delivery,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        let params = self.params(params)?;
        non_empty(&params.text, "text")?;
        non_empty(&params.language, "language")
    }
}
