use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

use super::{StageReport, StageStatus, WorkflowStage};
use crate::error::{JobError, JobResult};
use crate::schedule::processors::{ArtifactDelivery, TaskContext, TaskProcessor};
use crate::schedule::types::{
    DownloadParams, SpeechParams, Task, TaskConfig, TaskParams, TaskResult, TaskStatus, TaskType,
    TranscribeParams, TranslateParams, WorkflowParams, WorkflowResult,
};
use crate::schedule::TaskManager;
use crate::storage::object::remote_key;

/// Supervises one workflow. Holds the manager weakly since the manager
/// owns this processor.
pub struct WorkflowProcessor {
    manager: Weak<TaskManager>,
    delivery: ArtifactDelivery,
    stage_timeout: Duration,
}

struct Run<'a> {
    manager: Arc<TaskManager>,
    workflow: &'a Task,
    ctx: &'a TaskContext,
    stages: Vec<StageReport>,
}

impl Run<'_> {
    fn record(&mut self, stage: WorkflowStage, task_id: Option<String>, status: StageStatus) {
        self.stages.push(StageReport { stage, task_id, status });
    }

    async fn stage(&mut self, stage: WorkflowStage, params: TaskParams, timeout: Duration) -> JobResult<TaskResult> {
        let step = self.stages.len() as u32;
        self.ctx
            .progress
            .report(step, WorkflowStage::ALL.len() as u32, &format!("Running {}", stage.as_str()))
            .await;

        let stage_id = stage.task_id(&self.workflow.id);
        let config = TaskConfig::new(params).with_priority(self.workflow.config.priority);
        self.manager
            .submit_with_id(&stage_id, config)
            .await
            .map_err(|e| JobError::stage(stage.as_str(), e))?;

        let finished = tokio::select! {
            result = self.manager.wait_for_terminal(&stage_id, timeout) => result,
            _ = self.ctx.cancel.cancelled() => Err(JobError::Timeout(format!("workflow stopped during {}", stage.as_str()))),
        };
        let finished = match finished {
            Ok(finished) => finished,
            Err(e) => {
                self.record(stage, Some(stage_id), StageStatus::Failed);
                return Err(JobError::stage(stage.as_str(), e));
            }
        };

        match (finished.status, finished.result) {
            (TaskStatus::Completed, Some(result)) => {
                info!("Workflow {} stage {} completed", self.workflow.id, stage.as_str());
                self.record(stage, Some(stage_id), StageStatus::Completed);
                Ok(result)
            }
            _ => {
                warn!("Workflow {} stopped at stage {}", self.workflow.id, stage.as_str());
                let source = finished
                    .error
                    .as_ref()
                    .map(JobError::from)
                    .unwrap_or_else(|| JobError::Internal(format!("stage {} has no result", stage_id)));
                self.record(stage, Some(stage_id), StageStatus::Failed);
                Err(JobError::stage(stage.as_str(), source))
            }
        }
    }
}

fn unexpected(stage: WorkflowStage) -> JobError {
    JobError::stage(stage.as_str(), JobError::Internal("unexpected stage result".into()))
}

impl WorkflowProcessor {
    pub fn new(manager: Weak<TaskManager>, delivery: ArtifactDelivery, stage_timeout: Duration) -> Self {
        Self {
            manager,
            delivery,
            stage_timeout,
        }
    }

    fn manager(&self) -> JobResult<Arc<TaskManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| JobError::Unavailable("task manager".into()))
    }

    async fn run_stages(&self, run: &mut Run<'_>, params: &WorkflowParams) -> JobResult<TaskResult> {
        let audio_path: PathBuf = match (&params.input_url, &params.input_path) {
            (Some(url), _) => {
                let download = TaskParams::Download(DownloadParams {
                    url: url.clone(),
                    format_preference: "audio".to_string(),
                });
                match run.stage(WorkflowStage::Download, download, self.stage_timeout).await? {
                    TaskResult::Download(r) => r.file_path,
                    _ => return Err(unexpected(WorkflowStage::Download)),
                }
            }
            (None, Some(path)) => {
                run.record(WorkflowStage::Download, None, StageStatus::Skipped);
                path.clone()
            }
            (None, None) => return Err(JobError::Validation("input_url or input_path is required".into())),
        };

        let transcribe = TaskParams::Transcribe(TranscribeParams {
            audio_path,
            language: params.source_language.clone(),
            model_size: params.model_size.clone(),
        });
        let transcript = match run.stage(WorkflowStage::Transcribe, transcribe, self.stage_timeout).await? {
            TaskResult::Transcribe(r) => r,
            _ => return Err(unexpected(WorkflowStage::Transcribe)),
        };

        let translate = TaskParams::Translate(TranslateParams {
            text: transcript.text.clone(),
            target_language: params.target_language.clone(),
            source_language: params.source_language.clone().or(Some(transcript.language.clone())),
        });
        let translation = match run.stage(WorkflowStage::Translate, translate, self.stage_timeout).await? {
            TaskResult::Translate(r) => r,
            _ => return Err(unexpected(WorkflowStage::Translate)),
        };

        let synthesize = TaskParams::TextToSpeech(SpeechParams {
            text: translation.translated_text.clone(),
            language: params.target_language.clone(),
            voice: params.voice.clone(),
            provider: params.tts_provider.clone(),
        });
        let speech = match run.stage(WorkflowStage::Synthesize, synthesize, self.stage_timeout).await? {
            TaskResult::TextToSpeech(r) => r,
            _ => return Err(unexpected(WorkflowStage::Synthesize)),
        };
        run.ctx.progress.report(4, 4, "Delivering").await;

        let delivery = self
            .delivery
            .deliver(
                &speech.audio_path,
                &remote_key("workflows", &run.workflow.id, &speech.audio_path),
                &[
                    ("workflow_id", run.workflow.id.clone()),
                    ("target_language", params.target_language.clone()),
                ],
            )
            .await;
        info!("Workflow {} completed", run.workflow.id);

        Ok(TaskResult::Workflow(WorkflowResult {
            workflow_id: run.workflow.id.clone(),
            stages: std::mem::take(&mut run.stages),
            transcript: Some(transcript.text),
            translation: Some(translation.translated_text),
            audio_path: Some(speech.audio_path),
            delivery: Some(delivery),
        }))
    }

    fn params<'a>(&self, params: &'a TaskParams) -> JobResult<&'a WorkflowParams> {
        match params {
            TaskParams::Workflow(p) => Ok(p),
            other => Err(crate::schedule::processors::wrong_params(TaskType::Workflow, other)),
        }
    }
}

#[async_trait]
impl TaskProcessor for WorkflowProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Workflow
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = self.params(&task.config.params)?;
        let mut run = Run {
            manager: self.manager()?,
            workflow: task,
            ctx,
            stages: Vec::new(),
        };
        info!("Starting workflow {}", task.id);

        match self.run_stages(&mut run, params).await {
            Ok(result) => Ok(result),
            Err(source) => Err(JobError::Workflow {
                stages: run.stages,
                source: Box::new(source),
            }),
        }
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        let params = self.params(params)?;
        match (&params.input_url, &params.input_path) {
            (Some(_), Some(_)) => {
                return Err(JobError::Validation("give input_url or input_path, not both".into()));
            }
            (None, None) => return Err(JobError::Validation("input_url or input_path is required".into())),
            _ => {}
        }
        if params.target_language.trim().is_empty() {
            return Err(JobError::Validation("target_language must not be empty".into()));
        }

        let manager = self.manager()?;
        let mut needed = vec![TaskType::Transcribe, TaskType::Translate, TaskType::TextToSpeech];
        if params.input_url.is_some() {
            needed.push(TaskType::Download);
        }
        for task_type in needed {
            manager.processor(task_type)?;
        }
        Ok(())
    }

    async fn cleanup(&self, _task: &Task) -> anyhow::Result<()> {
        // the stage jobs own the artifacts
        Ok(())
    }
}
