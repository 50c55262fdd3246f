use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use super::{non_empty, wrong_params, ArtifactDelivery, TaskContext, TaskProcessor};
use crate::ai::AiServices;
use crate::error::{JobError, JobResult};
use crate::schedule::types::{Task, TaskParams, TaskResult, TaskType, TranslateParams, TranslateResult};

pub struct TranslateProcessor {
    ai: AiServices,
    output_dir: PathBuf,
    delivery: ArtifactDelivery,
}

impl TranslateProcessor {
    pub fn new(ai: AiServices, output_dir: impl Into<PathBuf>, delivery: ArtifactDelivery) -> Self {
        Self {
            ai,
            output_dir: output_dir.into(),
            delivery,
        }
    }

    fn params<'a>(&self, params: &'a TaskParams) -> JobResult<&'a TranslateParams> {
        match params {
            TaskParams::Translate(p) => Ok(p),
            other => Err(wrong_params(TaskType::Translate, other)),
        }
    }
}

#[async_trait]
impl TaskProcessor for TranslateProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Translate
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = self.params(&task.config.params)?;
        info!("Translating task {} to {}", task.id, params.target_language);
        ctx.progress.report(0, 2, "Translating").await;

        let translation = tokio::select! {
            result = self.ai.translate(&params.text, &params.target_language, params.source_language.as_deref()) => result?,
            _ = ctx.cancel.cancelled() => return Err(JobError::Timeout("translation".into())),
        };

        ctx.progress.report(1, 2, "Saving translation").await;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let translation_path = self.output_dir.join(format!("{}_translation.txt", task.id));
        tokio::fs::write(&translation_path, &translation.translated_text).await?;

        let delivery = self
            .delivery
            .deliver(
                &translation_path,
                &format!("translations/{}_translation.txt", task.id),
                &[
                    ("task_id", task.id.clone()),
                    ("target_language", translation.target_language.clone()),
                ],
            )
            .await;

        Ok(TaskResult::Translate(TranslateResult {
            translated_text: translation.translated_text,
            detected_source_language: translation.detected_source_language,
            target_language: translation.target_language,
            translation_path,
            delivery,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        let params = self.params(params)?;
        non_empty(&params.text, "text")?;
        non_empty(&params.target_language, "target_language")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schedule::progress::NoProgress;
    use crate::schedule::types::TaskConfig;
    use crate::storage::object::{LocalStore, StorageManager};
    use crate::testing::FakeTranslator;
    use anyhow::Result;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn processor(root: &TempDir, ai: AiServices) -> TranslateProcessor {
        let storage = StorageManager::new(Arc::new(LocalStore::new(root.path().join("store"), "/files")));
        TranslateProcessor::new(
            ai,
            root.path().join("processed"),
            ArtifactDelivery::new(storage, Duration::from_secs(60)),
        )
    }

    fn task(id: &str, text: &str) -> Task {
        Task::new(
            id,
            TaskConfig::new(TaskParams::Translate(TranslateParams {
                text: text.to_string(),
                target_language: "es".into(),
                source_language: None,
            })),
        )
    }

    #[tokio::test]
    async fn translation_is_saved() -> Result<()> {
        let root = TempDir::new()?;
        let processor = processor(&root, AiServices::new("google").with_translator(Arc::new(FakeTranslator::default())));
        let ctx = TaskContext {
            cancel: CancellationToken::new(),
            progress: Arc::new(NoProgress),
        };

        assert!(processor.validate_params(&task("x", " ").config.params).is_err());

        let TaskResult::Translate(result) = processor.process(&task("tl-1", "hello"), &ctx).await? else {
            panic!("unexpected result");
        };
        assert_eq!(result.translated_text, "[es] hello");
        assert_eq!(std::fs::read_to_string(&result.translation_path)?, "[es] hello");
        assert_eq!(result.delivery.remote_key, "translations/tl-1_translation.txt");
        Ok(())
    }

    #[tokio::test]
    async fn missing_provider_is_unavailable() -> Result<()> {
        let root = TempDir::new()?;
        let processor = processor(&root, AiServices::new("google"));
        let ctx = TaskContext {
            cancel: CancellationToken::new(),
            progress: Arc::new(NoProgress),
        };
        let err = processor.process(&task("tl-2", "hello"), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        Ok(())
    }
}
