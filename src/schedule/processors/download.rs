use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{non_empty, wrong_params, ArtifactDelivery, TaskContext, TaskProcessor};
use crate::download::{format_selector, Downloader};
use crate::error::{JobError, JobResult};
use crate::schedule::types::{DownloadParams, DownloadResult, Task, TaskParams, TaskResult, TaskType};
use crate::storage::object::remote_key;

pub struct DownloadProcessor {
    downloader: Arc<dyn Downloader>,
    download_dir: PathBuf,
    delivery: ArtifactDelivery,
}

impl DownloadProcessor {
    pub fn new(downloader: Arc<dyn Downloader>, download_dir: impl Into<PathBuf>, delivery: ArtifactDelivery) -> Self {
        Self {
            downloader,
            download_dir: download_dir.into(),
            delivery,
        }
    }

    fn params<'a>(&self, params: &'a TaskParams) -> JobResult<&'a DownloadParams> {
        match params {
            TaskParams::Download(p) => Ok(p),
            other => Err(wrong_params(TaskType::Download, other)),
        }
    }
}

#[async_trait]
impl TaskProcessor for DownloadProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Download
    }

    async fn process(&self, task: &Task, ctx: &TaskContext) -> JobResult<TaskResult> {
        let params = self.params(&task.config.params)?;
        ctx.progress.report(0, 2, "Downloading").await;

        let media = self
            .downloader
            .download(
                &task.id,
                &params.url,
                &params.format_preference,
                &self.download_dir,
                &ctx.cancel,
            )
            .await?;

        ctx.progress.report(1, 2, "Uploading").await;
        let key = remote_key("downloads", &task.id, &media.file_path);
        let delivery = self
            .delivery
            .deliver(
                &media.file_path,
                &key,
                &[("task_id", task.id.clone()), ("source_url", params.url.clone())],
            )
            .await;
        info!("Download task {} finished: {}", task.id, media.file_path.display());

        Ok(TaskResult::Download(DownloadResult {
            url: params.url.clone(),
            file_path: media.file_path,
            title: media.title,
            duration: media.duration,
            format_preference: params.format_preference.clone(),
            delivery,
        }))
    }

    fn validate_params(&self, params: &TaskParams) -> JobResult<()> {
        let params = self.params(params)?;
        non_empty(&params.url, "url")?;
        if !(params.url.starts_with("http://") || params.url.starts_with("https://")) {
            return Err(JobError::Validation(format!("not an http(s) url: {}", params.url)));
        }
        format_selector(&params.format_preference)?;
        Ok(())
    }
}
