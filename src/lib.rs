pub mod ai;
pub mod config;
pub mod download;
pub mod error;
pub mod media;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;
pub mod workflow;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use tracing::info;

use ai::AiServices;
use config::Settings;
use download::YtDlpDownloader;
use media::{MediaDomain, OperationRegistry, PipelineExecutor, ToolRunner};
use schedule::processors::{
    ArtifactDelivery, BatchUploadProcessor, CleanupProcessor, DownloadProcessor, LinksProcessor, PipelineProcessor,
    SpeechProcessor, TranscribeProcessor, TranslateProcessor, UploadProcessor,
};
use schedule::{TaskManager, TaskStorage};
use storage::object::StorageManager;
use workflow::WorkflowProcessor;

/// Everything the HTTP layer and the workers share. Built once at startup.
pub struct AppContext {
    pub settings: Settings,
    pub storage: StorageManager,
    pub ai: AiServices,
    pub task_manager: Arc<TaskManager>,
}

impl AppContext {
    /// Creates the task manager and registers a processor for every task type.
    pub fn new(
        settings: Settings,
        tasks: Arc<dyn TaskStorage>,
        storage: StorageManager,
        runner: Arc<dyn ToolRunner>,
        ai: AiServices,
    ) -> Self {
        let task_manager = Arc::new(TaskManager::new(tasks, settings.queue.clone()));
        let delivery = ArtifactDelivery::new(storage.clone(), settings.signed_url_ttl);

        let registry = Arc::new(OperationRegistry::new(settings.tools.clone(), runner.clone()));
        let executor = Arc::new(PipelineExecutor::new(registry, &settings.processed_dir));
        for domain in [MediaDomain::Video, MediaDomain::Audio] {
            task_manager.register_processor(Arc::new(PipelineProcessor::new(
                domain,
                executor.clone(),
                delivery.clone(),
            )));
        }

        let downloader = Arc::new(YtDlpDownloader::new(settings.tools.ytdlp.clone(), runner));
        task_manager.register_processor(Arc::new(DownloadProcessor::new(
            downloader,
            &settings.download_dir,
            delivery.clone(),
        )));

        task_manager.register_processor(Arc::new(TranscribeProcessor::new(
            ai.clone(),
            &settings.processed_dir,
            delivery.clone(),
        )));
        task_manager.register_processor(Arc::new(TranslateProcessor::new(
            ai.clone(),
            &settings.processed_dir,
            delivery.clone(),
        )));
        task_manager.register_processor(Arc::new(SpeechProcessor::new(
            ai.clone(),
            &settings.processed_dir,
            delivery.clone(),
        )));

        task_manager.register_processor(Arc::new(UploadProcessor::new(delivery.clone())));
        task_manager.register_processor(Arc::new(BatchUploadProcessor::new(storage.clone())));
        task_manager.register_processor(Arc::new(CleanupProcessor::new(storage.clone())));
        task_manager.register_processor(Arc::new(LinksProcessor::new(storage.clone())));

        task_manager.register_processor(Arc::new(WorkflowProcessor::new(
            Arc::downgrade(&task_manager),
            delivery,
            settings.queue.workflow_time_limit,
        )));
        info!("Registered processors, storage backend: {}", storage.storage_type());

        Self {
            settings,
            storage,
            ai,
            task_manager,
        }
    }
}
