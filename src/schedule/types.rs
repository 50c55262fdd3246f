use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt::Display;

use crate::ai::TranscriptionSegment;
use crate::error::ErrorInfo;
use crate::media::{MediaInfo, Operation};
use crate::storage::object::{Delivery, UploadedObject};
use crate::workflow::StageReport;

/// Worker queues. Every task type is routed to exactly one of them.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Download,
    Video,
    Audio,
    Ai,
    Storage,
    Workflow,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        Self::Download,
        Self::Video,
        Self::Audio,
        Self::Ai,
        Self::Storage,
        Self::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Ai => "ai",
            Self::Storage => "storage",
            Self::Workflow => "workflow",
        }
    }

    pub fn default_concurrency(&self) -> usize {
        match self {
            Self::Download | Self::Video | Self::Audio | Self::Workflow => 2,
            Self::Ai => 1,
            Self::Storage => 4,
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Download,
    VideoProcess,
    AudioProcess,
    Transcribe,
    Translate,
    TextToSpeech,
    Workflow,
    StorageUpload,
    BatchUpload,
    Cleanup,
    GenerateLinks,
}

impl TaskType {
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Download => QueueName::Download,
            Self::VideoProcess => QueueName::Video,
            Self::AudioProcess => QueueName::Audio,
            Self::Transcribe | Self::Translate | Self::TextToSpeech => QueueName::Ai,
            Self::StorageUpload | Self::BatchUpload | Self::Cleanup | Self::GenerateLinks => QueueName::Storage,
            Self::Workflow => QueueName::Workflow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::VideoProcess => "video_process",
            Self::AudioProcess => "audio_process",
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
            Self::TextToSpeech => "text_to_speech",
            Self::Workflow => "workflow",
            Self::StorageUpload => "storage_upload",
            Self::BatchUpload => "batch_upload",
            Self::Cleanup => "cleanup",
            Self::GenerateLinks => "generate_links",
        }
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Lower ranks are claimed first.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_type: TaskType,
    pub params: TaskParams,
    #[serde(default)]
    pub callback_type: CallbackType,
    #[serde(default)]
    pub priority: TaskPriority,
    /// redeliveries allowed after a lost worker; falls back to the queue default
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// seconds; fall back to the queue defaults
    #[serde(default)]
    pub soft_time_limit: Option<u64>,
    #[serde(default)]
    pub time_limit: Option<u64>,
}

impl TaskConfig {
    pub fn new(params: TaskParams) -> Self {
        Self {
            task_type: params.task_type(),
            params,
            callback_type: CallbackType::None,
            priority: TaskPriority::Normal,
            max_retries: None,
            soft_time_limit: None,
            time_limit: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_callback(mut self, callback_type: CallbackType) -> Self {
        self.callback_type = callback_type;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum TaskParams {
    Download(DownloadParams),
    VideoProcess(PipelineParams),
    AudioProcess(PipelineParams),
    Transcribe(TranscribeParams),
    Translate(TranslateParams),
    TextToSpeech(SpeechParams),
    Workflow(WorkflowParams),
    StorageUpload(UploadParams),
    BatchUpload(BatchUploadParams),
    Cleanup(CleanupParams),
    GenerateLinks(LinksParams),
}

impl TaskParams {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Download(_) => TaskType::Download,
            Self::VideoProcess(_) => TaskType::VideoProcess,
            Self::AudioProcess(_) => TaskType::AudioProcess,
            Self::Transcribe(_) => TaskType::Transcribe,
            Self::Translate(_) => TaskType::Translate,
            Self::TextToSpeech(_) => TaskType::TextToSpeech,
            Self::Workflow(_) => TaskType::Workflow,
            Self::StorageUpload(_) => TaskType::StorageUpload,
            Self::BatchUpload(_) => TaskType::BatchUpload,
            Self::Cleanup(_) => TaskType::Cleanup,
            Self::GenerateLinks(_) => TaskType::GenerateLinks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadParams {
    pub url: String,
    #[serde(default = "DownloadParams::default_format")]
    pub format_preference: String,
}

impl DownloadParams {
    fn default_format() -> String {
        "best".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    pub input_path: PathBuf,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeParams {
    pub audio_path: PathBuf,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "TranscribeParams::default_model")]
    pub model_size: String,
}

impl TranscribeParams {
    pub fn default_model() -> String {
        "base".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateParams {
    pub text: String,
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechParams {
    pub text: String,
    #[serde(default = "SpeechParams::default_language")]
    pub language: String,
    #[serde(default)]
    pub voice: Option<String>,
    /// configured default provider when absent
    #[serde(default)]
    pub provider: Option<String>,
}

impl SpeechParams {
    pub fn default_language() -> String {
        "en".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowParams {
    #[serde(default)]
    pub input_url: Option<String>,
    #[serde(default)]
    pub input_path: Option<PathBuf>,
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub tts_provider: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "TranscribeParams::default_model")]
    pub model_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadParams {
    pub file_path: PathBuf,
    #[serde(default)]
    pub remote_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUploadParams {
    pub file_paths: Vec<PathBuf>,
    #[serde(default = "BatchUploadParams::default_prefix")]
    pub prefix: String,
}

impl BatchUploadParams {
    fn default_prefix() -> String {
        "batch".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupParams {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "CleanupParams::default_age")]
    pub max_age_days: u32,
}

impl CleanupParams {
    fn default_age() -> u32 {
        7
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksParams {
    pub keys: Vec<String>,
    #[serde(default = "LinksParams::default_expiry")]
    pub expires_in: u64,
}

impl LinksParams {
    fn default_expiry() -> u64 {
        3600
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Progress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        Self::Pending,
        Self::Started,
        Self::Progress,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Progress => "PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(status: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == status)
            .ok_or_else(|| format!("Invalid task status: {}", status))
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Advisory progress for polling clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current: u32,
    pub total: u32,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub config: TaskConfig,
    pub progress: Option<TaskProgress>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<ErrorInfo>,
}

impl Task {
    pub fn new(id: impl Into<String>, config: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            config,
            progress: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            heartbeat_at: None,
            result: None,
            error: None,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.config.task_type
    }

    pub fn queue(&self) -> QueueName {
        self.config.task_type.queue()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum TaskResult {
    Download(DownloadResult),
    Pipeline(PipelineResult),
    Transcribe(TranscribeResult),
    Translate(TranslateResult),
    TextToSpeech(SpeechResult),
    Workflow(WorkflowResult),
    Upload(UploadResult),
    BatchUpload(BatchUploadResult),
    Cleanup(CleanupResult),
    Links(LinksResult),
}

impl TaskResult {
    /// Local artifact a client can fetch through `GET /download/{task_id}`.
    pub fn output_path(&self) -> Option<&Path> {
        match self {
            Self::Download(r) => Some(&r.file_path),
            Self::Pipeline(r) => Some(&r.output_path),
            Self::Transcribe(r) => Some(&r.transcript_path),
            Self::Translate(r) => Some(&r.translation_path),
            Self::TextToSpeech(r) => Some(&r.audio_path),
            Self::Workflow(r) => r.audio_path.as_deref(),
            Self::Upload(_) | Self::BatchUpload(_) | Self::Cleanup(_) | Self::Links(_) => None,
        }
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        match self {
            Self::Download(r) => Some(&r.delivery),
            Self::Pipeline(r) => Some(&r.delivery),
            Self::Transcribe(r) => Some(&r.delivery),
            Self::Translate(r) => Some(&r.delivery),
            Self::TextToSpeech(r) => Some(&r.delivery),
            Self::Workflow(r) => r.delivery.as_ref(),
            Self::Upload(_) | Self::BatchUpload(_) | Self::Cleanup(_) | Self::Links(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub url: String,
    pub file_path: PathBuf,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub format_preference: String,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub operations_applied: Vec<String>,
    pub metadata: MediaInfo,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeResult {
    pub text: String,
    pub language: String,
    pub segments: Vec<TranscriptionSegment>,
    pub duration: f64,
    pub transcript_path: PathBuf,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateResult {
    pub translated_text: String,
    pub detected_source_language: String,
    pub target_language: String,
    pub translation_path: PathBuf,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechResult {
    pub audio_path: PathBuf,
    pub provider: String,
    pub language: String,
    pub voice: Option<String>,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub stages: Vec<StageReport>,
    pub transcript: Option<String>,
    pub translation: Option<String>,
    pub audio_path: Option<PathBuf>,
    pub delivery: Option<Delivery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub object: UploadedObject,
    pub download_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUploadResult {
    pub uploaded: Vec<UploadedObject>,
    pub failed: Vec<FileFailure>,
    pub total: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResult {
    pub scanned: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOutcome {
    pub key: String,
    pub url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksResult {
    pub links: Vec<LinkOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum CallbackType {
    Http { url: String },
    #[default]
    None,
}
