use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use super::submit;
use crate::error::ErrorInfo;
use crate::media::{MediaDomain, Operation};
use crate::schedule::types::{DownloadParams, PipelineParams, TaskParams, TaskProgress, TaskResult, TaskStatus};
use crate::web::response::{ok, ApiError, ApiResult};
use crate::AppContext;

const UPLOAD_LIMIT: usize = 1024 * 1024 * 1024;

pub fn media_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/", get(health))
        .route("/download", post(download))
        .route("/download/:task_id", get(download_result))
        .route("/upload", post(upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)))
        .route("/process/video", post(process_video))
        .route("/process/audio", post(process_audio))
        .route("/status/:task_id", get(task_status))
        .route("/files", get(list_files))
}

async fn health() -> impl IntoResponse {
    Json(json!({"message": "Media processing API is running", "status": "healthy"}))
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default = "default_format")]
    pub format_preference: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

fn default_format() -> String {
    "best".to_string()
}

async fn download(State(ctx): State<Arc<AppContext>>, Json(req): Json<DownloadRequest>) -> ApiResult {
    let params = TaskParams::Download(DownloadParams {
        url: req.url,
        format_preference: req.format_preference,
    });
    submit(&ctx, params, req.callback_url, "Download started").await
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub input_path: PathBuf,
    pub operations: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

async fn process(ctx: &AppContext, domain: MediaDomain, req: ProcessRequest) -> ApiResult {
    let operations = Operation::parse_list(domain, &req.operations, &req.parameters)?;
    let pipeline = PipelineParams {
        input_path: req.input_path,
        operations,
    };
    let (params, message) = match domain {
        MediaDomain::Video => (TaskParams::VideoProcess(pipeline), "Video processing started"),
        MediaDomain::Audio => (TaskParams::AudioProcess(pipeline), "Audio processing started"),
    };
    submit(ctx, params, req.callback_url, message).await
}

async fn process_video(State(ctx): State<Arc<AppContext>>, Json(req): Json<ProcessRequest>) -> ApiResult {
    process(&ctx, MediaDomain::Video, req).await
}

async fn process_audio(State(ctx): State<Arc<AppContext>>, Json(req): Json<ProcessRequest>) -> ApiResult {
    process(&ctx, MediaDomain::Audio, req).await
}

#[derive(Debug, Serialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: Option<TaskProgress>,
    pub result_path: Option<PathBuf>,
    pub download_url: Option<String>,
    pub error: Option<ErrorInfo>,
    pub result: Option<TaskResult>,
}

async fn task_status(State(ctx): State<Arc<AppContext>>, Path(task_id): Path<String>) -> ApiResult {
    let task = ctx
        .task_manager
        .get_task(&task_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Task {} not found", task_id)))?;

    let result_path = task
        .result
        .as_ref()
        .and_then(TaskResult::output_path)
        .map(|p| p.to_path_buf());
    let download_url = task
        .result
        .as_ref()
        .and_then(TaskResult::delivery)
        .and_then(|d| d.download_url.clone());

    Ok(ok(TaskStatusView {
        task_id: task.id,
        status: task.status,
        progress: task.progress,
        result_path,
        download_url,
        error: task.error,
        result: task.result,
    }))
}

/// Raw bytes of the job's local artifact, looked up through its result record.
async fn download_result(State(ctx): State<Arc<AppContext>>, Path(task_id): Path<String>) -> ApiResult {
    let task = ctx
        .task_manager
        .get_task(&task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    let path = task
        .result
        .as_ref()
        .and_then(TaskResult::output_path)
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::not_found("File not found")),
        Err(e) => return Err(anyhow::Error::from(e).into()),
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| task_id.clone());

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        content,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Saves the multipart `file` field into the upload directory.
async fn upload(State(ctx): State<Arc<AppContext>>, mut multipart: Multipart) -> ApiResult {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_id = Uuid::new_v4().to_string();
        let extension = field
            .file_name()
            .and_then(|name| std::path::Path::new(name).extension())
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let filename = format!("{}{}", file_id, extension);
        let path = ctx.settings.upload_dir.join(&filename);

        tokio::fs::create_dir_all(&ctx.settings.upload_dir)
            .await
            .map_err(anyhow::Error::from)?;
        let mut file = tokio::fs::File::create(&path).await.map_err(anyhow::Error::from)?;
        let mut size = 0u64;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?
        {
            file.write_all(&chunk).await.map_err(anyhow::Error::from)?;
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(anyhow::Error::from)?;
        info!("Uploaded {} ({} bytes)", path.display(), size);

        return Ok(ok(UploadedFile {
            file_id,
            filename,
            path,
            size,
        }));
    }
    Err(ApiError::bad_request("missing multipart field `file`"))
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

async fn list_files(State(ctx): State<Arc<AppContext>>) -> ApiResult {
    let mut files = Vec::new();
    for (dir, kind) in [
        (&ctx.settings.upload_dir, "uploaded"),
        (&ctx.settings.processed_dir, "processed"),
    ] {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(anyhow::Error::from(e).into()),
        };
        while let Some(entry) = entries.next_entry().await.map_err(anyhow::Error::from)? {
            let meta = entry.metadata().await.map_err(anyhow::Error::from)?;
            if !meta.is_file() {
                continue;
            }
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size: meta.len(),
                kind,
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ok(json!({ "files": files })))
}
