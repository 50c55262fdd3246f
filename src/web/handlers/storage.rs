use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::submit;
use crate::schedule::processors::storage::MAX_LINK_SECS;
use crate::schedule::types::{BatchUploadParams, CleanupParams, LinksParams, TaskParams};
use crate::storage::object::{content_type_for, LocalStore, StorageObject, UploadedObject};
use crate::web::response::{ok, ApiError, ApiResult};
use crate::AppContext;

pub fn storage_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/batch-upload", post(batch_upload))
        .route("/cleanup", post(cleanup))
        .route("/links", post(links))
        .route("/download/*key", get(signed_url))
        .route("/list", get(list))
        .route("/info", get(info))
        .route("/*key", delete(remove))
}

/// Serves objects of the local backend under `LOCAL_STORAGE_URL`.
pub fn files_router() -> Router<Arc<AppContext>> {
    Router::new().route("/files/*key", get(serve_file))
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub file_path: PathBuf,
    #[serde(default)]
    pub remote_key: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub object: UploadedObject,
    pub download_url: Option<String>,
}

async fn upload(State(ctx): State<Arc<AppContext>>, Json(req): Json<UploadRequest>) -> ApiResult {
    let key = match req.remote_key {
        Some(key) => key,
        None => {
            let name = req
                .file_path
                .file_name()
                .ok_or_else(|| ApiError::bad_request("file_path has no file name"))?;
            format!("uploads/{}", name.to_string_lossy())
        }
    };
    if !req.file_path.is_file() {
        return Err(ApiError::not_found(format!("{} not found", req.file_path.display())));
    }

    let object = ctx.storage.upload(&req.file_path, &key, &req.metadata).await?;
    let download_url = ctx
        .storage
        .sign_url(&key, ctx.settings.signed_url_ttl)
        .await
        .ok()
        .map(|signed| signed.signed_url);
    Ok(ok(UploadResponse { object, download_url }))
}

async fn batch_upload(State(ctx): State<Arc<AppContext>>, Json(params): Json<BatchUploadParams>) -> ApiResult {
    submit(&ctx, TaskParams::BatchUpload(params), None, "Batch upload started").await
}

async fn cleanup(State(ctx): State<Arc<AppContext>>, Json(params): Json<CleanupParams>) -> ApiResult {
    submit(&ctx, TaskParams::Cleanup(params), None, "Storage cleanup started").await
}

async fn links(State(ctx): State<Arc<AppContext>>, Json(params): Json<LinksParams>) -> ApiResult {
    submit(&ctx, TaskParams::GenerateLinks(params), None, "Link generation started").await
}

#[derive(Debug, Deserialize)]
pub struct SignQuery {
    #[serde(default = "default_expiration")]
    pub expiration: u64,
}

fn default_expiration() -> u64 {
    3600
}

async fn signed_url(
    State(ctx): State<Arc<AppContext>>,
    Path(key): Path<String>,
    Query(query): Query<SignQuery>,
) -> ApiResult {
    if query.expiration == 0 || query.expiration > MAX_LINK_SECS {
        return Err(ApiError::bad_request(format!(
            "expiration must be between 1 and {} seconds",
            MAX_LINK_SECS
        )));
    }
    let signed = ctx
        .storage
        .sign_url(&key, Duration::from_secs(query.expiration))
        .await?;
    Ok(ok(signed))
}

async fn remove(State(ctx): State<Arc<AppContext>>, Path(key): Path<String>) -> ApiResult {
    ctx.storage.delete(&key).await?;
    Ok(ok(json!({ "deleted": key })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Serialize)]
pub struct Listing {
    pub storage_type: &'static str,
    pub files: Vec<StorageObject>,
    pub count: usize,
}

async fn list(State(ctx): State<Arc<AppContext>>, Query(query): Query<ListQuery>) -> ApiResult {
    let files = ctx.storage.list(&query.prefix).await?;
    Ok(ok(Listing {
        storage_type: ctx.storage.storage_type(),
        count: files.len(),
        files,
    }))
}

async fn info(State(ctx): State<Arc<AppContext>>) -> ApiResult {
    Ok(ok(ctx.storage.info()))
}

async fn serve_file(State(ctx): State<Arc<AppContext>>, Path(key): Path<String>) -> ApiResult {
    let local = LocalStore::new(&ctx.settings.local_storage_dir, &ctx.settings.local_storage_url);
    let path = local
        .path_for(&key)
        .map_err(|_| ApiError::not_found("File not found"))?;

    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(_) => return Err(ApiError::not_found("File not found")),
    };
    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], content).into_response())
}
