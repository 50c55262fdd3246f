use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::schedule::{CallbackType, TaskConfig, TaskParams};
use crate::web::response::{ok, ApiResult};
use crate::AppContext;

pub mod ai;
pub mod media;
pub mod storage;
pub mod tasks;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .merge(media::media_router())
        .nest("/ai", ai::ai_router())
        .nest("/storage", storage::storage_router())
        .merge(storage::files_router())
        .nest("/tasks", tasks::tasks_router())
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct Submitted {
    pub task_id: String,
    pub status: &'static str,
    pub message: String,
}

/// Queues a job and answers without waiting for it.
pub(crate) async fn submit(
    ctx: &AppContext,
    params: TaskParams,
    callback_url: Option<String>,
    message: &str,
) -> ApiResult {
    let mut config = TaskConfig::new(params);
    if let Some(url) = callback_url {
        config = config.with_callback(CallbackType::Http { url });
    }
    let task = ctx.task_manager.submit(config).await?;
    info!("{} as task {}", message, task.id);

    Ok(ok(Submitted {
        task_id: task.id,
        status: "started",
        message: message.to_string(),
    }))
}
