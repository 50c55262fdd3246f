use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::web::response::{ok, ApiError, ApiResult};
use crate::web::Pagination;
use crate::AppContext;

pub fn tasks_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/stats", get(task_stats))
        .route("/:task_id", get(get_task))
}

async fn list_tasks(State(ctx): State<Arc<AppContext>>, Query(pagination): Query<Pagination>) -> ApiResult {
    let tasks = ctx.task_manager.list_tasks(&pagination.check()).await?;
    Ok(ok(tasks))
}

async fn task_stats(State(ctx): State<Arc<AppContext>>) -> ApiResult {
    Ok(ok(ctx.task_manager.stats().await?))
}

async fn get_task(State(ctx): State<Arc<AppContext>>, Path(task_id): Path<String>) -> ApiResult {
    match ctx.task_manager.get_task(&task_id).await? {
        Some(task) => Ok(ok(task)),
        None => Err(ApiError::not_found("Task not found")),
    }
}
