use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;
use crate::schedule::types::{QueueName, Task, TaskProgress, TaskResult, TaskStatus};
use crate::web::Pagination;

pub mod sqlite;

pub use sqlite::SqliteTaskStorage;

/// Job records keyed by task id. Terminal records are never modified.
#[async_trait]
pub trait TaskStorage: Send + Sync + 'static {
    /// Inserts a new PENDING record. Returns false when the id already exists.
    async fn insert(&self, task: &Task) -> Result<bool>;

    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    /// Atomically moves the oldest highest-priority PENDING job of `queue`
    /// to STARTED.
    async fn claim_next(&self, queue: QueueName) -> Result<Option<Task>>;

    /// Records progress on a running job. `current` never decreases.
    async fn update_progress(&self, task_id: &str, progress: &TaskProgress) -> Result<bool>;

    async fn heartbeat(&self, task_id: &str) -> Result<()>;

    /// Writes the terminal state unless the record is already terminal.
    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool>;

    /// Running jobs whose heartbeat is older than `before`.
    async fn list_stale(&self, before: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Puts a running job back to PENDING for redelivery.
    async fn requeue(&self, task_id: &str) -> Result<bool>;

    /// Terminal jobs completed before `before`.
    async fn list_expired(&self, before: DateTime<Utc>) -> Result<Vec<Task>>;

    async fn list(&self, pagination: &Pagination) -> Result<Vec<Task>>;

    async fn stats(&self) -> Result<TaskStats>;

    async fn delete(&self, task_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: u64,
    pub started: u64,
    pub progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl TaskStats {
    pub fn add(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Started => self.started += count,
            TaskStatus::Progress => self.progress += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
        }
        self.total += count;
    }
}
