use async_trait::async_trait;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::info;

use super::{TaskStats, TaskStorage};
use crate::error::ErrorInfo;
use crate::schedule::types::{QueueName, Task, TaskProgress, TaskResult, TaskStatus};
use crate::web::Pagination;

const RUNNING: &str = "('STARTED', 'PROGRESS')";
const TERMINAL: &str = "('COMPLETED', 'FAILED')";

/// Task records in SQLite. Timestamps are stored as unix milliseconds.
pub struct SqliteTaskStorage {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: String,
    status: String,
    config: String,
    progress_current: Option<i64>,
    progress_total: Option<i64>,
    progress_status: Option<String>,
    attempts: i64,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    heartbeat_at: Option<i64>,
    result: Option<String>,
    error: Option<String>,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {}", ms))
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let progress = match (row.progress_current, row.progress_total) {
            (Some(current), Some(total)) => Some(TaskProgress {
                current: current as u32,
                total: total as u32,
                status: row.progress_status.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Task {
            status: row
                .status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            config: serde_json::from_str(&row.config)
                .with_context(|| format!("invalid config for task {}", row.id))?,
            progress,
            attempts: row.attempts as u32,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            started_at: row.started_at.map(from_millis).transpose()?,
            completed_at: row.completed_at.map(from_millis).transpose()?,
            heartbeat_at: row.heartbeat_at.map(from_millis).transpose()?,
            result: row.result.as_deref().map(serde_json::from_str).transpose()?,
            error: row.error.as_deref().map(serde_json::from_str).transpose()?,
            id: row.id,
        })
    }
}

fn rows_to_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

impl SqliteTaskStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Initializing SQLite task storage at {}", database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open {}", database_url))?;
        Self::with_pool(pool).await
    }

    /// Private database that lives as long as the storage. Used by tests.
    pub async fn in_memory() -> Result<Self> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                queue TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                config TEXT NOT NULL,
                progress_current INTEGER,
                progress_total INTEGER,
                progress_status TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                heartbeat_at INTEGER,
                result TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks (queue, status, priority, created_at)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskStorage for SqliteTaskStorage {
    async fn insert(&self, task: &Task) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO tasks
            (id, task_type, queue, status, priority, config, attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(task.task_type().as_str())
        .bind(task.queue().as_str())
        .bind(task.status.as_str())
        .bind(task.config.priority.rank())
        .bind(serde_json::to_string(&task.config)?)
        .bind(task.attempts as i64)
        .bind(task.created_at.timestamp_millis())
        .bind(task.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn claim_next(&self, queue: QueueName) -> Result<Option<Task>> {
        let now = Utc::now().timestamp_millis();
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            UPDATE tasks
            SET status = 'STARTED',
                attempts = attempts + 1,
                started_at = ?,
                heartbeat_at = ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM tasks
                WHERE queue = ? AND status = 'PENDING'
                ORDER BY priority ASC, created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn update_progress(&self, task_id: &str, progress: &TaskProgress) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let query = format!(
            r#"
            UPDATE tasks
            SET status = 'PROGRESS',
                progress_current = MAX(COALESCE(progress_current, 0), ?),
                progress_total = ?,
                progress_status = ?,
                heartbeat_at = ?,
                updated_at = ?
            WHERE id = ? AND status IN {}
            "#,
            RUNNING
        );
        let result = sqlx::query(&query)
            .bind(progress.current as i64)
            .bind(progress.total as i64)
            .bind(&progress.status)
            .bind(now)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(&self, task_id: &str) -> Result<()> {
        let query = format!("UPDATE tasks SET heartbeat_at = ? WHERE id = ? AND status IN {}", RUNNING);
        sqlx::query(&query)
            .bind(Utc::now().timestamp_millis())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&TaskResult>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool> {
        anyhow::ensure!(status.is_terminal(), "{} is not a terminal status", status);

        let now = Utc::now().timestamp_millis();
        let query = format!(
            r#"
            UPDATE tasks
            SET status = ?, result = ?, error = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN {}
            "#,
            TERMINAL
        );
        let outcome = sqlx::query(&query)
            .bind(status.as_str())
            .bind(result.map(serde_json::to_string).transpose()?)
            .bind(error.map(serde_json::to_string).transpose()?)
            .bind(now)
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn list_stale(&self, before: DateTime<Utc>) -> Result<Vec<Task>> {
        let query = format!(
            "SELECT * FROM tasks WHERE status IN {} AND COALESCE(heartbeat_at, started_at, 0) < ?",
            RUNNING
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&query)
            .bind(before.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows_to_tasks(rows)
    }

    async fn requeue(&self, task_id: &str) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE tasks
            SET status = 'PENDING', started_at = NULL, heartbeat_at = NULL,
                progress_current = NULL, progress_total = NULL, progress_status = NULL,
                updated_at = ?
            WHERE id = ? AND status IN {}
            "#,
            RUNNING
        );
        let result = sqlx::query(&query)
            .bind(Utc::now().timestamp_millis())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(&self, before: DateTime<Utc>) -> Result<Vec<Task>> {
        let query = format!(
            "SELECT * FROM tasks WHERE status IN {} AND completed_at < ? ORDER BY completed_at",
            TERMINAL
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&query)
            .bind(before.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows_to_tasks(rows)
    }

    async fn list(&self, pagination: &Pagination) -> Result<Vec<Task>> {
        let pagination = pagination.check();
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?")
                .bind(pagination.limit() as i64)
                .bind(pagination.offset() as i64)
                .fetch_all(&self.pool)
                .await?;
        rows_to_tasks(rows)
    }

    async fn stats(&self) -> Result<TaskStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = TaskStats::default();
        for (status, count) in rows {
            let status: TaskStatus = status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            stats.add(status, count as u64);
        }
        Ok(stats)
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
