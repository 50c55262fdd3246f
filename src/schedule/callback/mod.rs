use async_trait::async_trait;
use anyhow::Result;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::ErrorInfo;
use crate::schedule::types::{Task, TaskProgress, TaskResult, TaskStatus};

/// Notified when a job reaches a terminal state.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn on_complete(&self, task: &Task, result: &TaskResult) -> Result<()>;
    async fn on_error(&self, task: &Task, error: &ErrorInfo) -> Result<()>;
}

/// Posts the terminal state to a client-supplied URL.
pub struct HttpCallback {
    client: reqwest::Client,
    callback_url: String,
}

#[derive(Debug, Serialize)]
struct CallbackPayload<'a, T> {
    task_id: &'a str,
    status: TaskStatus,
    data: T,
}

impl HttpCallback {
    pub fn new(client: reqwest::Client, callback_url: String) -> Self {
        Self { client, callback_url }
    }

    async fn send_callback<T: Serialize + Send>(&self, payload: CallbackPayload<'_, T>) -> Result<()> {
        self.client
            .post(&self.callback_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl TaskCallback for HttpCallback {
    async fn on_complete(&self, task: &Task, result: &TaskResult) -> Result<()> {
        self.send_callback(CallbackPayload {
            task_id: &task.id,
            status: TaskStatus::Completed,
            data: result,
        })
        .await
    }

    async fn on_error(&self, task: &Task, error: &ErrorInfo) -> Result<()> {
        self.send_callback(CallbackPayload {
            task_id: &task.id,
            status: TaskStatus::Failed,
            data: error,
        })
        .await
    }
}

#[derive(Debug, Clone)]
pub enum TaskEvent {
    StatusChanged { task_id: String, status: TaskStatus },
    Progress { task_id: String, progress: TaskProgress },
    Completed { task_id: String, result: Box<TaskResult> },
    Failed { task_id: String, error: ErrorInfo },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::StatusChanged { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// In-process broadcast of job events.
#[derive(Clone)]
pub struct EventCallback {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventCallback {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn sender(&self) -> broadcast::Sender<TaskEvent> {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    pub fn status_changed(&self, task_id: &str, status: TaskStatus) {
        self.publish(TaskEvent::StatusChanged {
            task_id: task_id.to_string(),
            status,
        });
    }
}

#[async_trait]
impl TaskCallback for EventCallback {
    async fn on_complete(&self, task: &Task, result: &TaskResult) -> Result<()> {
        self.publish(TaskEvent::Completed {
            task_id: task.id.clone(),
            result: Box::new(result.clone()),
        });
        Ok(())
    }

    async fn on_error(&self, task: &Task, error: &ErrorInfo) -> Result<()> {
        self.publish(TaskEvent::Failed {
            task_id: task.id.clone(),
            error: error.clone(),
        });
        Ok(())
    }
}
