use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::schedule::callback::TaskEvent;
use crate::schedule::types::TaskProgress;
use crate::storage::task::TaskStorage;

/// Receives advisory progress from running jobs. Reporting never fails the job.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, current: u32, total: u32, status: &str);
}

/// Discards progress.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _current: u32, _total: u32, _status: &str) {}
}

/// Writes progress onto the job record and publishes it as an event.
pub struct TaskProgressReporter {
    task_id: String,
    storage: Arc<dyn TaskStorage>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskProgressReporter {
    pub fn new(task_id: impl Into<String>, storage: Arc<dyn TaskStorage>, events: broadcast::Sender<TaskEvent>) -> Self {
        Self {
            task_id: task_id.into(),
            storage,
            events,
        }
    }
}

#[async_trait]
impl ProgressSink for TaskProgressReporter {
    async fn report(&self, current: u32, total: u32, status: &str) {
        let progress = TaskProgress {
            current,
            total,
            status: status.to_string(),
        };
        debug!("Task {} progress {}/{}: {}", self.task_id, current, total, status);

        match self.storage.update_progress(&self.task_id, &progress).await {
            Ok(true) => {
                // no subscribers is fine
                let _ = self.events.send(TaskEvent::Progress {
                    task_id: self.task_id.clone(),
                    progress,
                });
            }
            Ok(false) => debug!("Ignoring progress for finished task {}", self.task_id),
            Err(e) => warn!("Failed to record progress for task {}: {}", self.task_id, e),
        }
    }
}
