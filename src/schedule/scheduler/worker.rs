use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use anyhow::Result;

use crate::schedule::types::QueueName;
use super::TaskManager;

/// One worker slot: claims jobs from a single queue and runs them one at a time.
pub struct TaskWorker {
    task_manager: Arc<TaskManager>,
    queue: QueueName,
    slot: usize,
    // fallback poll when no wake-up arrives
    interval: Duration,
    shutdown: CancellationToken,
}

impl TaskWorker {
    pub fn new(task_manager: Arc<TaskManager>, queue: QueueName, slot: usize, shutdown: CancellationToken) -> Self {
        Self {
            task_manager,
            queue,
            slot,
            interval: Duration::from_secs(1),
            shutdown,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(&self) {
        info!("Worker {}#{} started", self.queue, self.slot);
        let waker = self
            .task_manager
            .waker(self.queue)
            .unwrap_or_else(|| Arc::new(Notify::new()));

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.process_next_task().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = waker.notified() => {}
                        _ = sleep(self.interval) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!("Worker {}#{} error: {}", self.queue, self.slot, e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!("Worker {}#{} stopped", self.queue, self.slot);
    }

    async fn process_next_task(&self) -> Result<bool> {
        let task = match self.task_manager.claim(self.queue).await? {
            Some(task) => task,
            None => return Ok(false),
        };
        debug!("Worker {}#{} claimed task {}", self.queue, self.slot, task.id);

        self.task_manager.run_task(task).await?;
        Ok(true)
    }
}
