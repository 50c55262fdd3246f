mod task_manager;
mod worker;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use tracing::{error, info};

pub use task_manager::{SweepStats, TaskManager};
use worker::TaskWorker;
use crate::schedule::types::QueueName;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Worker pool plus the maintenance sweeper.
pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    sweep_interval: Duration,
}

impl TaskScheduler {
    pub fn new(task_manager: Arc<TaskManager>) -> Self {
        Self {
            task_manager,
            workers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            poll_interval: Duration::from_secs(1),
            sweep_interval: SWEEP_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub async fn spawn_worker(&self, queue: QueueName) {
        let mut workers = self.workers.lock().await;
        let worker = TaskWorker::new(self.task_manager.clone(), queue, workers.len(), self.shutdown.clone())
            .with_interval(self.poll_interval);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        workers.push(handle);
    }

    /// Starts the configured number of slots for every queue.
    pub async fn spawn_pool(&self) {
        for queue in QueueName::ALL {
            let slots = self.task_manager.settings().concurrency_for(queue);
            info!("Starting {} worker(s) for queue {}", slots, queue);
            for _ in 0..slots {
                self.spawn_worker(queue).await;
            }
        }
    }

    /// Sweeps once immediately, then periodically until shutdown, then
    /// waits for the workers to drain.
    pub async fn run(&self) -> Result<()> {
        loop {
            if let Err(e) = self.task_manager.sweep().await {
                error!("Error sweeping tasks: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            worker.await?;
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("Stopping scheduler");
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
