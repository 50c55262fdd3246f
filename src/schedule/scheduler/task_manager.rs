use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::error::{ErrorInfo, ErrorKind, JobError, JobResult};
use crate::schedule::callback::{EventCallback, HttpCallback, TaskCallback, TaskEvent};
use crate::schedule::processors::{TaskContext, TaskProcessor};
use crate::schedule::progress::TaskProgressReporter;
use crate::schedule::types::{CallbackType, QueueName, Task, TaskConfig, TaskResult, TaskStatus, TaskType};
use crate::storage::task::{TaskStats, TaskStorage};
use crate::web::Pagination;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CAPACITY: usize = 256;

/// Owns job records, processors and the per-queue wake-ups. Workers and the
/// HTTP layer share one instance.
pub struct TaskManager {
    storage: Arc<dyn TaskStorage>,
    processors: RwLock<HashMap<TaskType, Arc<dyn TaskProcessor>>>,
    settings: QueueSettings,
    events: EventCallback,
    wakers: HashMap<QueueName, Arc<Notify>>,
    http: reqwest::Client,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStats {
    pub requeued: usize,
    pub lost: usize,
    pub expired: usize,
}

impl TaskManager {
    pub fn new(storage: Arc<dyn TaskStorage>, settings: QueueSettings) -> Self {
        Self {
            storage,
            processors: RwLock::new(HashMap::new()),
            settings,
            events: EventCallback::new(EVENT_CAPACITY),
            wakers: QueueName::ALL
                .iter()
                .map(|queue| (*queue, Arc::new(Notify::new())))
                .collect(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn storage(&self) -> &Arc<dyn TaskStorage> {
        &self.storage
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn register_processor(&self, processor: Arc<dyn TaskProcessor>) {
        let task_type = processor.task_type();
        info!("Registering processor for task type: {}", task_type.as_str());
        match self.processors.write() {
            Ok(mut processors) => {
                processors.insert(task_type, processor);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(task_type, processor);
            }
        }
    }

    pub fn processor(&self, task_type: TaskType) -> JobResult<Arc<dyn TaskProcessor>> {
        let processors = self
            .processors
            .read()
            .map_err(|_| JobError::Internal("processor registry poisoned".into()))?;
        processors
            .get(&task_type)
            .cloned()
            .ok_or_else(|| JobError::Unavailable(format!("processor for {}", task_type.as_str())))
    }

    pub fn has_processor(&self, task_type: TaskType) -> bool {
        self.processor(task_type).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub(crate) fn waker(&self, queue: QueueName) -> Option<Arc<Notify>> {
        self.wakers.get(&queue).cloned()
    }

    /// Validates and queues a job under a fresh id. Returns immediately.
    pub async fn submit(&self, config: TaskConfig) -> JobResult<Task> {
        self.submit_with_id(&Uuid::new_v4().to_string(), config).await
    }

    /// Queues a job under a caller-chosen id. Submitting an id that already
    /// exists returns the existing record unchanged.
    pub async fn submit_with_id(&self, task_id: &str, config: TaskConfig) -> JobResult<Task> {
        if config.params.task_type() != config.task_type {
            return Err(JobError::Validation(format!(
                "task type {} does not match {} params",
                config.task_type.as_str(),
                config.params.task_type().as_str()
            )));
        }
        self.processor(config.task_type)?.validate_params(&config.params)?;

        let task = Task::new(task_id, config);
        if !self.storage.insert(&task).await? {
            info!("Task {} already exists, not queued again", task_id);
            return self
                .storage
                .get(task_id)
                .await?
                .ok_or_else(|| JobError::Internal(format!("task {} vanished", task_id)));
        }

        info!("Queued {} task {} on {}", task.task_type().as_str(), task.id, task.queue().as_str());
        self.events.status_changed(&task.id, TaskStatus::Pending);
        if let Some(waker) = self.waker(task.queue()) {
            waker.notify_one();
        }
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.storage.get(task_id).await
    }

    pub async fn list_tasks(&self, pagination: &Pagination) -> Result<Vec<Task>> {
        self.storage.list(pagination).await
    }

    pub async fn stats(&self) -> Result<TaskStats> {
        self.storage.stats().await
    }

    pub async fn claim(&self, queue: QueueName) -> Result<Option<Task>> {
        self.storage.claim_next(queue).await
    }

    /// Blocks until the job is COMPLETED or FAILED, or `timeout` passes.
    pub async fn wait_for_terminal(&self, task_id: &str, timeout: Duration) -> JobResult<Task> {
        let mut events = self.events.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            match self.storage.get(task_id).await? {
                Some(task) if task.status.is_terminal() => return Ok(task),
                Some(_) => {}
                None => return Err(JobError::NotFound(format!("task {}", task_id))),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(JobError::Timeout(format!("task {} did not finish in time", task_id)));
            }

            // wake early on this job's terminal event, poll otherwise
            let _ = tokio::time::timeout(remaining.min(POLL_INTERVAL), async {
                loop {
                    match events.recv().await {
                        Ok(event) if event.task_id() == task_id && event.is_terminal() => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
                    }
                }
            })
            .await;
        }
    }

    fn limits(&self, task: &Task) -> (Duration, Duration) {
        let hard = task
            .config
            .time_limit
            .map(Duration::from_secs)
            .unwrap_or(match task.task_type() {
                TaskType::Workflow => self.settings.workflow_time_limit,
                _ => self.settings.time_limit,
            });
        let soft = task
            .config
            .soft_time_limit
            .map(Duration::from_secs)
            .unwrap_or(match task.task_type() {
                TaskType::Workflow => hard,
                _ => self.settings.soft_time_limit,
            });
        (soft.min(hard), hard)
    }

    fn max_retries(&self, task: &Task) -> u32 {
        task.config.max_retries.unwrap_or(self.settings.max_retries)
    }

    /// Runs one claimed job to its terminal state under the soft and hard
    /// time limits, keeping its heartbeat fresh meanwhile.
    pub async fn run_task(&self, task: Task) -> Result<()> {
        let processor = match self.processor(task.task_type()) {
            Ok(processor) => processor,
            Err(e) => return self.fail(&task, e.to_info()).await,
        };

        info!("Processing {} task {} (attempt {})", task.task_type().as_str(), task.id, task.attempts);
        self.events.status_changed(&task.id, TaskStatus::Started);

        let (soft, hard) = self.limits(&task);
        let cancel = CancellationToken::new();
        let ctx = TaskContext {
            cancel: cancel.clone(),
            progress: Arc::new(TaskProgressReporter::new(
                task.id.clone(),
                self.storage.clone(),
                self.events.sender(),
            )),
        };

        let heartbeat = {
            let storage = self.storage.clone();
            let task_id = task.id.clone();
            let every = (self.settings.lease / 3).max(Duration::from_millis(500));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(every).await;
                    if let Err(e) = storage.heartbeat(&task_id).await {
                        warn!("Heartbeat for task {} failed: {}", task_id, e);
                    }
                }
            })
        };
        let soft_timer = {
            let cancel = cancel.clone();
            let task_id = task.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(soft).await;
                warn!("Task {} reached its soft time limit ({}s)", task_id, soft.as_secs());
                cancel.cancel();
            })
        };

        // a separate task so a panicking processor surfaces as a JoinError
        let mut handle = {
            let task = task.clone();
            tokio::spawn(async move { processor.process(&task, &ctx).await })
        };
        let outcome = tokio::time::timeout(hard, &mut handle).await;
        heartbeat.abort();
        soft_timer.abort();

        match outcome {
            Ok(Ok(Ok(result))) => self.complete(&task, result).await,
            Ok(Ok(Err(e))) => {
                error!("Task {} failed: {}", task.id, e);
                self.fail(&task, e.to_info()).await
            }
            Ok(Err(join_error)) => {
                error!("Task {} worker crashed: {}", task.id, join_error);
                self.recover_lost(&task).await.map(|_| ())
            }
            Err(_) => {
                cancel.cancel();
                handle.abort();
                let message = format!("hard time limit of {}s exceeded", hard.as_secs());
                error!("Task {}: {}", task.id, message);
                self.fail(&task, ErrorInfo::new(ErrorKind::Timeout, message)).await
            }
        }
    }

    async fn complete(&self, task: &Task, result: TaskResult) -> Result<()> {
        if !self
            .storage
            .finish(&task.id, TaskStatus::Completed, Some(&result), None)
            .await?
        {
            warn!("Task {} was already finished, dropping its result", task.id);
            return Ok(());
        }
        info!("Task {} completed", task.id);

        self.events.on_complete(task, &result).await?;
        if let CallbackType::Http { url } = &task.config.callback_type {
            if let Err(e) = HttpCallback::new(self.http.clone(), url.clone())
                .on_complete(task, &result)
                .await
            {
                warn!("Callback for task {} to {} failed: {}", task.id, url, e);
            }
        }
        Ok(())
    }

    async fn fail(&self, task: &Task, error: ErrorInfo) -> Result<()> {
        if !self
            .storage
            .finish(&task.id, TaskStatus::Failed, None, Some(&error))
            .await?
        {
            warn!("Task {} was already finished, dropping its failure", task.id);
            return Ok(());
        }

        self.events.on_error(task, &error).await?;
        if let CallbackType::Http { url } = &task.config.callback_type {
            if let Err(e) = HttpCallback::new(self.http.clone(), url.clone())
                .on_error(task, &error)
                .await
            {
                warn!("Callback for task {} to {} failed: {}", task.id, url, e);
            }
        }
        Ok(())
    }

    /// Redelivers a job whose worker went away, or fails it once its
    /// attempts are used up. Returns true when requeued.
    async fn recover_lost(&self, task: &Task) -> Result<bool> {
        if task.attempts > self.max_retries(task) {
            self.fail(
                task,
                ErrorInfo::new(
                    ErrorKind::Internal,
                    format!("worker lost after {} attempts", task.attempts),
                ),
            )
            .await?;
            return Ok(false);
        }

        if !self.storage.requeue(&task.id).await? {
            return Ok(false);
        }
        warn!("Requeued task {} after losing its worker", task.id);
        self.events.status_changed(&task.id, TaskStatus::Pending);
        if let Some(waker) = self.waker(task.queue()) {
            waker.notify_one();
        }
        Ok(true)
    }

    /// Recovers jobs with stale heartbeats and purges expired results.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let now = Utc::now();

        let lease = chrono::Duration::from_std(self.settings.lease)?;
        for task in self.storage.list_stale(now - lease).await? {
            if self.recover_lost(&task).await? {
                stats.requeued += 1;
            } else {
                stats.lost += 1;
            }
        }

        let retention = chrono::Duration::from_std(self.settings.result_expires)?;
        for task in self.storage.list_expired(now - retention).await? {
            if let Ok(processor) = self.processor(task.task_type()) {
                if let Err(e) = processor.cleanup(&task).await {
                    warn!("Cleanup of task {} failed: {}", task.id, e);
                }
            }
            self.storage.delete(&task.id).await?;
            stats.expired += 1;
        }

        if stats != SweepStats::default() {
            info!(
                "Sweep: {} requeued, {} lost, {} expired",
                stats.requeued, stats.lost, stats.expired
            );
        }
        Ok(stats)
    }
}
