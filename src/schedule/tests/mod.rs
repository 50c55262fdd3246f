use anyhow::Result;
use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use super::*;
use crate::config::QueueSettings;
use crate::error::{ErrorKind, JobError, JobResult};
use crate::media::{MediaDomain, Operation};
use crate::schedule::callback::TaskEvent;
use crate::schedule::types::{CleanupParams, CleanupResult, PipelineParams};
use crate::storage::task::SqliteTaskStorage;
use crate::schedule::progress::NoProgress;
use crate::storage::object::{LocalStore, StorageManager};
use crate::testing::{fast_queue, settings, write_media, FakeAi, FakeRunner, Harness};
use crate::AppContext;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Panic,
    Hang,
}

/// Stands in for the storage cleanup processor with a fixed behavior.
struct ScriptedProcessor {
    behavior: Behavior,
    runs: AtomicUsize,
    cleanups: AtomicUsize,
}

impl ScriptedProcessor {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            runs: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskProcessor for ScriptedProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Cleanup
    }

    async fn process(&self, _task: &Task, _ctx: &TaskContext) -> JobResult<TaskResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(TaskResult::Cleanup(CleanupResult {
                scanned: 0,
                deleted: Vec::new(),
                failed: Vec::new(),
            })),
            Behavior::Panic => panic!("processor blew up"),
            Behavior::Hang => {
                // ignores cancellation on purpose
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(JobError::Internal("woke up".into()))
            }
        }
    }

    fn validate_params(&self, _params: &TaskParams) -> JobResult<()> {
        Ok(())
    }

    async fn cleanup(&self, _task: &Task) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn cleanup_config() -> TaskConfig {
    TaskConfig::new(TaskParams::Cleanup(CleanupParams {
        prefix: "processed/".to_string(),
        max_age_days: 7,
    }))
}

async fn bare_manager(settings: QueueSettings, processor: Arc<ScriptedProcessor>) -> Result<TaskManager> {
    let storage = Arc::new(SqliteTaskStorage::in_memory().await?);
    let manager = TaskManager::new(storage, settings);
    manager.register_processor(processor);
    Ok(manager)
}

async fn claim_and_run(manager: &TaskManager) -> Result<()> {
    let task = manager
        .claim(QueueName::Storage)
        .await?
        .expect("a pending task");
    manager.run_task(task).await
}

fn audio_pipeline(input: std::path::PathBuf, target_level: f64) -> Result<TaskConfig> {
    let mut params = Map::new();
    params.insert("target_level".to_string(), json!(target_level));
    let operations = Operation::parse_list(MediaDomain::Audio, &["normalize_audio".to_string()], &params)?;
    Ok(TaskConfig::new(TaskParams::AudioProcess(PipelineParams {
        input_path: input,
        operations,
    })))
}

#[tokio::test]
async fn normalized_audio_completes_with_download_url() -> Result<()> {
    let h = Harness::start(FakeAi::new()).await?;
    let input = write_media(&h.path("speech.wav"), 10.0, "speech");

    let task = h.ctx.task_manager.submit(audio_pipeline(input, -3.0)?).await?;
    assert_eq!(task.status, TaskStatus::Pending);

    let finished = h.wait(&task.id).await?;
    assert_eq!(finished.status, TaskStatus::Completed, "{:?}", finished.error);
    assert_eq!(finished.attempts, 1);
    assert!(finished.completed_at.is_some());

    let Some(TaskResult::Pipeline(result)) = finished.result else {
        panic!("missing pipeline result");
    };
    assert!((result.metadata.duration - 10.0).abs() <= 0.1);
    assert_eq!(result.operations_applied, vec!["normalize_audio".to_string()]);
    assert!(result.delivery.download_url.is_some());
    assert!(result
        .delivery
        .remote_key
        .starts_with(&format!("processed/audio/{}_", task.id)));
    Ok(())
}

#[tokio::test]
async fn resubmitting_an_id_does_not_run_twice() -> Result<()> {
    let h = Harness::start(FakeAi::new()).await?;
    let manager = &h.ctx.task_manager;
    let input = write_media(&h.path("speech.wav"), 10.0, "speech");

    manager.submit_with_id("job-a", audio_pipeline(input.clone(), -3.0)?).await?;
    let first = h.wait("job-a").await?;
    assert_eq!(first.status, TaskStatus::Completed);
    let ffmpeg_calls = h.runner.calls_to("ffmpeg");

    let again = manager.submit_with_id("job-a", audio_pipeline(input, -6.0)?).await?;
    assert_eq!(again.status, TaskStatus::Completed);
    assert_eq!(again.attempts, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.runner.calls_to("ffmpeg"), ffmpeg_calls);
    assert_eq!(manager.stats().await?.total, 1);
    Ok(())
}

/// App wiring without a worker pool so the test decides when jobs run.
async fn idle_app(root: &std::path::Path) -> Result<AppContext> {
    let settings = settings(root);
    settings.ensure_dirs()?;
    let storage = StorageManager::new(Arc::new(LocalStore::new(
        &settings.local_storage_dir,
        &settings.local_storage_url,
    )));
    let tasks = Arc::new(SqliteTaskStorage::in_memory().await?);
    Ok(AppContext::new(settings, tasks, storage, FakeRunner::new(), FakeAi::new().services()))
}

#[tokio::test]
async fn redelivered_job_overwrites_its_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    let app = idle_app(dir.path()).await?;
    let manager = &app.task_manager;
    let input = write_media(&dir.path().join("speech.wav"), 10.0, "speech");

    manager.submit_with_id("job-r", audio_pipeline(input, -3.0)?).await?;

    // first delivery uploads, then the worker dies before acknowledging
    let first = manager.claim(QueueName::Audio).await?.expect("a pending task");
    let ctx = TaskContext {
        cancel: CancellationToken::new(),
        progress: Arc::new(NoProgress),
    };
    manager.processor(TaskType::AudioProcess)?.process(&first, &ctx).await?;

    let uploaded = app.storage.list("processed/audio/").await?;
    assert_eq!(uploaded.len(), 1);
    let key = uploaded[0].key.clone();
    let first_bytes = std::fs::read(uploaded[0].local_path.as_ref().expect("local object"))?;

    assert!(manager.storage().requeue("job-r").await?);
    let second = manager.claim(QueueName::Audio).await?.expect("a redelivered task");
    assert_eq!(second.attempts, 2);
    manager.run_task(second).await?;

    let finished = manager.get_task("job-r").await?.expect("task record");
    assert_eq!(finished.status, TaskStatus::Completed, "{:?}", finished.error);

    let objects = app.storage.list("processed/audio/").await?;
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].key, key);
    let second_bytes = std::fs::read(objects[0].local_path.as_ref().expect("local object"))?;
    assert_eq!(first_bytes, second_bytes);
    Ok(())
}

#[tokio::test]
async fn invalid_jobs_are_rejected_at_submission() -> Result<()> {
    let h = Harness::start(FakeAi::new()).await?;
    let manager = &h.ctx.task_manager;

    let missing_input = TaskConfig::new(TaskParams::AudioProcess(PipelineParams {
        input_path: std::path::PathBuf::new(),
        operations: vec![],
    }));
    let err = manager.submit(missing_input).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let mut mismatched = cleanup_config();
    mismatched.task_type = TaskType::Translate;
    let err = manager.submit(mismatched).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let err = Operation::parse_list(MediaDomain::Audio, &["reverse_audio".to_string()], &Map::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOperation);

    assert_eq!(manager.stats().await?.total, 0);
    Ok(())
}

#[tokio::test]
async fn soft_limit_cancels_running_tools() -> Result<()> {
    let h = Harness::start_with(FakeAi::new(), |settings| {
        settings.queue.soft_time_limit = Duration::from_millis(200);
        settings.queue.time_limit = Duration::from_secs(5);
    })
    .await?;
    h.runner.set_delay(Duration::from_secs(3));
    let input = write_media(&h.path("speech.wav"), 10.0, "speech");

    let task = h.ctx.task_manager.submit(audio_pipeline(input, -3.0)?).await?;
    let finished = h.wait(&task.id).await?;

    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error.map(|e| e.kind), Some(ErrorKind::Timeout));
    Ok(())
}

#[tokio::test]
async fn hard_limit_fails_a_stuck_job() -> Result<()> {
    let manager = bare_manager(fast_queue(), ScriptedProcessor::new(Behavior::Hang)).await?;

    let mut config = cleanup_config();
    config.time_limit = Some(1);
    let task = manager.submit(config).await?;
    claim_and_run(&manager).await?;

    let finished = manager.get_task(&task.id).await?.expect("task record");
    assert_eq!(finished.status, TaskStatus::Failed);
    let error = finished.error.expect("timeout error");
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert!(error.message.contains("hard time limit"));
    Ok(())
}

#[tokio::test]
async fn panicking_processor_counts_as_lost_worker() -> Result<()> {
    let processor = ScriptedProcessor::new(Behavior::Panic);
    // max_retries is 1: one redelivery, then failure
    let manager = bare_manager(fast_queue(), processor.clone()).await?;
    let task = manager.submit(cleanup_config()).await?;

    claim_and_run(&manager).await?;
    let requeued = manager.get_task(&task.id).await?.expect("task record");
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.attempts, 1);

    claim_and_run(&manager).await?;
    let failed = manager.get_task(&task.id).await?.expect("task record");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.error.map(|e| e.kind), Some(ErrorKind::Internal));
    assert_eq!(processor.runs.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn sweep_recovers_jobs_with_stale_heartbeats() -> Result<()> {
    let processor = ScriptedProcessor::new(Behavior::Succeed);
    let settings = QueueSettings {
        lease: Duration::from_millis(50),
        ..fast_queue()
    };
    let manager = bare_manager(settings, processor).await?;
    let task = manager.submit(cleanup_config()).await?;

    // claimed by a worker that then disappears
    manager.claim(QueueName::Storage).await?.expect("claimed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = manager.sweep().await?;
    assert_eq!(stats.requeued, 1);
    assert_eq!(manager.get_task(&task.id).await?.map(|t| t.status), Some(TaskStatus::Pending));

    manager.claim(QueueName::Storage).await?.expect("claimed again");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = manager.sweep().await?;
    assert_eq!(stats.lost, 1);

    let lost = manager.get_task(&task.id).await?.expect("task record");
    assert_eq!(lost.status, TaskStatus::Failed);
    assert_eq!(lost.error.map(|e| e.kind), Some(ErrorKind::Internal));
    Ok(())
}

#[tokio::test]
async fn expired_results_are_purged_with_cleanup() -> Result<()> {
    let processor = ScriptedProcessor::new(Behavior::Succeed);
    let settings = QueueSettings {
        result_expires: Duration::ZERO,
        ..fast_queue()
    };
    let manager = bare_manager(settings, processor.clone()).await?;
    let first = manager.submit(cleanup_config()).await?;
    let second = manager.submit(cleanup_config()).await?;

    let finished = manager.claim(QueueName::Storage).await?.expect("claimed");
    let pending_id = if finished.id == first.id { second.id } else { first.id };
    let finished_id = finished.id.clone();
    manager.run_task(finished).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = manager.sweep().await?;
    assert_eq!(stats.expired, 1);
    assert_eq!(processor.cleanups.load(Ordering::SeqCst), 1);
    assert!(manager.get_task(&finished_id).await?.is_none());
    // unfinished jobs never expire
    assert!(manager.get_task(&pending_id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn terminal_state_is_broadcast_and_posted_to_callback() -> Result<()> {
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/hook",
            post(|State(received): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                received.lock().unwrap().push(body);
            }),
        )
        .with_state(received.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let manager = bare_manager(fast_queue(), ScriptedProcessor::new(Behavior::Succeed)).await?;
    let mut events = manager.subscribe();
    let config = cleanup_config().with_callback(CallbackType::Http {
        url: format!("http://{}/hook", addr),
    });
    let task = manager.submit(config).await?;
    claim_and_run(&manager).await?;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(
        seen.first(),
        Some(TaskEvent::StatusChanged { status: TaskStatus::Pending, .. })
    ));
    assert!(matches!(seen.last(), Some(TaskEvent::Completed { .. })));
    assert!(seen.iter().all(|e| e.task_id() == task.id));

    let bodies = received.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["task_id"], json!(task.id));
    assert_eq!(bodies[0]["status"], json!("COMPLETED"));
    Ok(())
}

#[tokio::test]
async fn unreachable_callback_does_not_fail_the_job() -> Result<()> {
    let manager = bare_manager(fast_queue(), ScriptedProcessor::new(Behavior::Succeed)).await?;
    let config = cleanup_config().with_callback(CallbackType::Http {
        url: "http://127.0.0.1:9/hook".to_string(),
    });
    let task = manager.submit(config).await?;
    claim_and_run(&manager).await?;

    let finished = manager.get_task(&task.id).await?.expect("task record");
    assert_eq!(finished.status, TaskStatus::Completed);
    Ok(())
}
