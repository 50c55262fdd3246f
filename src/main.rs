#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mediaflow_rs::{
    ai::AiServices,
    config::Settings,
    media::CommandRunner,
    schedule::TaskScheduler,
    storage::{object::StorageManager, task::SqliteTaskStorage},
    utils::logger,
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    settings.ensure_dirs()?;
    let _guard = logger::init(&settings.log_dir)?;

    info!("Starting mediaflow {}", env!("GIT_HASH"));

    info!("Opening job store at {}", settings.broker_url);
    let tasks = Arc::new(SqliteTaskStorage::new(&settings.broker_url).await?);

    let storage = StorageManager::select(&settings).await;
    let ai = AiServices::from_settings(&settings.ai, reqwest::Client::new());
    let addr = settings.addr;

    let ctx = Arc::new(AppContext::new(settings, tasks, storage, Arc::new(CommandRunner), ai));

    let scheduler = Arc::new(TaskScheduler::new(ctx.task_manager.clone()));
    scheduler.spawn_pool().await;
    let sweeper = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = sweeper.run().await {
            error!("Scheduler stopped with error: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutdown signal received");
        signal.cancel();
    });

    let served = mediaflow_rs::web::start_server(ctx.clone(), addr, shutdown.clone()).await;
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    info!("Shutting down...");
    scheduler.shutdown();
    scheduler_handle.await?;

    served
}
