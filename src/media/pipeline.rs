use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{JobError, JobResult};
use crate::schedule::progress::ProgressSink;
use super::operation::Operation;
use super::probe::MediaInfo;
use super::registry::OperationRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub output_path: PathBuf,
    pub operations_applied: Vec<String>,
    pub metadata: MediaInfo,
}

/// Runs an ordered list of operations, feeding each step's output into the
/// next one.
pub struct PipelineExecutor {
    registry: Arc<OperationRegistry>,
    processed_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<OperationRegistry>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            processed_dir: processed_dir.into(),
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Output location of one step. Stable across redeliveries of the same job.
    pub fn step_output(&self, task_id: &str, op: &Operation, step: usize) -> PathBuf {
        self.processed_dir.join(format!(
            "{}_{}_{}.{}",
            task_id,
            op.name(),
            step,
            op.output_extension()
        ))
    }

    pub async fn execute(
        &self,
        task_id: &str,
        input: &Path,
        operations: &[Operation],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> JobResult<PipelineOutput> {
        if !input.exists() {
            return Err(JobError::NotFound(input.display().to_string()));
        }
        if operations.is_empty() {
            return Err(JobError::Validation("no operations to apply".into()));
        }
        tokio::fs::create_dir_all(&self.processed_dir).await?;

        // probing the result counts as the last step
        let total = operations.len() as u32 + 1;
        let mut current = input.to_path_buf();

        for (step, op) in operations.iter().enumerate() {
            progress
                .report(step as u32, total, &format!("Applying {}", op.name()))
                .await;

            let output = self.step_output(task_id, op, step);
            let result = self.registry.apply(op, &current, &output, cancel).await;

            // the consumed intermediate is scratch either way; the caller's input is not
            if current != input {
                remove_scratch(&current).await;
            }

            match result {
                Ok(path) => {
                    info!("Task {} step {} ({}) wrote {}", task_id, step, op.name(), path.display());
                    current = path;
                }
                Err(e) => {
                    remove_scratch(&output).await;
                    return Err(e);
                }
            }
        }

        progress.report(total - 1, total, "Reading output metadata").await;
        let metadata = self.registry.probe(&current, cancel).await?;

        Ok(PipelineOutput {
            output_path: current,
            operations_applied: operations.iter().map(|op| op.name().to_string()).collect(),
            metadata,
        })
    }
}

async fn remove_scratch(path: &Path) {
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove intermediate file {}: {}", path.display(), e);
        }
    }
}
