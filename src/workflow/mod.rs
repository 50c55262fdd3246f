//! Multi-stage workflows: download, transcribe, translate, synthesize.
//!
//! Each stage is an ordinary job on its own queue. The coordinator runs as a
//! job on the workflow queue and only submits a stage after observing the
//! previous stage's terminal state.

mod coordinator;

use serde::{Deserialize, Serialize};

pub use coordinator::WorkflowProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Download,
    Transcribe,
    Translate,
    Synthesize,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 4] = [Self::Download, Self::Transcribe, Self::Translate, Self::Synthesize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
            Self::Synthesize => "synthesize",
        }
    }

    /// Job id of this stage. Stable across redeliveries of the workflow.
    pub fn task_id(&self, workflow_id: &str) -> String {
        format!("{}-{}", workflow_id, self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Skipped,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: WorkflowStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: StageStatus,
}
