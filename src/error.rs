use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

use crate::workflow::StageReport;

/// Error kinds reported on failed jobs. Status queries always surface the
/// most specific kind available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    ToolFailure,
    Timeout,
    ValidationError,
    UnknownOperation,
    Storage,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("input file not found: {0}")]
    NotFound(String),

    #[error("{0} is not available")]
    Unavailable(String),

    #[error("{tool} failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("time limit exceeded: {0}")]
    Timeout(String),

    #[error("invalid job parameters: {0}")]
    Validation(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<JobError>,
    },

    /// A failed workflow with the stage outcomes observed so far.
    #[error("{source}")]
    Workflow {
        stages: Vec<StageReport>,
        #[source]
        source: Box<JobError>,
    },

    /// A failure read back from another job's record.
    #[error("{message}")]
    Reported { kind: ErrorKind, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type JobResult<T> = Result<T, JobError>;

impl JobError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn stage(stage: impl Into<String>, source: JobError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::ToolFailure { .. } => ErrorKind::ToolFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::UnknownOperation(_) => ErrorKind::UnknownOperation,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Stage { source, .. } | Self::Workflow { source, .. } => source.kind(),
            Self::Reported { kind, .. } => *kind,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Name of the workflow stage that failed, innermost first.
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, source } => source.failed_stage().or(Some(stage.as_str())),
            Self::Workflow { source, .. } => source.failed_stage(),
            _ => None,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
            stage: self.failed_stage().map(str::to_string),
            stages: match self {
                Self::Workflow { stages, .. } => stages.clone(),
                _ => Vec::new(),
            },
        }
    }
}

impl From<&ErrorInfo> for JobError {
    fn from(info: &ErrorInfo) -> Self {
        Self::Reported {
            kind: info.kind,
            message: info.message.clone(),
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Failure payload persisted on a FAILED job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Per-stage outcomes of a failed workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageReport>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
            stages: Vec::new(),
        }
    }
}
