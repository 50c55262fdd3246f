use async_trait::async_trait;
use std::fmt::Display;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{JobError, JobResult};

/// One invocation of an external media tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Display for ToolInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tools. Implementations must stop the child and return
/// `JobError::Timeout` once `cancel` fires.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> JobResult<ToolOutput>;
}

/// Spawns real processes through tokio.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

const STDERR_TAIL: usize = 2000;

fn tail(text: &str) -> &str {
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[async_trait]
impl ToolRunner for CommandRunner {
    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> JobResult<ToolOutput> {
        debug!("Running {}", invocation);

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::tool(&invocation.program, format!("failed to start: {}", e)))?;

        // dropping the wait future kills the child
        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| JobError::tool(&invocation.program, e.to_string()))?,
            _ = cancel.cancelled() => {
                return Err(JobError::Timeout(format!("{} cancelled by soft time limit", invocation.program)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(JobError::tool(
                &invocation.program,
                format!("exited with {}: {}", output.status, tail(stderr.trim())),
            ));
        }

        Ok(ToolOutput { stdout, stderr })
    }
}
