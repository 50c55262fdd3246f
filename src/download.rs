//! Fetching remote media through yt-dlp.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{JobError, JobResult};
use crate::media::{ToolInvocation, ToolRunner};

/// Named format preferences and the yt-dlp selector each maps to.
static FORMATS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("best", "best"),
        ("worst", "worst"),
        ("audio", "bestaudio/best"),
        ("mp4", "best[ext=mp4]/best"),
        ("webm", "best[ext=webm]/best"),
        ("480p", "best[height<=480]/best"),
        ("720p", "best[height<=720]/best"),
        ("1080p", "best[height<=1080]/best"),
    ])
});

pub fn format_selector(preference: &str) -> JobResult<&'static str> {
    FORMATS
        .get(preference)
        .copied()
        .ok_or_else(|| JobError::Validation(format!("unsupported format preference: {}", preference)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedMedia {
    pub file_path: PathBuf,
    pub title: Option<String>,
    pub duration: Option<f64>,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `url` into `dir`, naming the file after `task_id`.
    async fn download(
        &self,
        task_id: &str,
        url: &str,
        format_preference: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<DownloadedMedia>;
}

#[derive(Debug, Deserialize)]
struct YtDlpReport {
    filepath: PathBuf,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

pub struct YtDlpDownloader {
    program: String,
    runner: Arc<dyn ToolRunner>,
}

impl YtDlpDownloader {
    pub fn new(program: impl Into<String>, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn invocation(&self, task_id: &str, url: &str, selector: &str, dir: &Path) -> ToolInvocation {
        let template = dir.join(format!("{}.%(ext)s", task_id));
        ToolInvocation::new(&self.program).args([
            "--no-playlist",
            "--no-progress",
            "-f",
            selector,
            "--print",
            "after_move:%(.{filepath,title,duration,ext})j",
            "-o",
            &template.to_string_lossy(),
            url,
        ])
    }
}

/// The final file path as reported by yt-dlp itself.
fn parse_report(stdout: &str) -> JobResult<YtDlpReport> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<YtDlpReport>(line).ok())
        .ok_or_else(|| JobError::tool("yt-dlp", "no file report in output"))
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(
        &self,
        task_id: &str,
        url: &str,
        format_preference: &str,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<DownloadedMedia> {
        let selector = format_selector(format_preference)?;
        tokio::fs::create_dir_all(dir).await?;

        info!("Downloading {} ({})", url, format_preference);
        let output = self
            .runner
            .run(&self.invocation(task_id, url, selector, dir), cancel)
            .await?;
        let report = parse_report(&output.stdout)?;

        if !report.filepath.exists() {
            return Err(JobError::tool(
                "yt-dlp",
                format!("reported file {} does not exist", report.filepath.display()),
            ));
        }
        info!("Downloaded {} to {}", url, report.filepath.display());

        Ok(DownloadedMedia {
            file_path: report.filepath,
            title: report.title,
            duration: report.duration,
        })
    }
}
