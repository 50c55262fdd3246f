use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ToolPaths;
use crate::error::{JobError, JobResult};
use super::operation::{
    ConvertFormatParams, ExtractAudioParams, NoiseReductionParams, NormalizeParams, Operation,
    ResizeParams, Segment, SegmentsParams, SpeedParams, SubtitleParams, TrimParams,
};
use super::probe::{self, MediaInfo};
use super::tool::{ToolInvocation, ToolRunner};

/// Leading slice of the input used as the noise profile.
const NOISE_PROFILE_SECS: &str = "0.5";
const SPEED_SAMPLE_RATE: u32 = 44_100;

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn audio_codec_for(format: &str) -> &'static str {
    match format {
        "mp3" => "libmp3lame",
        "wav" => "pcm_s16le",
        "flac" => "flac",
        "ogg" => "libvorbis",
        "wma" => "wmav2",
        _ => "aac",
    }
}

/// `atempo` accepts factors in [0.5, 2.0]; larger factors are chained.
fn atempo_chain(mut factor: f64) -> String {
    let mut filters = Vec::new();
    while factor > 2.0 {
        filters.push("atempo=2.0".to_string());
        factor /= 2.0;
    }
    filters.push(format!("atempo={}", factor));
    filters.join(",")
}

/// Executes single operations by invoking the configured media tools.
pub struct OperationRegistry {
    tools: ToolPaths,
    runner: Arc<dyn ToolRunner>,
}

impl OperationRegistry {
    pub fn new(tools: ToolPaths, runner: Arc<dyn ToolRunner>) -> Self {
        Self { tools, runner }
    }

    pub fn runner(&self) -> &Arc<dyn ToolRunner> {
        &self.runner
    }

    pub async fn probe(&self, path: &Path, cancel: &CancellationToken) -> JobResult<MediaInfo> {
        probe::probe(self.runner.as_ref(), &self.tools.ffprobe, path, cancel).await
    }

    fn ffmpeg(&self, input: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.tools.ffmpeg)
            .args(["-y", "-hide_banner", "-i"])
            .arg(path_arg(input))
    }

    async fn run(&self, invocation: ToolInvocation, cancel: &CancellationToken) -> JobResult<()> {
        self.runner.run(&invocation, cancel).await.map(|_| ())
    }

    /// Transforms `input` into `output` and returns the path written.
    pub async fn apply(
        &self,
        op: &Operation,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<PathBuf> {
        match op {
            Operation::ExtractAudio(p) => self.extract_audio(p, input, output, cancel).await?,
            Operation::ConvertFormat(p) => self.convert_format(p, input, output, cancel).await?,
            Operation::ResizeVideo(p) => self.resize(p, input, output, cancel).await?,
            Operation::TrimVideo(p) => self.trim(p, input, output, cancel).await?,
            Operation::AddSubtitles(p) => self.add_subtitles(p, input, output, cancel).await?,
            Operation::NoiseReduction(p) => self.noise_reduction(p, input, output, cancel).await?,
            Operation::NormalizeAudio(p) => self.normalize(p, input, output, cancel).await?,
            Operation::ChangeSpeed(p) => self.change_speed(p, input, output, cancel).await?,
            Operation::ExtractSegments(p) => self.extract_segments(p, input, output, cancel).await?,
        }

        if !output.exists() {
            return Err(JobError::tool(op.name(), format!("no output written to {}", output.display())));
        }
        Ok(output.to_path_buf())
    }

    async fn extract_audio(
        &self,
        p: &ExtractAudioParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let inv = self
            .ffmpeg(input)
            .args(["-vn", "-acodec", audio_codec_for(&p.audio_format), "-b:a", &p.audio_quality])
            .arg(path_arg(output));
        self.run(inv, cancel).await
    }

    async fn convert_format(
        &self,
        p: &ConvertFormatParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let inv = self
            .ffmpeg(input)
            .args(["-c:v", &p.video_codec, "-c:a", &p.audio_codec])
            .arg(path_arg(output));
        self.run(inv, cancel).await
    }

    async fn resize(&self, p: &ResizeParams, input: &Path, output: &Path, cancel: &CancellationToken) -> JobResult<()> {
        let inv = self
            .ffmpeg(input)
            .arg("-vf")
            .arg(format!("scale={}:{}", p.width, p.height))
            .args(["-c:a", "copy"])
            .arg(path_arg(output));
        self.run(inv, cancel).await
    }

    async fn trim(&self, p: &TrimParams, input: &Path, output: &Path, cancel: &CancellationToken) -> JobResult<()> {
        let inv = self
            .ffmpeg(input)
            .arg("-ss")
            .arg(p.start_time.to_string())
            .arg("-t")
            .arg(p.duration.to_string())
            .args(["-c", "copy"])
            .arg(path_arg(output));
        self.run(inv, cancel).await
    }

    async fn add_subtitles(
        &self,
        p: &SubtitleParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let subtitles = p
            .subtitle_path
            .as_ref()
            .ok_or_else(|| JobError::Validation("add_subtitles: subtitle_path is required".into()))?;
        if !subtitles.exists() {
            return Err(JobError::NotFound(subtitles.display().to_string()));
        }

        let inv = self
            .ffmpeg(input)
            .arg("-vf")
            .arg(format!("subtitles={}", subtitles.display()))
            .args(["-c:a", "copy"])
            .arg(path_arg(output));
        self.run(inv, cancel).await
    }

    async fn noise_reduction(
        &self,
        p: &NoiseReductionParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let primary = self.sox_noise_reduction(p, input, output, cancel).await;
        let fallback = ToolInvocation::new(&self.tools.ffmpeg)
            .args(["-y", "-hide_banner", "-i"])
            .arg(path_arg(input))
            .args(["-af", "highpass=f=200,lowpass=f=8000"])
            .arg(path_arg(output));
        self.with_fallback("noise_reduction", primary, fallback, cancel).await
    }

    async fn sox_noise_reduction(
        &self,
        p: &NoiseReductionParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let profile = output.with_extension("noise.prof");

        let profile_inv = ToolInvocation::new(&self.tools.sox)
            .arg(path_arg(input))
            .args(["-n", "trim", "0", NOISE_PROFILE_SECS, "noiseprof"])
            .arg(path_arg(&profile));
        let reduce_inv = ToolInvocation::new(&self.tools.sox)
            .arg(path_arg(input))
            .arg(path_arg(output))
            .arg("noisered")
            .arg(path_arg(&profile))
            .arg(p.noise_factor.to_string());

        let result = match self.run(profile_inv, cancel).await {
            Ok(()) => self.run(reduce_inv, cancel).await,
            Err(e) => Err(e),
        };

        if profile.exists() {
            if let Err(e) = tokio::fs::remove_file(&profile).await {
                warn!("Failed to remove noise profile {}: {}", profile.display(), e);
            }
        }
        result
    }

    async fn normalize(
        &self,
        p: &NormalizeParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let primary = self
            .run(
                self.ffmpeg(input)
                    .arg("-af")
                    .arg(format!("loudnorm=I=-16:LRA=11:TP={}", p.target_level))
                    .arg(path_arg(output)),
                cancel,
            )
            .await;
        let fallback = self
            .ffmpeg(input)
            .arg("-af")
            .arg(format!("volume={}", p.volume_level))
            .arg(path_arg(output));
        self.with_fallback("normalize_audio", primary, fallback, cancel).await
    }

    /// Tries `fallback` exactly once when the primary tool invocation failed.
    /// Timeouts are not retried.
    async fn with_fallback(
        &self,
        name: &str,
        primary: JobResult<()>,
        fallback: ToolInvocation,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        match primary {
            Ok(()) => Ok(()),
            Err(JobError::ToolFailure { tool, message }) => {
                warn!("{} primary method failed ({}: {}), using fallback", name, tool, message);
                self.run(fallback, cancel).await.map_err(|e| match e {
                    JobError::ToolFailure { tool, message } => JobError::tool(
                        tool,
                        format!("{} fallback failed after primary failure: {}", name, message),
                    ),
                    other => other,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn change_speed(
        &self,
        p: &SpeedParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        let filter = if p.preserve_pitch {
            atempo_chain(p.speed_factor)
        } else {
            format!(
                "asetrate={}*{},aresample={}",
                SPEED_SAMPLE_RATE, p.speed_factor, SPEED_SAMPLE_RATE
            )
        };
        let inv = self.ffmpeg(input).arg("-af").arg(filter).arg(path_arg(output));
        self.run(inv, cancel).await
    }

    fn cut(&self, segment: &Segment, include_video: bool, input: &Path, output: &Path) -> ToolInvocation {
        let mut inv = self
            .ffmpeg(input)
            .arg("-ss")
            .arg(segment.start.to_string())
            .arg("-t")
            .arg(segment.duration.to_string());
        if include_video {
            inv = inv.args(["-map", "0:v:0?", "-map", "0:a:0"]);
        } else {
            inv = inv.args(["-map", "0:a:0", "-vn"]);
        }
        inv.arg(path_arg(output))
    }

    async fn extract_segments(
        &self,
        p: &SegmentsParams,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        if let [segment] = p.segments.as_slice() {
            return self.run(self.cut(segment, p.include_video, input, output), cancel).await;
        }

        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "segments".to_string());
        let ext = output
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wav".to_string());
        let dir = output.parent().unwrap_or_else(|| Path::new("."));

        let parts: Vec<PathBuf> = (0..p.segments.len())
            .map(|i| dir.join(format!("{}_part{}.{}", stem, i, ext)))
            .collect();

        let result = self.cut_and_concat(p, input, output, &parts, cancel).await;

        for part in &parts {
            if part.exists() {
                if let Err(e) = tokio::fs::remove_file(part).await {
                    warn!("Failed to remove segment {}: {}", part.display(), e);
                }
            }
        }
        result
    }

    async fn cut_and_concat(
        &self,
        p: &SegmentsParams,
        input: &Path,
        output: &Path,
        parts: &[PathBuf],
        cancel: &CancellationToken,
    ) -> JobResult<()> {
        for (segment, part) in p.segments.iter().zip(parts) {
            self.run(self.cut(segment, p.include_video, input, part), cancel).await?;
        }

        let mut inv = ToolInvocation::new(&self.tools.ffmpeg).args(["-y", "-hide_banner"]);
        for part in parts {
            inv = inv.arg("-i").arg(path_arg(part));
        }

        let mut graph = String::new();
        for i in 0..parts.len() {
            if p.include_video {
                graph.push_str(&format!("[{}:v:0][{}:a:0]", i, i));
            } else {
                graph.push_str(&format!("[{}:a:0]", i));
            }
        }
        let inv = if p.include_video {
            graph.push_str(&format!("concat=n={}:v=1:a=1[outv][outa]", parts.len()));
            inv.arg("-filter_complex")
                .arg(graph)
                .args(["-map", "[outv]", "-map", "[outa]"])
        } else {
            graph.push_str(&format!("concat=n={}:v=0:a=1[outa]", parts.len()));
            inv.arg("-filter_complex").arg(graph).args(["-map", "[outa]"])
        };

        info!("Concatenating {} segments into {}", parts.len(), output.display());
        self.run(inv.arg(path_arg(output)), cancel).await
    }
}

#[cfg(test)]
mod tests;
