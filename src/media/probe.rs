use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, JobResult};
use super::tool::{ToolInvocation, ToolRunner};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
}

/// Metadata of a media file as reported by ffprobe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub size: u64,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioInfo>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

pub fn probe_invocation(ffprobe: &str, path: &Path) -> ToolInvocation {
    ToolInvocation::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path.to_string_lossy())
}

pub async fn probe(
    runner: &dyn ToolRunner,
    ffprobe: &str,
    path: &Path,
    cancel: &CancellationToken,
) -> JobResult<MediaInfo> {
    let output = runner.run(&probe_invocation(ffprobe, path), cancel).await?;
    parse_probe_output(&output.stdout)
}

/// ffprobe reports most numbers as strings.
fn number<T: std::str::FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Parses "30000/1001" style frame rates. A zero denominator yields 0.
pub fn parse_ratio(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => raw.trim().parse().unwrap_or(0.0),
    }
}

pub fn parse_probe_output(stdout: &str) -> JobResult<MediaInfo> {
    let root: Value = serde_json::from_str(stdout)
        .map_err(|e| JobError::tool("ffprobe", format!("unreadable output: {}", e)))?;

    let format = root
        .get("format")
        .ok_or_else(|| JobError::tool("ffprobe", "no format section in output"))?;

    let streams = root
        .get("streams")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .map(|s| VideoInfo {
            width: number(&s["width"]).unwrap_or(0),
            height: number(&s["height"]).unwrap_or(0),
            codec: s["codec_name"].as_str().unwrap_or("unknown").to_string(),
            fps: s["r_frame_rate"].as_str().map(parse_ratio).unwrap_or(0.0),
        });

    let audio = streams
        .iter()
        .find(|s| s["codec_type"] == "audio")
        .map(|s| AudioInfo {
            codec: s["codec_name"].as_str().unwrap_or("unknown").to_string(),
            sample_rate: number(&s["sample_rate"]).unwrap_or(0),
            channels: number(&s["channels"]).unwrap_or(0),
            bit_depth: number(&s["bits_per_sample"]).filter(|bits: &u32| *bits > 0),
        });

    Ok(MediaInfo {
        duration: number(&format["duration"]).unwrap_or(0.0),
        size: number(&format["size"]).unwrap_or(0),
        format: format["format_name"].as_str().unwrap_or("unknown").to_string(),
        bitrate: number(&format["bit_rate"]),
        video,
        audio,
    })
}
