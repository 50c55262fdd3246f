//! Closed set of media operations. Each variant carries its own typed
//! parameters; external requests are converted here once, at submission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::path::PathBuf;

use crate::error::{JobError, JobResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDomain {
    Video,
    Audio,
}

impl Display for MediaDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractAudioParams {
    pub audio_format: String,
    pub audio_quality: String,
}

impl Default for ExtractAudioParams {
    fn default() -> Self {
        Self {
            audio_format: "mp3".to_string(),
            audio_quality: "192k".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertFormatParams {
    pub target_format: String,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for ConvertFormatParams {
    fn default() -> Self {
        Self {
            target_format: "mp4".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
}

impl Default for ResizeParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimParams {
    pub start_time: f64,
    pub duration: f64,
}

impl Default for TrimParams {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleParams {
    pub subtitle_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReductionParams {
    pub noise_factor: f64,
}

impl Default for NoiseReductionParams {
    fn default() -> Self {
        Self { noise_factor: 0.21 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    /// true-peak ceiling in dBTP
    pub target_level: f64,
    /// gain used by the fixed-volume fallback
    pub volume_level: f64,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            target_level: -3.0,
            volume_level: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedParams {
    pub speed_factor: f64,
    pub preserve_pitch: bool,
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            speed_factor: 1.0,
            preserve_pitch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub start: f64,
    #[serde(default = "Segment::default_duration")]
    pub duration: f64,
}

impl Segment {
    fn default_duration() -> f64 {
        30.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentsParams {
    pub segments: Vec<Segment>,
    /// keep the first video stream alongside the first audio stream
    pub include_video: bool,
}

impl Default for SegmentsParams {
    fn default() -> Self {
        Self {
            segments: vec![Segment {
                start: 0.0,
                duration: 30.0,
            }],
            include_video: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum Operation {
    ExtractAudio(ExtractAudioParams),
    ConvertFormat(ConvertFormatParams),
    ResizeVideo(ResizeParams),
    TrimVideo(TrimParams),
    AddSubtitles(SubtitleParams),
    NoiseReduction(NoiseReductionParams),
    NormalizeAudio(NormalizeParams),
    ChangeSpeed(SpeedParams),
    ExtractSegments(SegmentsParams),
}

pub const VIDEO_OPERATIONS: [&str; 5] = [
    "extract_audio",
    "convert_format",
    "resize_video",
    "trim_video",
    "add_subtitles",
];

pub const AUDIO_OPERATIONS: [&str; 4] = [
    "noise_reduction",
    "normalize_audio",
    "change_speed",
    "extract_segments",
];

pub const VIDEO_FORMATS: [&str; 8] = ["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "3gp"];
pub const AUDIO_FORMATS: [&str; 7] = ["wav", "mp3", "flac", "aac", "ogg", "m4a", "wma"];

fn parse_params<T: serde::de::DeserializeOwned>(name: &str, params: &Map<String, Value>) -> JobResult<T> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| JobError::Validation(format!("{}: {}", name, e)))
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Operation {
    /// Builds an operation from its request name and the shared parameter
    /// mapping. Unknown names are rejected, never skipped.
    pub fn from_request(name: &str, params: &Map<String, Value>) -> JobResult<Self> {
        let op = match name {
            "extract_audio" => Self::ExtractAudio(parse_params(name, params)?),
            "convert_format" => Self::ConvertFormat(parse_params(name, params)?),
            "resize_video" => Self::ResizeVideo(parse_params(name, params)?),
            "trim_video" => Self::TrimVideo(parse_params(name, params)?),
            "add_subtitles" => Self::AddSubtitles(parse_params(name, params)?),
            "noise_reduction" => Self::NoiseReduction(parse_params(name, params)?),
            "normalize_audio" => Self::NormalizeAudio(parse_params(name, params)?),
            "change_speed" => Self::ChangeSpeed(parse_params(name, params)?),
            "extract_segments" => Self::ExtractSegments(parse_params(name, params)?),
            other => return Err(JobError::UnknownOperation(other.to_string())),
        };
        op.validate()?;
        Ok(op)
    }

    /// Converts a whole request and checks every operation belongs to `domain`.
    pub fn parse_list(domain: MediaDomain, names: &[String], params: &Map<String, Value>) -> JobResult<Vec<Self>> {
        if names.is_empty() {
            return Err(JobError::Validation("at least one operation is required".into()));
        }
        names
            .iter()
            .map(|name| {
                let op = Self::from_request(name, params)?;
                if op.domain() != domain {
                    return Err(JobError::Validation(format!(
                        "{} is a {} operation, not allowed in a {} pipeline",
                        name,
                        op.domain(),
                        domain
                    )));
                }
                Ok(op)
            })
            .collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractAudio(_) => "extract_audio",
            Self::ConvertFormat(_) => "convert_format",
            Self::ResizeVideo(_) => "resize_video",
            Self::TrimVideo(_) => "trim_video",
            Self::AddSubtitles(_) => "add_subtitles",
            Self::NoiseReduction(_) => "noise_reduction",
            Self::NormalizeAudio(_) => "normalize_audio",
            Self::ChangeSpeed(_) => "change_speed",
            Self::ExtractSegments(_) => "extract_segments",
        }
    }

    pub fn domain(&self) -> MediaDomain {
        match self {
            Self::ExtractAudio(_)
            | Self::ConvertFormat(_)
            | Self::ResizeVideo(_)
            | Self::TrimVideo(_)
            | Self::AddSubtitles(_) => MediaDomain::Video,
            Self::NoiseReduction(_)
            | Self::NormalizeAudio(_)
            | Self::ChangeSpeed(_)
            | Self::ExtractSegments(_) => MediaDomain::Audio,
        }
    }

    /// Extension of the file this operation writes.
    pub fn output_extension(&self) -> &str {
        match self {
            Self::ExtractAudio(p) => &p.audio_format,
            Self::ConvertFormat(p) => &p.target_format,
            _ => match self.domain() {
                MediaDomain::Video => "mp4",
                MediaDomain::Audio => "wav",
            },
        }
    }

    pub fn validate(&self) -> JobResult<()> {
        let invalid = |msg: String| Err(JobError::Validation(format!("{}: {}", self.name(), msg)));

        match self {
            Self::ExtractAudio(p) => {
                if !AUDIO_FORMATS.contains(&p.audio_format.as_str()) {
                    return invalid(format!("unsupported audio format {:?}", p.audio_format));
                }
                if !is_token(&p.audio_quality) {
                    return invalid(format!("invalid audio quality {:?}", p.audio_quality));
                }
            }
            Self::ConvertFormat(p) => {
                if !VIDEO_FORMATS.contains(&p.target_format.as_str()) {
                    return invalid(format!("unsupported target format {:?}", p.target_format));
                }
                if !is_token(&p.video_codec) || !is_token(&p.audio_codec) {
                    return invalid("codec names must be plain identifiers".into());
                }
            }
            Self::ResizeVideo(p) => {
                if p.width == 0 || p.height == 0 {
                    return invalid("width and height must be positive".into());
                }
            }
            Self::TrimVideo(p) => {
                if p.start_time < 0.0 || p.duration <= 0.0 {
                    return invalid("start_time must be >= 0 and duration > 0".into());
                }
            }
            Self::AddSubtitles(p) => {
                if p.subtitle_path.is_none() {
                    return invalid("subtitle_path is required".into());
                }
            }
            Self::NoiseReduction(p) => {
                if !(0.0..=1.0).contains(&p.noise_factor) {
                    return invalid("noise_factor must be within [0, 1]".into());
                }
            }
            Self::NormalizeAudio(p) => {
                if !(-9.0..=0.0).contains(&p.target_level) {
                    return invalid("target_level must be within [-9, 0] dBTP".into());
                }
                if p.volume_level <= 0.0 {
                    return invalid("volume_level must be positive".into());
                }
            }
            Self::ChangeSpeed(p) => {
                if !(0.5..=4.0).contains(&p.speed_factor) {
                    return invalid("speed_factor must be within [0.5, 4.0]".into());
                }
            }
            Self::ExtractSegments(p) => {
                if p.segments.is_empty() {
                    return invalid("at least one segment is required".into());
                }
                if p.segments.iter().any(|s| s.start < 0.0 || s.duration <= 0.0) {
                    return invalid("segments need start >= 0 and duration > 0".into());
                }
            }
        }
        Ok(())
    }
}
