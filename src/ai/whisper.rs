use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{Transcriber, Transcription, TranscriptionSegment};
use crate::error::{JobError, JobResult};

/// Local whisper.cpp transcription. Models are loaded from
/// `{model_dir}/ggml-{model_size}.bin` and kept for reuse.
pub struct WhisperTranscriber {
    model_dir: PathBuf,
    contexts: Mutex<HashMap<String, Arc<WhisperContext>>>,
}

impl WhisperTranscriber {
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    fn context(&self, model_size: &str) -> JobResult<Arc<WhisperContext>> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| JobError::Internal("whisper model cache poisoned".into()))?;
        if let Some(ctx) = contexts.get(model_size) {
            return Ok(ctx.clone());
        }

        let model_path = self.model_dir.join(format!("ggml-{}.bin", model_size));
        if !model_path.exists() {
            return Err(JobError::Unavailable(format!("whisper model {}", model_path.display())));
        }
        info!("Loading whisper model {}", model_path.display());
        let ctx = WhisperContext::new_with_params(&model_path.to_string_lossy(), WhisperContextParameters::default())
            .map_err(|e| JobError::tool("whisper", format!("failed to open model: {}", e)))?;
        let ctx = Arc::new(ctx);
        contexts.insert(model_size.to_string(), ctx.clone());
        Ok(ctx)
    }
}

/// 16 kHz mono PCM, the only input whisper accepts.
async fn to_whisper_wav(input: &Path) -> JobResult<tempfile::TempPath> {
    let output = tempfile::Builder::new()
        .suffix(".wav")
        .tempfile()?
        .into_temp_path();

    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
        .arg(&*output)
        .output()
        .await
        .map_err(|e| JobError::Unavailable(format!("ffmpeg: {}", e)))?;

    if !status.status.success() {
        return Err(JobError::tool(
            "ffmpeg",
            String::from_utf8_lossy(&status.stderr).trim().to_string(),
        ));
    }
    Ok(output)
}

fn read_samples(path: &Path) -> JobResult<Vec<f32>> {
    let mut reader = WavReader::open(path).map_err(|e| JobError::tool("whisper", format!("failed to read WAV: {}", e)))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(JobError::tool("whisper", "expected 16-bit integer samples"));
    }

    reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|e| JobError::tool("whisper", format!("failed to read samples: {}", e)))
}

fn run_model(ctx: &WhisperContext, audio: &[f32], language: Option<&str>) -> JobResult<Transcription> {
    let failed = |e: whisper_rs::WhisperError| JobError::tool("whisper", e.to_string());

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(Some(language.unwrap_or("auto")));
    params.set_translate(false);
    params.set_n_threads(4);
    params.set_temperature(0.3);
    params.set_no_context(false);
    params.set_suppress_blank(true);
    params.set_suppress_non_speech_tokens(true);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_special(false);

    let mut state = ctx.create_state().map_err(failed)?;
    state.full(params, audio).map_err(failed)?;

    let mut segments = Vec::new();
    let mut text = String::new();
    for i in 0..state.full_n_segments().map_err(failed)? {
        let segment_text = state.full_get_segment_text(i).map_err(failed)?;
        // centiseconds
        let start = state.full_get_segment_t0(i).map_err(failed)? as f64 / 100.0;
        let end = state.full_get_segment_t1(i).map_err(failed)? as f64 / 100.0;
        text.push_str(&segment_text);
        segments.push(TranscriptionSegment {
            start,
            end,
            text: segment_text.trim().to_string(),
        });
    }

    let language = language.unwrap_or("auto").to_string();
    Ok(Transcription::new(text.trim().to_string(), language, segments))
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path, language: Option<&str>, model_size: &str) -> JobResult<Transcription> {
        let ctx = self.context(model_size)?;
        let wav = to_whisper_wav(audio).await?;
        let language = language.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let samples = read_samples(&wav)?;
            run_model(&ctx, &samples, language.as_deref())
        })
        .await
        .map_err(|e| JobError::Internal(format!("whisper worker panicked: {}", e)))?
    }
}
