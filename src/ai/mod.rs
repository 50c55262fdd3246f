//! Speech-to-text, translation and speech synthesis collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::AiSettings;
use crate::error::{JobError, JobResult};

pub mod http;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use http::{HttpSynthesizer, HttpTranscriber, HttpTranslator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
    pub segments: Vec<TranscriptionSegment>,
    /// end of the last segment, 0 without segments
    pub duration: f64,
}

impl Transcription {
    pub fn new(text: String, language: String, segments: Vec<TranscriptionSegment>) -> Self {
        let duration = segments.last().map(|s| s.end).unwrap_or(0.0);
        Self {
            text,
            language,
            segments,
            duration,
        }
    }

    /// Full text followed by one timestamped line per segment.
    pub fn to_transcript(&self) -> String {
        let mut out = format!("{}\n\n", self.text.trim());
        for segment in &self.segments {
            let _ = writeln!(
                out,
                "[{} - {}] {}",
                timestamp(segment.start),
                timestamp(segment.end),
                segment.text.trim()
            );
        }
        out
    }
}

fn timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0);
    let minutes = (total / 60.0).floor() as u64;
    format!("{:02}:{:05.2}", minutes, total - minutes as f64 * 60.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub translated_text: String,
    pub detected_source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub language: String,
    pub voice: Option<String>,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedSpeech {
    pub audio_path: PathBuf,
    pub provider: String,
    pub language: String,
    pub voice: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path, language: Option<&str>, model_size: &str) -> JobResult<Transcription>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str, source: Option<&str>) -> JobResult<Translation>;

    /// Languages the provider can translate into.
    async fn languages(&self) -> JobResult<Vec<Language>>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Writes the synthesized audio to `output`.
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> JobResult<SynthesizedSpeech>;
}

/// The configured collaborators. Anything missing reports `Unavailable`.
#[derive(Clone, Default)]
pub struct AiServices {
    transcriber: Option<Arc<dyn Transcriber>>,
    translator: Option<Arc<dyn Translator>>,
    synthesizers: HashMap<String, Arc<dyn SpeechSynthesizer>>,
    default_provider: String,
}

impl AiServices {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            default_provider: default_provider.into(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &AiSettings, client: reqwest::Client) -> Self {
        let mut services = Self::new(&settings.tts_default_provider);

        if let Some(endpoint) = &settings.transcribe {
            info!("Transcription endpoint: {}", endpoint.url);
            services = services.with_transcriber(Arc::new(HttpTranscriber::new(client.clone(), endpoint.clone())));
        }
        #[cfg(feature = "whisper")]
        if services.transcriber.is_none() {
            if let Some(dir) = &settings.whisper_model_dir {
                info!("Local whisper models: {}", dir.display());
                services = services.with_transcriber(Arc::new(whisper::WhisperTranscriber::new(dir.clone())));
            }
        }

        if let Some(endpoint) = &settings.translate {
            info!("Translation endpoint: {}", endpoint.url);
            services = services.with_translator(Arc::new(HttpTranslator::new(client.clone(), endpoint.clone())));
        }
        for (name, url) in &settings.tts_providers {
            info!("Speech provider {}: {}", name, url);
            services = services.with_synthesizer(name, Arc::new(HttpSynthesizer::new(client.clone(), url.clone())));
        }
        services
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_synthesizer(mut self, provider: impl Into<String>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizers.insert(provider.into(), synthesizer);
        self
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.synthesizers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn transcriber(&self) -> JobResult<&Arc<dyn Transcriber>> {
        self.transcriber
            .as_ref()
            .ok_or_else(|| JobError::Unavailable("transcription service".into()))
    }

    pub fn translator(&self) -> JobResult<&Arc<dyn Translator>> {
        self.translator
            .as_ref()
            .ok_or_else(|| JobError::Unavailable("translation service".into()))
    }

    /// Explicit provider, or the configured default. Never another provider.
    pub fn synthesizer(&self, provider: Option<&str>) -> JobResult<(String, &Arc<dyn SpeechSynthesizer>)> {
        let name = provider.unwrap_or(&self.default_provider);
        self.synthesizers
            .get(name)
            .map(|s| (name.to_string(), s))
            .ok_or_else(|| JobError::Unavailable(format!("speech provider {:?}", name)))
    }

    /// Checks the input exists before handing it to the transcriber.
    pub async fn transcribe(&self, audio: &Path, language: Option<&str>, model_size: &str) -> JobResult<Transcription> {
        if !audio.exists() {
            return Err(JobError::NotFound(audio.display().to_string()));
        }
        self.transcriber()?.transcribe(audio, language, model_size).await
    }

    pub async fn translate(&self, text: &str, target: &str, source: Option<&str>) -> JobResult<Translation> {
        if text.trim().is_empty() {
            return Err(JobError::Validation("nothing to translate".into()));
        }
        self.translator()?.translate(text, target, source).await
    }

    pub async fn languages(&self) -> JobResult<Vec<Language>> {
        self.translator()?.languages().await
    }

    pub async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice: Option<&str>,
        provider: Option<&str>,
        output: &Path,
    ) -> JobResult<SynthesizedSpeech> {
        let (provider, synthesizer) = self.synthesizer(provider)?;
        let request = SpeechRequest {
            text: text.to_string(),
            language: language.to_string(),
            voice: voice.map(str::to_string),
            provider,
        };
        synthesizer.synthesize(&request, output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{write_media, FakeSynthesizer, FakeTranscriber};
    use anyhow::Result;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    #[test]
    fn duration_is_last_segment_end() {
        let empty = Transcription::new(String::new(), "en".into(), Vec::new());
        assert_eq!(empty.duration, 0.0);

        let t = Transcription::new(
            "a b".into(),
            "en".into(),
            vec![
                TranscriptionSegment { start: 0.0, end: 1.5, text: "a".into() },
                TranscriptionSegment { start: 1.5, end: 61.25, text: "b".into() },
            ],
        );
        assert_eq!(t.duration, 61.25);
        assert!(t.to_transcript().contains("[00:01.50 - 01:01.25] b"));
    }

    #[tokio::test]
    async fn missing_audio_is_not_found_before_transcriber_runs() -> Result<()> {
        let dir = TempDir::new()?;
        let transcriber = Arc::new(FakeTranscriber::default());
        let services = AiServices::new("google").with_transcriber(transcriber.clone());

        let err = services
            .transcribe(&dir.path().join("missing.wav"), None, "base")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 0);

        let audio = write_media(&dir.path().join("a.wav"), 8.0, "speech");
        let result = services.transcribe(&audio, Some("en"), "base").await?;
        assert_eq!(result.duration, 8.0);
        Ok(())
    }

    #[tokio::test]
    async fn unconfigured_provider_is_unavailable() -> Result<()> {
        let dir = TempDir::new()?;
        let google = Arc::new(FakeSynthesizer::default());
        let services = AiServices::new("google").with_synthesizer("google", google.clone());
        let out = dir.path().join("speech.mp3");

        let err = services
            .synthesize("hola", "es", None, Some("aws"), &out)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        // no silent switch to another provider
        assert_eq!(google.calls.load(Ordering::SeqCst), 0);

        let speech = services.synthesize("hola", "es", None, None, &out).await?;
        assert_eq!(speech.provider, "google");

        let err = AiServices::new("google").translate("hi", "es", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        Ok(())
    }
}
