use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

use super::{
    Language, SpeechRequest, SpeechSynthesizer, SynthesizedSpeech, Transcriber, Transcription, TranscriptionSegment,
    Translation, Translator,
};
use crate::config::HttpEndpoint;
use crate::error::{JobError, JobResult};
use crate::utils::http::{save_body, with_api_key};

fn request_error(service: &str, e: reqwest::Error) -> JobError {
    if e.is_connect() || e.is_timeout() {
        JobError::Unavailable(format!("{}: {}", service, e))
    } else if e.is_status() {
        JobError::tool(service, e.to_string())
    } else {
        JobError::Unavailable(format!("{}: {}", service, e))
    }
}

async fn ok_response(service: &str, response: reqwest::Response) -> JobResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(JobError::tool(service, format!("HTTP {}: {}", status, body.trim())))
}

/// OpenAI-style `audio/transcriptions` endpoint.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: HttpEndpoint,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, endpoint: HttpEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &Path, language: Option<&str>, model_size: &str) -> JobResult<Transcription> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&crate::storage::object::content_type_for(audio))
            .map_err(|e| JobError::Internal(e.to_string()))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", model_size.to_string())
            .text("response_format", "verbose_json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        info!("Transcribing {} with model {}", audio.display(), model_size);
        let request = with_api_key(self.client.post(&self.endpoint.url), self.endpoint.api_key.as_deref());
        let response = request
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error("transcription service", e))?;
        let body: VerboseTranscription = ok_response("transcription service", response)
            .await?
            .json()
            .await
            .map_err(|e| JobError::tool("transcription service", format!("invalid response: {}", e)))?;

        let language = body
            .language
            .or_else(|| language.map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Transcription::new(body.text.trim().to_string(), language, body.segments))
    }
}

/// LibreTranslate-style `/translate` endpoint.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: HttpEndpoint,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
    #[serde(default)]
    detected_language: Option<DetectedLanguage>,
}

#[derive(Debug, Deserialize)]
struct DetectedLanguage {
    language: String,
}

impl HttpTranslator {
    pub fn new(client: reqwest::Client, endpoint: HttpEndpoint) -> Self {
        Self { client, endpoint }
    }

    /// The provider's `/languages` listing next to its `/translate` route.
    fn languages_url(&self) -> String {
        let base = self.endpoint.url.trim_end_matches('/');
        let base = base.strip_suffix("/translate").unwrap_or(base);
        format!("{}/languages", base)
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target: &str, source: Option<&str>) -> JobResult<Translation> {
        let payload = json!({
            "q": text,
            "source": source.unwrap_or("auto"),
            "target": target,
            "format": "text",
            "api_key": self.endpoint.api_key,
        });
        debug!("Translating {} chars to {}", text.len(), target);

        let response = self
            .client
            .post(&self.endpoint.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_error("translation service", e))?;
        let body: TranslateResponse = ok_response("translation service", response)
            .await?
            .json()
            .await
            .map_err(|e| JobError::tool("translation service", format!("invalid response: {}", e)))?;

        let detected = body
            .detected_language
            .map(|d| d.language)
            .or_else(|| source.map(str::to_string))
            .unwrap_or_else(|| "auto".to_string());
        Ok(Translation {
            translated_text: body.translated_text,
            detected_source_language: detected,
            target_language: target.to_string(),
        })
    }

    async fn languages(&self) -> JobResult<Vec<Language>> {
        let request = self.client.get(self.languages_url());
        let response = with_api_key(request, self.endpoint.api_key.as_deref())
            .send()
            .await
            .map_err(|e| request_error("translation service", e))?;
        ok_response("translation service", response)
            .await?
            .json()
            .await
            .map_err(|e| JobError::tool("translation service", format!("invalid language list: {}", e)))
    }
}

/// Posts `{text, language, voice}` and stores the returned audio bytes.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> JobResult<SynthesizedSpeech> {
        let service = format!("{} speech provider", request.provider);
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "text": request.text,
                "language": request.language,
                "voice": request.voice,
            }))
            .send()
            .await
            .map_err(|e| request_error(&service, e))?;

        let response = ok_response(&service, response).await?;
        save_body(response, output)
            .await
            .map_err(|e| JobError::tool(&service, e.to_string()))?;

        Ok(SynthesizedSpeech {
            audio_path: output.to_path_buf(),
            provider: request.provider.clone(),
            language: request.language.clone(),
            voice: request.voice.clone(),
        })
    }
}
