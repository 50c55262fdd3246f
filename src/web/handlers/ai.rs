use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use super::submit;
use crate::schedule::types::{
    SpeechParams, TaskConfig, TaskParams, TranscribeParams, TranslateParams, WorkflowParams,
};
use crate::schedule::CallbackType;
use crate::web::response::{ok, ApiError, ApiResult};
use crate::workflow::WorkflowStage;
use crate::AppContext;

const DEFAULT_TARGET_LANGUAGE: &str = "hi";

pub fn ai_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/transcribe", post(transcribe))
        .route("/translate", post(translate))
        .route("/text-to-speech", post(text_to_speech))
        .route("/workflow", post(workflow))
        .route("/providers", get(providers))
        .route("/languages", get(languages))
}

#[derive(Debug, Deserialize)]
pub struct TranscriptionRequest {
    pub audio_path: PathBuf,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "TranscribeParams::default_model")]
    pub model: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

async fn transcribe(State(ctx): State<Arc<AppContext>>, Json(req): Json<TranscriptionRequest>) -> ApiResult {
    let params = TaskParams::Transcribe(TranscribeParams {
        audio_path: req.audio_path,
        language: req.language,
        model_size: req.model,
    });
    submit(&ctx, params, req.callback_url, "Audio transcription started").await
}

#[derive(Debug, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
}

/// Answers inline; translation is a single short call.
async fn translate(State(ctx): State<Arc<AppContext>>, Json(req): Json<TranslationRequest>) -> ApiResult {
    let translation = ctx
        .ai
        .translate(&req.text, &req.target_language, req.source_language.as_deref())
        .await?;
    Ok(ok(translation))
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default = "SpeechParams::default_language")]
    pub language: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

async fn text_to_speech(State(ctx): State<Arc<AppContext>>, Json(req): Json<TtsRequest>) -> ApiResult {
    let params = TaskParams::TextToSpeech(SpeechParams {
        text: req.text,
        language: req.language,
        voice: req.voice,
        provider: req.provider,
    });
    submit(&ctx, params, req.callback_url, "Text-to-speech conversion started").await
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default)]
    pub input_url: Option<String>,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub tts_provider: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// free-form extras; `target_language` is read from here when not given above
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowStep {
    pub step: &'static str,
    pub task_id: Option<String>,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct WorkflowStarted {
    pub workflow_id: String,
    pub status: &'static str,
    pub steps: Vec<WorkflowStep>,
    pub message: String,
}

async fn workflow(State(ctx): State<Arc<AppContext>>, Json(req): Json<WorkflowRequest>) -> ApiResult {
    if req.input_url.is_none() && req.input_file.is_none() {
        return Err(ApiError::bad_request("Either input_url or input_file must be provided"));
    }
    let target_language = req
        .target_language
        .or_else(|| {
            req.parameters
                .get("target_language")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string());
    let downloads = req.input_url.is_some();

    let mut config = TaskConfig::new(TaskParams::Workflow(WorkflowParams {
        input_url: req.input_url,
        input_path: req.input_file,
        target_language,
        source_language: req.source_language,
        tts_provider: req.tts_provider,
        voice: req.voice,
        model_size: req.model.unwrap_or_else(TranscribeParams::default_model),
    }));
    if let Some(url) = req.callback_url {
        config = config.with_callback(CallbackType::Http { url });
    }
    let task = ctx.task_manager.submit(config).await?;

    let steps = WorkflowStage::ALL
        .iter()
        .map(|stage| {
            let skipped = *stage == WorkflowStage::Download && !downloads;
            WorkflowStep {
                step: stage.as_str(),
                task_id: (!skipped).then(|| stage.task_id(&task.id)),
                status: if skipped { "skipped" } else { "pending" },
            }
        })
        .collect();

    Ok(ok(WorkflowStarted {
        workflow_id: task.id,
        status: "started",
        steps,
        message: "AI workflow started".to_string(),
    }))
}

async fn providers(State(ctx): State<Arc<AppContext>>) -> ApiResult {
    Ok(ok(serde_json::json!({
        "default": ctx.ai.default_provider(),
        "providers": ctx.ai.providers(),
    })))
}

async fn languages(State(ctx): State<Arc<AppContext>>) -> ApiResult {
    let languages = ctx.ai.languages().await?;
    Ok(ok(serde_json::json!({ "languages": languages })))
}
