//! Fake collaborators shared by the unit tests.
//!
//! Media files are tiny JSON documents (`FakeMedia`); the fake tool runner
//! understands the subset of ffmpeg/ffprobe/sox/yt-dlp arguments the crate
//! produces and applies them to that representation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::ai::{
    AiServices, Language, SpeechRequest, SpeechSynthesizer, SynthesizedSpeech, Transcriber, Transcription, TranscriptionSegment,
    Translation, Translator,
};
use crate::config::{AiSettings, QueueSettings, Settings, ToolPaths};
use crate::error::{JobError, JobResult};
use crate::media::tool::{ToolInvocation, ToolOutput, ToolRunner};
use crate::schedule::TaskScheduler;
use crate::storage::object::{LocalStore, StorageManager};
use crate::storage::task::SqliteTaskStorage;
use crate::AppContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FakeMedia {
    pub duration: f64,
    pub parts: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub video: bool,
}

pub fn write_media(path: &Path, duration: f64, label: &str) -> PathBuf {
    write_fake(
        path,
        &FakeMedia {
            duration,
            parts: vec![label.to_string()],
            filters: Vec::new(),
            video: false,
        },
    );
    path.to_path_buf()
}

pub fn write_fake(path: &Path, media: &FakeMedia) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, serde_json::to_vec(media).unwrap()).unwrap();
}

pub fn read_media(path: &Path) -> FakeMedia {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn load(path: &str) -> JobResult<FakeMedia> {
    let raw = std::fs::read(path).map_err(|e| JobError::tool("ffmpeg", format!("{}: {}", path, e)))?;
    serde_json::from_slice(&raw).map_err(|e| JobError::tool("ffmpeg", format!("{}: invalid data: {}", path, e)))
}

fn store(path: &str, media: &FakeMedia) -> JobResult<()> {
    let data = serde_json::to_vec(media).map_err(|e| JobError::Internal(e.to_string()))?;
    std::fs::write(path, data).map_err(|e| JobError::tool("ffmpeg", e.to_string()))
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Scripted tool runner. Fails any program or filter it was told to fail.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<ToolInvocation>>,
    fail_programs: Mutex<HashSet<String>>,
    fail_filters: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_program(&self, program: &str) {
        self.fail_programs.lock().unwrap().insert(program.to_string());
    }

    pub fn fail_filter(&self, filter: &str) {
        self.fail_filters.lock().unwrap().insert(filter.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c.program == program).count()
    }

    fn check_filters(&self, program: &str, args: &[String]) -> JobResult<()> {
        let fail = self.fail_filters.lock().unwrap().clone();
        for flag in ["-af", "-vf", "-filter_complex"] {
            if let Some(graph) = value_after(args, flag) {
                if let Some(bad) = fail.iter().find(|f| graph.contains(f.as_str())) {
                    return Err(JobError::tool(program, format!("filter {} failed", bad)));
                }
            }
        }
        Ok(())
    }

    fn ffmpeg(&self, args: &[String]) -> JobResult<ToolOutput> {
        self.check_filters("ffmpeg", args)?;

        let inputs: Vec<&String> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "-i")
            .map(|(_, a)| a)
            .collect();
        let output = args.last().ok_or_else(|| JobError::tool("ffmpeg", "no output"))?;
        let sources = inputs.iter().map(|i| load(i)).collect::<JobResult<Vec<_>>>()?;
        let first = sources.first().cloned().ok_or_else(|| JobError::tool("ffmpeg", "no input"))?;

        let mut media = match value_after(args, "-filter_complex") {
            Some(graph) if graph.contains("concat") => FakeMedia {
                duration: sources.iter().map(|s| s.duration).sum(),
                parts: sources.iter().flat_map(|s| s.parts.clone()).collect(),
                filters: vec!["concat".to_string()],
                video: graph.contains("v=1"),
            },
            _ => first,
        };

        let start = value_after(args, "-ss").and_then(|v| v.parse::<f64>().ok());
        let length = value_after(args, "-t").and_then(|v| v.parse::<f64>().ok());
        if start.is_some() || length.is_some() {
            let start = start.unwrap_or(0.0);
            let available = (media.duration - start).max(0.0);
            let length = length.unwrap_or(available).min(available);
            media.parts = media
                .parts
                .iter()
                .map(|p| format!("{}[{}+{}]", p, start, length))
                .collect();
            media.duration = length;
        }

        if let Some(graph) = value_after(args, "-af") {
            for filter in graph.split(',') {
                let (name, value) = filter.split_once('=').unwrap_or((filter, ""));
                match name {
                    "atempo" => media.duration /= value.parse::<f64>().unwrap_or(1.0),
                    "asetrate" => {
                        let factor = value.rsplit('*').next().and_then(|f| f.parse::<f64>().ok());
                        media.duration /= factor.unwrap_or(1.0);
                    }
                    _ => {}
                }
                media.filters.push(name.to_string());
            }
        }
        if let Some(graph) = value_after(args, "-vf") {
            media.filters.push(graph.split('=').next().unwrap_or(graph).to_string());
        }
        if args.iter().any(|a| a == "-vn") {
            media.video = false;
        }

        store(output, &media)?;
        Ok(ToolOutput::default())
    }

    fn sox(&self, args: &[String]) -> JobResult<ToolOutput> {
        if args.iter().any(|a| a == "noiseprof") {
            load(&args[0])?;
            let profile = args.last().ok_or_else(|| JobError::tool("sox", "no profile"))?;
            std::fs::write(profile, b"profile").map_err(|e| JobError::tool("sox", e.to_string()))?;
        } else if let Some(pos) = args.iter().position(|a| a == "noisered") {
            let profile = &args[pos + 1];
            if !Path::new(profile).exists() {
                return Err(JobError::tool("sox", "missing noise profile"));
            }
            let mut media = load(&args[0])?;
            media.filters.push("noisered".to_string());
            store(&args[1], &media)?;
        }
        Ok(ToolOutput::default())
    }

    fn ffprobe(&self, args: &[String]) -> JobResult<ToolOutput> {
        let path = args.last().ok_or_else(|| JobError::tool("ffprobe", "no input"))?;
        let media = load(path).map_err(|e| JobError::tool("ffprobe", e.to_string()))?;
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut streams = vec![json!({
            "codec_type": "audio",
            "codec_name": "pcm_s16le",
            "sample_rate": "44100",
            "channels": 2,
            "bits_per_sample": 16
        })];
        if media.video {
            streams.push(json!({
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1280,
                "height": 720,
                "r_frame_rate": "30/1"
            }));
        }
        let stdout = json!({
            "streams": streams,
            "format": {
                "duration": format!("{:.6}", media.duration),
                "size": size.to_string(),
                "format_name": ext,
            }
        });
        Ok(ToolOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn ytdlp(&self, args: &[String]) -> JobResult<ToolOutput> {
        let url = args.last().ok_or_else(|| JobError::tool("yt-dlp", "no url"))?;
        if url.contains("unavailable") {
            return Err(JobError::tool("yt-dlp", "ERROR: Video unavailable"));
        }
        let template = value_after(args, "-o").ok_or_else(|| JobError::tool("yt-dlp", "no output template"))?;
        let filepath = template.replace("%(ext)s", "mp4");
        write_fake(
            Path::new(&filepath),
            &FakeMedia {
                duration: 10.0,
                parts: vec![url.clone()],
                filters: Vec::new(),
                video: true,
            },
        );
        let report = json!({"filepath": filepath, "title": "Fake clip", "duration": 10.0, "ext": "mp4"});
        Ok(ToolOutput {
            stdout: format!("[download] 100%\n{}\n", report),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation, cancel: &CancellationToken) -> JobResult<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(JobError::Timeout(format!("{} cancelled", invocation.program)));
                }
            }
        }

        if self.fail_programs.lock().unwrap().contains(&invocation.program) {
            return Err(JobError::tool(&invocation.program, "exited with status 1"));
        }

        let args = &invocation.args;
        match invocation.program.as_str() {
            "ffmpeg" => self.ffmpeg(args),
            "ffprobe" => self.ffprobe(args),
            "sox" => self.sox(args),
            "yt-dlp" => self.ytdlp(args),
            other => Err(JobError::tool(other, "not installed")),
        }
    }
}

pub fn tools() -> ToolPaths {
    ToolPaths::default()
}

pub fn fast_queue() -> QueueSettings {
    QueueSettings {
        result_expires: Duration::from_secs(3600),
        soft_time_limit: Duration::from_secs(5),
        time_limit: Duration::from_secs(10),
        workflow_time_limit: Duration::from_secs(20),
        max_retries: 1,
        lease: Duration::from_secs(30),
        ..QueueSettings::default()
    }
}

#[derive(Default)]
pub struct FakeTranscriber {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: &Path, language: Option<&str>, _model: &str) -> JobResult<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let media = load(&audio.to_string_lossy())?;
        let segments = vec![
            TranscriptionSegment {
                start: 0.0,
                end: media.duration / 2.0,
                text: "hello".to_string(),
            },
            TranscriptionSegment {
                start: media.duration / 2.0,
                end: media.duration,
                text: "world".to_string(),
            },
        ];
        Ok(Transcription::new(
            "hello world".to_string(),
            language.unwrap_or("en").to_string(),
            segments,
        ))
    }
}

#[derive(Default)]
pub struct FakeTranslator {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeTranslator {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, target: &str, source: Option<&str>) -> JobResult<Translation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(JobError::Unavailable("translation provider".to_string()));
        }
        Ok(Translation {
            translated_text: format!("[{}] {}", target, text),
            detected_source_language: source.unwrap_or("en").to_string(),
            target_language: target.to_string(),
        })
    }

    async fn languages(&self) -> JobResult<Vec<Language>> {
        if self.fail {
            return Err(JobError::Unavailable("translation provider".to_string()));
        }
        Ok([("en", "English"), ("es", "Spanish"), ("hi", "Hindi")]
            .into_iter()
            .map(|(code, name)| Language {
                code: code.to_string(),
                name: name.to_string(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeSynthesizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> JobResult<SynthesizedSpeech> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        write_fake(
            output,
            &FakeMedia {
                duration: 3.0,
                parts: vec![request.text.clone()],
                filters: Vec::new(),
                video: false,
            },
        );
        Ok(SynthesizedSpeech {
            audio_path: output.to_path_buf(),
            provider: request.provider.clone(),
            language: request.language.clone(),
            voice: request.voice.clone(),
        })
    }
}

/// Fake AI collaborators plus handles on their call counters.
#[derive(Clone)]
pub struct FakeAi {
    pub transcriber: Arc<FakeTranscriber>,
    pub translator: Arc<FakeTranslator>,
    pub synthesizer: Arc<FakeSynthesizer>,
}

impl FakeAi {
    pub fn new() -> Self {
        Self::with_translator(FakeTranslator::default())
    }

    pub fn with_translator(translator: FakeTranslator) -> Self {
        Self {
            transcriber: Arc::new(FakeTranscriber::default()),
            translator: Arc::new(translator),
            synthesizer: Arc::new(FakeSynthesizer::default()),
        }
    }

    pub fn services(&self) -> AiServices {
        AiServices::new("google")
            .with_transcriber(self.transcriber.clone())
            .with_translator(self.translator.clone())
            .with_synthesizer("google", self.synthesizer.clone())
    }
}

/// Settings with every directory under `root` and no remote storage.
pub fn settings(root: &Path) -> Settings {
    Settings {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        broker_url: "sqlite::memory:".to_string(),
        log_dir: root.join("logs"),
        upload_dir: root.join("uploads"),
        processed_dir: root.join("processed"),
        download_dir: root.join("videos"),
        local_storage_dir: root.join("storage"),
        local_storage_url: "/files".to_string(),
        r2: None,
        signed_url_ttl: Duration::from_secs(86400),
        queue: fast_queue(),
        tools: tools(),
        ai: AiSettings {
            transcribe: None,
            whisper_model_dir: None,
            translate: None,
            tts_providers: HashMap::new(),
            tts_default_provider: "google".to_string(),
        },
    }
}

/// A full application over fakes: in-memory job records, local storage,
/// the scripted tool runner and a running worker pool.
pub struct Harness {
    pub dir: TempDir,
    pub runner: Arc<FakeRunner>,
    pub ai: FakeAi,
    pub ctx: Arc<AppContext>,
    pub scheduler: Arc<TaskScheduler>,
}

impl Harness {
    pub async fn start(ai: FakeAi) -> anyhow::Result<Self> {
        Self::start_with(ai, |_| {}).await
    }

    pub async fn start_with(ai: FakeAi, configure: impl FnOnce(&mut Settings)) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let mut settings = settings(dir.path());
        configure(&mut settings);
        settings.ensure_dirs()?;

        let runner = FakeRunner::new();
        let storage = StorageManager::new(Arc::new(LocalStore::new(
            &settings.local_storage_dir,
            &settings.local_storage_url,
        )));
        let tasks = Arc::new(SqliteTaskStorage::in_memory().await?);
        let ctx = Arc::new(AppContext::new(settings, tasks, storage, runner.clone(), ai.services()));

        let scheduler = Arc::new(
            TaskScheduler::new(ctx.task_manager.clone())
                .with_poll_interval(Duration::from_millis(50))
                .with_sweep_interval(Duration::from_millis(200)),
        );
        scheduler.spawn_pool().await;
        let sweeper = scheduler.clone();
        tokio::spawn(async move {
            let _ = sweeper.run().await;
        });

        Ok(Self {
            dir,
            runner,
            ai,
            ctx,
            scheduler,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn wait(&self, task_id: &str) -> JobResult<crate::schedule::Task> {
        self.ctx
            .task_manager
            .wait_for_terminal(task_id, Duration::from_secs(10))
            .await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
