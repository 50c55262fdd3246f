use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::schedule::types::QueueName;

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_BROKER_URL: &str = "sqlite://./mediaflow_data/broker.db?mode=rwc";

/// Looks a key up in the process environment first, then in `.env`.
pub fn env_value(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
    .filter(|value| !value.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_value(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_value(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// Remote object-store credentials. Only built when every field is present.
#[derive(Debug, Clone)]
pub struct R2Credentials {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub endpoint: Option<String>,
}

impl R2Credentials {
    pub fn from_env() -> Option<Self> {
        let account_id = env_value("CLOUDFLARE_ACCOUNT_ID");
        let access_key_id = env_value("CLOUDFLARE_R2_ACCESS_KEY_ID");
        let secret_access_key = env_value("CLOUDFLARE_R2_SECRET_ACCESS_KEY");
        let bucket = env_value("CLOUDFLARE_R2_BUCKET_NAME");

        match (account_id, access_key_id, secret_access_key, bucket) {
            (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                Some(Self {
                    account_id,
                    access_key_id,
                    secret_access_key,
                    bucket,
                    endpoint: env_value("CLOUDFLARE_R2_ENDPOINT"),
                })
            }
            _ => None,
        }
    }

    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.r2.cloudflarestorage.com", self.account_id))
    }
}

/// External binaries invoked by the operation registry and the downloader.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub sox: String,
    pub ytdlp: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            sox: "sox".to_string(),
            ytdlp: "yt-dlp".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub transcribe: Option<HttpEndpoint>,
    pub whisper_model_dir: Option<PathBuf>,
    pub translate: Option<HttpEndpoint>,
    /// provider name -> synthesis endpoint
    pub tts_providers: HashMap<String, String>,
    pub tts_default_provider: String,
}

/// Queue timing and worker-pool limits.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub result_expires: Duration,
    pub soft_time_limit: Duration,
    pub time_limit: Duration,
    pub workflow_time_limit: Duration,
    pub max_retries: u32,
    pub lease: Duration,
    pub concurrency: HashMap<QueueName, usize>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            result_expires: Duration::from_secs(3600),
            soft_time_limit: Duration::from_secs(300),
            time_limit: Duration::from_secs(600),
            workflow_time_limit: Duration::from_secs(3600),
            max_retries: 3,
            lease: Duration::from_secs(120),
            concurrency: QueueName::ALL
                .iter()
                .map(|queue| (*queue, queue.default_concurrency()))
                .collect(),
        }
    }
}

impl QueueSettings {
    pub fn concurrency_for(&self, queue: QueueName) -> usize {
        self.concurrency
            .get(&queue)
            .copied()
            .unwrap_or_else(|| queue.default_concurrency())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub addr: SocketAddr,
    pub broker_url: String,
    pub log_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub download_dir: PathBuf,
    pub local_storage_dir: PathBuf,
    pub local_storage_url: String,
    pub r2: Option<R2Credentials>,
    pub signed_url_ttl: Duration,
    pub queue: QueueSettings,
    pub tools: ToolPaths,
    pub ai: AiSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let addr = env_or("MEDIAFLOW_ADDR", DEFAULT_ADDR)
            .parse()
            .context("invalid MEDIAFLOW_ADDR")?;

        let mut concurrency = HashMap::new();
        for queue in QueueName::ALL {
            let key = format!("WORKER_CONCURRENCY_{}", queue.as_str().to_uppercase());
            let slots: usize = env_parse(&key, queue.default_concurrency())?;
            concurrency.insert(queue, slots.max(1));
        }

        let queue = QueueSettings {
            result_expires: Duration::from_secs(env_parse("RESULT_EXPIRES_SECS", 3600)?),
            soft_time_limit: Duration::from_secs(env_parse("TASK_SOFT_TIME_LIMIT_SECS", 300)?),
            time_limit: Duration::from_secs(env_parse("TASK_TIME_LIMIT_SECS", 600)?),
            workflow_time_limit: Duration::from_secs(env_parse("WORKFLOW_TIME_LIMIT_SECS", 3600)?),
            max_retries: env_parse("TASK_MAX_RETRIES", 3)?,
            lease: Duration::from_secs(env_parse("WORKER_LEASE_SECS", 120)?),
            concurrency,
        };

        let tools = ToolPaths {
            ffmpeg: env_or("FFMPEG_BIN", "ffmpeg"),
            ffprobe: env_or("FFPROBE_BIN", "ffprobe"),
            sox: env_or("SOX_BIN", "sox"),
            ytdlp: env_or("YTDLP_BIN", "yt-dlp"),
        };

        let ai = AiSettings {
            transcribe: env_value("TRANSCRIBE_API_URL").map(|url| HttpEndpoint {
                url,
                api_key: env_value("TRANSCRIBE_API_KEY"),
            }),
            whisper_model_dir: env_value("WHISPER_MODEL_DIR").map(PathBuf::from),
            translate: env_value("TRANSLATE_API_URL").map(|url| HttpEndpoint {
                url,
                api_key: env_value("TRANSLATE_API_KEY"),
            }),
            tts_providers: parse_providers(&env_or("TTS_PROVIDERS", ""))?,
            tts_default_provider: env_or("TTS_DEFAULT_PROVIDER", "google"),
        };

        Ok(Self {
            addr,
            broker_url: env_or("MEDIAFLOW_BROKER_URL", DEFAULT_BROKER_URL),
            log_dir: PathBuf::from(env_or("MEDIAFLOW_LOG_DIR", "./logs")),
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "./uploads")),
            processed_dir: PathBuf::from(env_or("PROCESSED_DIR", "./processed")),
            download_dir: PathBuf::from(env_or("DOWNLOAD_DIR", "./videos")),
            local_storage_dir: PathBuf::from(env_or("LOCAL_STORAGE_DIR", "./storage")),
            local_storage_url: env_or("LOCAL_STORAGE_URL", "/files"),
            r2: R2Credentials::from_env(),
            signed_url_ttl: Duration::from_secs(env_parse("SIGNED_URL_TTL_SECS", 86400)?),
            queue,
            tools,
            ai,
        })
    }

    /// Creates the scratch directories and the SQLite parent directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.upload_dir,
            &self.processed_dir,
            &self.download_dir,
            &self.local_storage_dir,
            &self.log_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }

        if let Some(db_path) = self.broker_url.strip_prefix("sqlite://") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(dir) = std::path::Path::new(db_path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create database directory {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

/// Parses `name=url,name=url`.
fn parse_providers(raw: &str) -> Result<HashMap<String, String>> {
    let mut providers = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry
            .split_once('=')
            .with_context(|| format!("invalid TTS_PROVIDERS entry: {}", entry))?;
        providers.insert(name.trim().to_string(), url.trim().to_string());
    }
    Ok(providers)
}
