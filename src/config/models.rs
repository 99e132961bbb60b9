use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Forwarded to the upstream auth layer, never used by the core.
    /// Loaded from `JWT_SECRET`, not from TOML.
    #[serde(skip)]
    pub jwt_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            storage: StorageConfig::default(),
            ai: AiConfig::default(),
            queues: QueuesConfig::default(),
            render: RenderConfig::default(),
            retention: RetentionConfig::default(),
            jwt_secret: None,
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Root directory for the document store and queue keyspaces.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Blob storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    S3,
    Memory,
}

impl Default for StorageProvider {
    fn default() -> Self {
        StorageProvider::Local
    }
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the `local` provider.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// S3 credentials (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
    #[serde(default = "default_max_upload")]
    pub max_upload: ByteSize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            base_path: default_base_path(),
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            max_upload: default_max_upload(),
        }
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from("data/blobs")
}

fn default_bucket() -> String {
    "cvforge-default".to_string()
}

fn default_max_upload() -> ByteSize {
    ByteSize(20 * 1024 * 1024) // 20 MB
}

/// AI provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    OpenAi,
    Anthropic,
    Gemini,
    HuggingFace,
    Ollama,
    Mock,
}

impl Default for AiProvider {
    fn default() -> Self {
        AiProvider::Mock
    }
}

impl AiProvider {
    /// Self-hosted providers take per-task hosts; cloud providers use their
    /// published endpoints.
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, AiProvider::Ollama | AiProvider::HuggingFace)
    }
}

/// LLM adapter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProvider,
    /// Re-prompt budget for unrepairable JSON responses.
    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub tasks: TaskConfigs,
    /// Provider API keys (loaded from environment, not from config file)
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    #[serde(skip)]
    pub anthropic_api_key: Option<String>,
    #[serde(skip)]
    pub gemini_api_key: Option<String>,
    #[serde(skip)]
    pub hf_api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::Mock,
            max_retries: default_ai_max_retries(),
            timeout_secs: default_ai_timeout_secs(),
            tasks: TaskConfigs::default(),
            openai_api_key: None,
            anthropic_api_key: None,
            gemini_api_key: None,
            hf_api_key: None,
        }
    }
}

fn default_ai_max_retries() -> u32 {
    2
}

fn default_ai_timeout_secs() -> u64 {
    120
}

/// Per-task model tuning (parse / optimize / ats)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfigs {
    #[serde(default = "default_parse_tuning")]
    pub parse: TaskTuning,
    #[serde(default = "default_optimize_tuning")]
    pub optimize: TaskTuning,
    #[serde(default = "default_ats_tuning")]
    pub ats: TaskTuning,
}

impl Default for TaskConfigs {
    fn default() -> Self {
        Self {
            parse: default_parse_tuning(),
            optimize: default_optimize_tuning(),
            ats: default_ats_tuning(),
        }
    }
}

/// Model/host tuple resolved per logical task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskTuning {
    /// Task-specific host for self-hosted providers (hardware isolation).
    pub host: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
}

fn default_parse_tuning() -> TaskTuning {
    TaskTuning {
        host: None,
        model: "gpt-4o-mini".to_string(),
        temperature: 0.1,
        max_tokens: 4096,
        top_p: default_top_p(),
        top_k: default_top_k(),
        num_ctx: default_num_ctx(),
        repeat_penalty: default_repeat_penalty(),
    }
}

fn default_optimize_tuning() -> TaskTuning {
    TaskTuning {
        host: None,
        model: "gpt-4o-mini".to_string(),
        temperature: 0.3,
        max_tokens: 4096,
        top_p: default_top_p(),
        top_k: default_top_k(),
        num_ctx: default_num_ctx(),
        repeat_penalty: default_repeat_penalty(),
    }
}

fn default_ats_tuning() -> TaskTuning {
    TaskTuning {
        host: None,
        model: "gpt-4o-mini".to_string(),
        temperature: 0.2,
        max_tokens: 2048,
        top_p: default_top_p(),
        top_k: default_top_k(),
        num_ctx: default_num_ctx(),
        repeat_penalty: default_repeat_penalty(),
    }
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

fn default_num_ctx() -> u32 {
    8192
}

fn default_repeat_penalty() -> f32 {
    1.1
}

/// Static per-queue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub concurrency: usize,
    /// Default priority for jobs submitted without one (0-10).
    pub priority: u8,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    /// Hard wall-clock deadline per job.
    pub timeout_secs: u64,
    pub max_retries: u32,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffConfig,
}

/// Sliding-window rate limit
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimit {
    pub max: u32,
    pub window_ms: u64,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

fn default_backoff() -> BackoffConfig {
    BackoffConfig {
        base_ms: 1_000,
        multiplier: 2.0,
        max_ms: 300_000,
    }
}

/// The fixed queue set
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueuesConfig {
    #[serde(default = "default_parsing_queue")]
    pub parsing: QueueConfig,
    #[serde(default = "default_optimization_queue")]
    pub optimization: QueueConfig,
    #[serde(default = "default_generation_queue")]
    pub generation: QueueConfig,
    #[serde(default = "default_ats_queue")]
    pub ats: QueueConfig,
    #[serde(default = "default_webhook_queue")]
    pub webhook_delivery: QueueConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            parsing: default_parsing_queue(),
            optimization: default_optimization_queue(),
            generation: default_generation_queue(),
            ats: default_ats_queue(),
            webhook_delivery: default_webhook_queue(),
        }
    }
}

fn default_parsing_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        priority: 5,
        rate_limit: Some(RateLimit { max: 30, window_ms: 60_000 }),
        timeout_secs: 300,
        max_retries: 3,
        backoff: default_backoff(),
    }
}

fn default_optimization_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        priority: 5,
        rate_limit: Some(RateLimit { max: 30, window_ms: 60_000 }),
        timeout_secs: 600,
        max_retries: 3,
        backoff: default_backoff(),
    }
}

fn default_generation_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        priority: 4,
        rate_limit: None,
        timeout_secs: 180,
        max_retries: 3,
        backoff: default_backoff(),
    }
}

fn default_ats_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        priority: 5,
        rate_limit: Some(RateLimit { max: 30, window_ms: 60_000 }),
        timeout_secs: 300,
        max_retries: 3,
        backoff: default_backoff(),
    }
}

fn default_webhook_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 4,
        priority: 3,
        rate_limit: Some(RateLimit { max: 120, window_ms: 60_000 }),
        timeout_secs: 150,
        max_retries: 1,
        backoff: default_backoff(),
    }
}

/// Headless-browser strategy for PDF rasterization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserStrategy {
    /// Connect to an external browser over its devtools websocket endpoint.
    Remote,
    /// Launch a local headless process per render.
    Local,
}

impl Default for BrowserStrategy {
    fn default() -> Self {
        BrowserStrategy::Local
    }
}

/// Document rendering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub browser: BrowserStrategy,
    /// Devtools endpoint for the `remote` strategy, e.g. `http://browser:9222`.
    pub browser_endpoint: Option<String>,
    /// Executable for the `local` strategy.
    #[serde(default = "default_browser_path")]
    pub browser_path: PathBuf,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            browser: BrowserStrategy::Local,
            browser_endpoint: None,
            browser_path: default_browser_path(),
            timeout_secs: default_render_timeout_secs(),
        }
    }
}

fn default_browser_path() -> PathBuf {
    PathBuf::from("chromium")
}

fn default_render_timeout_secs() -> u64 {
    60
}

/// Retention floors per record family
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_completed_jobs_days")]
    pub completed_jobs_days: u32,
    #[serde(default = "default_failed_jobs_days")]
    pub failed_jobs_days: u32,
    #[serde(default = "default_deliveries_days")]
    pub deliveries_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_jobs_days: default_completed_jobs_days(),
            failed_jobs_days: default_failed_jobs_days(),
            deliveries_days: default_deliveries_days(),
        }
    }
}

fn default_completed_jobs_days() -> u32 {
    1
}

fn default_failed_jobs_days() -> u32 {
    7
}

fn default_deliveries_days() -> u32 {
    30
}
