use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Directory holding downloaded audio, transcripts and state files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Password gate settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Telegram bot settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Shared compute resource (pod) settings
    #[serde(default)]
    pub compute: ComputeConfig,

    /// Remote transcription worker settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Quick language detection settings
    #[serde(default)]
    pub language_detection: LanguageDetectionConfig,

    /// Conversation settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Active job registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Password gate configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Password a new user must send before using the bot
    #[serde(default = "String::new")]
    pub password: String,

    /// Allow-list file name, relative to the storage directory
    #[serde(default = "default_users_file")]
    pub users_file: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            users_file: default_users_file(),
        }
    }
}

/// Telegram Bot API configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelegramConfig {
    // @field: Bot token from BotFather
    #[serde(default = "String::new")]
    pub bot_token: String,

    // @field: Bot API base URL
    #[serde(default = "default_telegram_endpoint")]
    pub endpoint: String,

    // @field: Long-poll timeout for getUpdates
    #[serde(default = "default_telegram_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            endpoint: default_telegram_endpoint(),
            poll_timeout_secs: default_telegram_poll_timeout_secs(),
        }
    }
}

/// Compute lifecycle (pod) configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComputeConfig {
    // @field: Lifecycle API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Pod identifier
    #[serde(default = "String::new")]
    pub pod_id: String,

    // @field: Lifecycle REST base URL
    #[serde(default = "default_compute_endpoint")]
    pub endpoint: String,

    /// Start attempts, and the pause after a capacity error
    #[serde(default = "default_start_policy")]
    pub start_policy: RetryPolicy,

    /// Status polls made after each start request
    #[serde(default = "default_status_poll_policy")]
    pub status_poll_policy: RetryPolicy,

    /// Warm-up delay after the pod reports RUNNING, in seconds
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,

    // @field: HTTP timeout for lifecycle calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            pod_id: String::new(),
            endpoint: default_compute_endpoint(),
            start_policy: default_start_policy(),
            status_poll_policy: default_status_poll_policy(),
            settle_delay_secs: default_settle_delay_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ComputeConfig {
    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Remote transcription worker configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    // @field: Worker base URL (the pod's exposed HTTP endpoint)
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Hugging Face token forwarded for diarization models
    #[serde(default = "String::new")]
    pub hf_token: String,

    /// Job status polling
    #[serde(default = "default_job_poll_policy")]
    pub poll_policy: RetryPolicy,

    // @field: Upload timeout
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    // @field: Status request timeout
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,

    // @field: Transcript download timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            hf_token: String::new(),
            poll_policy: default_job_poll_policy(),
            submit_timeout_secs: default_submit_timeout_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Language detection service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LanguageDetectionConfig {
    // @field: OpenAI-compatible API base URL
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Model name
    #[serde(default = "default_detection_model")]
    pub model: String,

    // @field: Timeout seconds
    #[serde(default = "default_detection_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LanguageDetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detection_endpoint(),
            api_key: String::new(),
            model: default_detection_model(),
            timeout_secs: default_detection_timeout_secs(),
        }
    }
}

/// Conversation behaviour
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// How long to wait for a language confirmation reply
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Maximum characters per transcript message
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confirm_timeout_secs: default_confirm_timeout_secs(),
            chunk_chars: default_chunk_chars(),
        }
    }
}

impl SessionConfig {
    /// Confirmation timeout as a duration
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

/// Active job registry configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Counter file name, relative to the storage directory
    #[serde(default = "default_registry_file")]
    pub file: String,

    /// Zero the persisted count at start-up
    #[serde(default = "default_true")]
    pub reset_on_start: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            file: default_registry_file(),
            reset_on_start: true,
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Matching `log` filter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("files")
}

fn default_users_file() -> String {
    "users.txt".to_string()
}

fn default_registry_file() -> String {
    "active_jobs.txt".to_string()
}

fn default_telegram_endpoint() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_poll_timeout_secs() -> u64 {
    30
}

fn default_compute_endpoint() -> String {
    "https://rest.runpod.io/v1".to_string()
}

fn default_start_policy() -> RetryPolicy {
    // 40 start attempts, 10s pause after "not enough free GPUs"
    RetryPolicy::from_secs(40, 10)
}

fn default_status_poll_policy() -> RetryPolicy {
    // 60 polls, 5s apart: five minutes per start attempt
    RetryPolicy::from_secs(60, 5)
}

fn default_settle_delay_secs() -> u64 {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_job_poll_policy() -> RetryPolicy {
    // 720 polls, 10s apart: a two hour ceiling
    RetryPolicy::from_secs(720, 10)
}

fn default_submit_timeout_secs() -> u64 {
    3000
}

fn default_status_timeout_secs() -> u64 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    600
}

fn default_detection_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_detection_model() -> String {
    "whisper-1".to_string()
}

fn default_detection_timeout_secs() -> u64 {
    120
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_chunk_chars() -> usize {
    4000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load the configuration from `path`, writing a default file first if
    /// none exists
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let reader = BufReader::new(file);
            let config: Config = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            warn!("Config file not found at '{}', creating default config.", path.display());
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let config_json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write config to file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(anyhow!("Telegram bot token is required"));
        }
        if self.auth.password.is_empty() {
            return Err(anyhow!("Bot password is required"));
        }
        if self.compute.api_key.is_empty() || self.compute.pod_id.is_empty() {
            return Err(anyhow!("Compute API key and pod id are required"));
        }
        if self.worker.endpoint.is_empty() {
            return Err(anyhow!("Worker endpoint URL is required"));
        }
        url::Url::parse(&self.worker.endpoint)
            .with_context(|| format!("Invalid worker endpoint: {}", self.worker.endpoint))?;
        if self.compute.start_policy.max_attempts == 0
            || self.compute.status_poll_policy.max_attempts == 0
            || self.worker.poll_policy.max_attempts == 0
        {
            return Err(anyhow!("Retry policies need at least one attempt"));
        }
        if self.session.chunk_chars == 0 {
            return Err(anyhow!("Transcript chunk size must be positive"));
        }
        Ok(())
    }

    /// Absolute path of the allow-list file
    pub fn users_file_path(&self) -> PathBuf {
        self.storage_dir.join(&self.auth.users_file)
    }

    /// Absolute path of the active job counter file
    pub fn registry_file_path(&self) -> PathBuf {
        self.storage_dir.join(&self.registry.file)
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            storage_dir: default_storage_dir(),
            auth: AuthConfig::default(),
            telegram: TelegramConfig::default(),
            compute: ComputeConfig::default(),
            worker: WorkerConfig::default(),
            language_detection: LanguageDetectionConfig::default(),
            session: SessionConfig::default(),
            registry: RegistryConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
