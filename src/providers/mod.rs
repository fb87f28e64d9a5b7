/*!
 * Client interfaces for the remote services the orchestration engine drives.
 *
 * This module contains the traits the engine depends on and their
 * production implementations:
 * - `runpod`: lifecycle REST API of the shared GPU pod
 * - `whisperx`: HTTP job API of the transcription worker running on the pod
 * - `whisper_detect`: OpenAI-compatible quick language detection
 * - `mock`: in-process stand-ins used by tests
 */

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{self, Debug};
use std::path::{Path, PathBuf};

use crate::errors::ProviderError;

/// Status of the shared compute resource as reported by its lifecycle API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    /// The resource is up
    Running,
    /// Any other reported status (`EXITED`, `PAUSED`, ...)
    Other(String),
}

impl ResourceStatus {
    /// Parse a lifecycle API status string
    pub fn from_api(status: &str) -> Self {
        if status.eq_ignore_ascii_case("RUNNING") {
            Self::Running
        } else {
            Self::Other(status.to_string())
        }
    }

    /// Whether the resource is up
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Other(status) => write!(f, "{}", status),
        }
    }
}

/// Lifecycle operations on the shared compute resource.
///
/// The engine never owns the resource state; it only decides when to call
/// these operations.
#[async_trait]
pub trait ComputeResource: Send + Sync + Debug {
    /// Query the current status
    async fn status(&self) -> Result<ResourceStatus, ProviderError>;

    /// Ask the provider to start (resume) the resource.
    ///
    /// Returns `ProviderError::CapacityExhausted` when the provider has no
    /// free capacity right now.
    async fn request_start(&self) -> Result<(), ProviderError>;

    /// Ask the provider to pause the resource
    async fn request_pause(&self) -> Result<(), ProviderError>;
}

/// Parameters of one transcription job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Local audio file to upload
    pub audio_path: PathBuf,
    /// Lower bound of speakers for diarization
    pub min_speakers: u32,
    /// Upper bound of speakers for diarization
    pub max_speakers: u32,
    /// Transcription language code
    pub language: String,
}

/// Status of a submitted job as reported by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, not started
    Pending,
    /// In progress
    Running,
    /// Finished, result available
    Done,
    /// Failed on the worker, with its error detail
    Error(String),
    /// Any status this client does not know
    Unknown(String),
}

impl JobStatus {
    /// Parse the worker's `status` / `error` fields
    pub fn from_api(status: &str, error: Option<String>) -> Self {
        match status {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "done" => Self::Done,
            "error" => Self::Error(error.unwrap_or_else(|| "unknown error".to_string())),
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// HTTP job API of the remote transcription worker
#[async_trait]
pub trait TranscriptionWorker: Send + Sync + Debug {
    /// Upload the audio and parameters, returning the worker's job id
    async fn submit(&self, job: &JobRequest) -> Result<String, ProviderError>;

    /// Current status of a job
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ProviderError>;

    /// Download the finished transcript artifact
    async fn fetch_result(&self, job_id: &str) -> Result<Bytes, ProviderError>;
}

/// Quick spoken-language detection
#[async_trait]
pub trait LanguageDetector: Send + Sync + Debug {
    /// Detect the language of an audio file, returning a short code
    /// or `"unknown"`
    async fn detect_language(&self, audio_path: &Path) -> Result<String, ProviderError>;
}

/// Read an error body for logging, truncated to keep logs readable
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    if text.chars().count() > 500 {
        text.chars().take(500).collect()
    } else {
        text
    }
}

pub mod mock;
pub mod runpod;
pub mod whisper_detect;
pub mod whisperx;
