use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::app_config::WorkerConfig;
use crate::errors::ProviderError;
use crate::providers::{error_body, JobRequest, JobStatus, TranscriptionWorker};

/// Client for the WhisperX job server running on the shared pod
pub struct WhisperX {
    /// HTTP client for API requests
    client: Client,
    /// Server base URL
    endpoint: String,
    /// Hugging Face token forwarded with each job
    hf_token: String,
    /// Upload timeout
    submit_timeout: Duration,
    /// Status request timeout
    status_timeout: Duration,
    /// Transcript download timeout
    fetch_timeout: Duration,
}

/// Submission response
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    /// Identifier of the queued job
    job_id: Option<String>,
}

/// Job status response
#[derive(Debug, Deserialize)]
struct StatusResponse {
    /// `pending`, `running`, `done` or `error`
    status: String,
    /// Error detail when `status` is `error`
    #[serde(default)]
    error: Option<String>,
}

impl fmt::Debug for WhisperX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhisperX")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl WhisperX {
    /// Create a worker client from configuration
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            hf_token: config.hf_token.clone(),
            submit_timeout: Duration::from_secs(config.submit_timeout_secs),
            status_timeout: Duration::from_secs(config.status_timeout_secs),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }

    fn submit_url(&self) -> String {
        format!("{}/run_whisperx", self.endpoint)
    }

    fn status_url(&self, job_id: &str) -> String {
        format!("{}/job_status/{}", self.endpoint, job_id)
    }

    fn transcript_url(&self, job_id: &str) -> String {
        format!("{}/get_transcript/{}", self.endpoint, job_id)
    }
}

#[async_trait]
impl TranscriptionWorker for WhisperX {
    async fn submit(&self, job: &JobRequest) -> Result<String, ProviderError> {
        let audio = tokio::fs::read(&job.audio_path)
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("cannot read {:?}: {}", job.audio_path, e)))?;
        let file_name = job
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.audio".to_string());

        let part = multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let form = multipart::Form::new()
            .part("audio", part)
            .text("min_speakers", job.min_speakers.to_string())
            .text("max_speakers", job.max_speakers.to_string())
            .text("language", job.language.clone())
            .text("HF_TOKEN", self.hf_token.clone());

        let response = self
            .client
            .post(self.submit_url())
            .timeout(self.submit_timeout)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: body,
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", e, body)))?;
        parsed
            .job_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::ParseError(format!("No job_id in response: {}", body)))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .client
            .get(self.status_url(job_id))
            .timeout(self.status_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body(response).await,
            });
        }

        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        debug!("Job {} status: {}", job_id, parsed.status);
        Ok(JobStatus::from_api(&parsed.status, parsed.error))
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Bytes, ProviderError> {
        let response = self
            .client
            .get(self.transcript_url(job_id))
            .timeout(self.fetch_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body(response).await,
            });
        }
        Ok(response.bytes().await?)
    }
}
