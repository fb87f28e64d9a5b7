/*!
 * Job dispatch.
 *
 * One transcription job from lease to transcript: take a compute lease,
 * submit the audio to the worker, poll it to completion, store the
 * transcript next to the audio file and give the lease back.
 */

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_config::WorkerConfig;
use crate::errors::DispatchError;
use crate::file_utils::FileManager;
use crate::lifecycle::ComputeLifecycleManager;
use crate::providers::{JobRequest, JobStatus, TranscriptionWorker};
use crate::retry::RetryPolicy;

/// Result of a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Where the artifact was stored
    pub path: PathBuf,
    /// Trimmed transcript lines
    pub lines: Vec<String>,
}

impl Transcript {
    /// The lines joined back into one text
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Runs transcription jobs on the shared pod
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    lifecycle: ComputeLifecycleManager,
    worker: Arc<dyn TranscriptionWorker>,
    poll_policy: RetryPolicy,
}

impl JobDispatcher {
    pub fn new(
        lifecycle: ComputeLifecycleManager,
        worker: Arc<dyn TranscriptionWorker>,
        poll_policy: RetryPolicy,
    ) -> Self {
        Self {
            lifecycle,
            worker,
            poll_policy,
        }
    }

    pub fn from_config(
        lifecycle: ComputeLifecycleManager,
        worker: Arc<dyn TranscriptionWorker>,
        config: &WorkerConfig,
    ) -> Self {
        Self::new(lifecycle, worker, config.poll_policy)
    }

    /// Transcribe `audio_path`.
    ///
    /// The compute lease is released exactly once whatever the outcome.
    pub async fn dispatch(
        &self,
        audio_path: &Path,
        min_speakers: u32,
        max_speakers: u32,
        language: &str,
    ) -> Result<Transcript, DispatchError> {
        let lease = self.lifecycle.acquire().await?;

        let job = JobRequest {
            audio_path: audio_path.to_path_buf(),
            min_speakers,
            max_speakers,
            language: language.to_string(),
        };
        let outcome = self.run(&job).await;

        lease.release().await;
        outcome
    }

    async fn run(&self, job: &JobRequest) -> Result<Transcript, DispatchError> {
        let job_id = self
            .worker
            .submit(job)
            .await
            .map_err(|e| DispatchError::SubmissionFailed(e.to_string()))?;
        info!("Submitted job {} for {:?}", job_id, job.audio_path);

        self.wait_for_completion(&job_id).await?;

        let artifact = self
            .worker
            .fetch_result(&job_id)
            .await
            .map_err(|e| DispatchError::RemoteError(e.to_string()))?;
        let text = String::from_utf8_lossy(&artifact);

        let path = FileManager::transcript_path_for(&job.audio_path);
        tokio::fs::write(&path, text.as_bytes()).await?;
        info!("Transcript for job {} saved to {:?}", job_id, path);

        Ok(Transcript {
            path,
            lines: text.lines().map(|line| line.trim().to_string()).collect(),
        })
    }

    async fn wait_for_completion(&self, job_id: &str) -> Result<(), DispatchError> {
        let policy = self.poll_policy;
        for attempt in policy.attempts() {
            match self.worker.job_status(job_id).await {
                Ok(JobStatus::Done) => {
                    debug!("Job {} done after {} poll(s)", job_id, attempt);
                    return Ok(());
                }
                Ok(JobStatus::Error(detail)) => {
                    warn!("Job {} failed: {}", job_id, detail);
                    return Err(DispatchError::RemoteError(detail));
                }
                Ok(status) => debug!("Job {} poll {}: {:?}", job_id, attempt, status),
                Err(e) => debug!("Job {} poll {} failed: {}", job_id, attempt, e),
            }
            if policy.has_next(attempt) {
                policy.wait().await;
            }
        }

        warn!("Job {} timed out", job_id);
        Err(DispatchError::Timeout {
            attempts: policy.max_attempts,
        })
    }
}
