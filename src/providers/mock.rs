/*!
 * Mock provider implementations for testing.
 *
 * This module provides in-process stand-ins for the remote services:
 * - `MockComputeResource` - a pod whose start outcomes can be scripted
 * - `MockWorker` - a transcription worker with scripted job statuses
 * - `MockLanguageDetector` - a detector returning a fixed answer
 *
 * Every mock counts its calls so tests can assert on side effects.
 */

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::ProviderError;
use crate::providers::{
    ComputeResource, JobRequest, JobStatus, LanguageDetector, ResourceStatus, TranscriptionWorker,
};

/// Scripted answer to one start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The provider accepts the request and the pod boots
    Accept,
    /// The provider reports no free GPUs
    NoCapacity,
    /// The provider fails with a generic API error
    Fail,
}

#[derive(Debug)]
struct PodState {
    running: bool,
    // Status polls still reporting STARTING after an accepted start
    booting: Option<u32>,
    start_outcomes: VecDeque<StartOutcome>,
}

/// Mock compute resource
#[derive(Debug)]
pub struct MockComputeResource {
    state: Mutex<PodState>,
    /// Status polls an accepted start needs before RUNNING
    boot_polls: u32,
    /// Whether pause requests fail
    fail_pause: bool,
    start_calls: AtomicUsize,
    pause_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockComputeResource {
    /// A stopped pod that starts on the first request
    pub fn stopped() -> Self {
        Self {
            state: Mutex::new(PodState {
                running: false,
                booting: None,
                start_outcomes: VecDeque::new(),
            }),
            boot_polls: 0,
            fail_pause: false,
            start_calls: AtomicUsize::new(0),
            pause_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// A pod that is already running
    pub fn running() -> Self {
        let pod = Self::stopped();
        pod.state.lock().running = true;
        pod
    }

    /// Script the outcomes of the next start requests; once exhausted,
    /// requests are accepted
    pub fn with_start_outcomes(self, outcomes: impl IntoIterator<Item = StartOutcome>) -> Self {
        self.state.lock().start_outcomes = outcomes.into_iter().collect();
        self
    }

    /// A pod whose start requests never succeed
    pub fn without_capacity(attempts: usize) -> Self {
        Self::stopped().with_start_outcomes(std::iter::repeat(StartOutcome::NoCapacity).take(attempts))
    }

    /// Report STARTING for `polls` status queries after each accepted start
    pub fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    /// Make pause requests fail
    pub fn with_failing_pause(mut self) -> Self {
        self.fail_pause = true;
        self
    }

    /// Whether the pod is currently up
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of start requests received
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of pause requests received
    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    /// Number of status queries received
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeResource for MockComputeResource {
    async fn status(&self) -> Result<ResourceStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(remaining) = state.booting {
            if remaining == 0 {
                state.booting = None;
                state.running = true;
            } else {
                state.booting = Some(remaining - 1);
                return Ok(ResourceStatus::Other("STARTING".to_string()));
            }
        }
        if state.running {
            Ok(ResourceStatus::Running)
        } else {
            Ok(ResourceStatus::Other("EXITED".to_string()))
        }
    }

    async fn request_start(&self) -> Result<(), ProviderError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        match state.start_outcomes.pop_front().unwrap_or(StartOutcome::Accept) {
            StartOutcome::Accept => {
                if !state.running {
                    state.booting = Some(self.boot_polls);
                }
                Ok(())
            }
            StartOutcome::NoCapacity => Err(ProviderError::CapacityExhausted(
                "There are not enough free GPUs on the host machine to start this pod.".to_string(),
            )),
            StartOutcome::Fail => Err(ProviderError::ApiError {
                status_code: 500,
                message: "internal error".to_string(),
            }),
        }
    }

    async fn request_pause(&self) -> Result<(), ProviderError> {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pause {
            return Err(ProviderError::ConnectionError("pause failed".to_string()));
        }
        let mut state = self.state.lock();
        state.running = false;
        state.booting = None;
        Ok(())
    }
}

/// Scripted answer to one status poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedStatus {
    /// The worker answers with this status
    Reply(JobStatus),
    /// The status request itself fails
    Unreachable,
}

/// Mock transcription worker
#[derive(Debug)]
pub struct MockWorker {
    transcript: String,
    statuses: Mutex<VecDeque<ScriptedStatus>>,
    submit_error: Option<String>,
    fetch_error: Option<String>,
    submitted: Mutex<Vec<JobRequest>>,
    status_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockWorker {
    /// A worker that finishes every job immediately with `transcript`
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            statuses: Mutex::new(VecDeque::new()),
            submit_error: None,
            fetch_error: None,
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Script the next status poll answers; once exhausted, jobs are done
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = ScriptedStatus>) -> Self {
        *self.statuses.lock() = statuses.into_iter().collect();
        self
    }

    /// Report the job as running forever
    pub fn never_finishing(self, polls: usize) -> Self {
        self.with_statuses(std::iter::repeat(ScriptedStatus::Reply(JobStatus::Running)).take(polls))
    }

    /// Reject every submission
    pub fn rejecting(mut self, message: impl Into<String>) -> Self {
        self.submit_error = Some(message.into());
        self
    }

    /// Fail every transcript download
    pub fn failing_fetch(mut self, message: impl Into<String>) -> Self {
        self.fetch_error = Some(message.into());
        self
    }

    /// Jobs submitted so far
    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().clone()
    }

    /// Number of status polls received
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of transcript downloads received
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionWorker for MockWorker {
    async fn submit(&self, job: &JobRequest) -> Result<String, ProviderError> {
        if let Some(message) = &self.submit_error {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: message.clone(),
            });
        }
        let mut submitted = self.submitted.lock();
        submitted.push(job.clone());
        Ok(format!("job-{}", submitted.len()))
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().pop_front() {
            Some(ScriptedStatus::Reply(status)) => Ok(status),
            Some(ScriptedStatus::Unreachable) => {
                Err(ProviderError::ConnectionError("worker unreachable".to_string()))
            }
            None => Ok(JobStatus::Done),
        }
    }

    async fn fetch_result(&self, _job_id: &str) -> Result<Bytes, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fetch_error {
            return Err(ProviderError::ApiError {
                status_code: 400,
                message: message.clone(),
            });
        }
        Ok(Bytes::from(self.transcript.clone()))
    }
}

/// Mock language detector
#[derive(Debug)]
pub struct MockLanguageDetector {
    answer: Result<String, String>,
    calls: AtomicUsize,
}

impl MockLanguageDetector {
    /// A detector that always answers `code`
    pub fn detecting(code: impl Into<String>) -> Self {
        Self {
            answer: Ok(code.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A detector whose requests always fail
    pub fn failing() -> Self {
        Self {
            answer: Err("detector unavailable".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of detection requests received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageDetector for MockLanguageDetector {
    async fn detect_language(&self, _audio_path: &Path) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .map_err(ProviderError::ConnectionError)
    }
}
