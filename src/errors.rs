/*!
 * Error types for the whisperbot application.
 *
 * This module contains custom error types for the different layers of the
 * job orchestration engine, using the thiserror crate for ergonomic error
 * definitions.
 */

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to a remote HTTP service
/// (compute lifecycle API, transcription worker, language detector)
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The remote compute provider has no capacity to start the resource
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            Self::ConnectionError(error.to_string())
        } else if error.is_decode() {
            Self::ParseError(error.to_string())
        } else {
            Self::RequestFailed(error.to_string())
        }
    }
}

/// Errors raised by the messaging transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// No reply arrived within the wait window
    #[error("Timed out after {0:?} waiting for a reply")]
    TimedOut(Duration),

    /// The message carries no downloadable media
    #[error("Message has no media attachment")]
    NoMedia,

    /// The transport has been shut down
    #[error("Transport closed")]
    Closed,

    /// Error from the underlying chat API
    #[error("Chat API error: {0}")]
    Provider(#[from] ProviderError),

    /// Local file error while downloading or uploading media
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// The shared compute resource could not be brought to a running state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    /// Every start attempt was spent without the resource reaching RUNNING
    #[error("Pod did not start after {attempts} attempts (last status: {last_status})")]
    NotRunning {
        /// Number of start attempts made
        attempts: u32,
        /// Last status reported by the lifecycle API
        last_status: String,
    },

    /// Another caller's warm-up failed while this caller was waiting on it
    #[error("Pod warm-up failed in a concurrent job")]
    WarmupFailed,
}

/// Job-level failures surfaced by the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The compute resource could not be provisioned
    #[error("Pod did not start in time or not enough GPUs available: {0}")]
    ResourceUnavailable(#[from] ProvisionError),

    /// The worker rejected the submission
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// The worker reported the job as failed
    #[error("WhisperX error: {0}")]
    RemoteError(String),

    /// The job did not finish within the polling budget
    #[error("Job timed out after {attempts} status polls")]
    Timeout {
        /// Number of polls made
        attempts: u32,
    },

    /// Local persistence of the audio or transcript failed
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors local to a conversation session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Malformed `add` command
    #[error("Invalid add command: {0}")]
    Parse(String),

    /// Media could not be fetched from the transport
    #[error("Audio file download failed: {0}")]
    Download(#[from] TransportError),
}

/// Failure to write one of the small state files (counter, allow-list)
#[derive(Error, Debug)]
#[error("Failed to persist {path}: {source}")]
pub struct PersistenceError {
    /// File that could not be written
    pub path: String,
    /// Underlying I/O error
    #[source]
    pub source: std::io::Error,
}
