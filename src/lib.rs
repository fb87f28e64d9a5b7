/*!
 * # whisperbot - audio transcription chat bot
 *
 * A Telegram bot that transcribes uploaded audio with WhisperX (speaker
 * diarization included) on a shared, pay-per-use GPU pod.
 *
 * ## Features
 *
 * - Password-gated access with a persistent allow-list
 * - Concurrent conversations, one session per `add` command
 * - Quick language detection with user confirmation
 * - Reference-counted pod lifecycle: started for the first job, paused
 *   after the last, with capacity backoff
 * - Transcript delivery as chat messages and as a file
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `app_controller`: Wires the components and runs the bot
 * - `router`: Password gate, session routing and supervised session tasks
 * - `session`: Per-session state machine and transcript delivery
 * - `dispatcher`: One transcription job from lease to transcript
 * - `lifecycle`: Start/pause arbitration of the shared pod
 * - `registry`: Durable count of active jobs
 * - `providers`: Clients for the remote services:
 *   - `providers::runpod`: RunPod pod lifecycle API
 *   - `providers::whisperx`: WhisperX job server
 *   - `providers::whisper_detect`: OpenAI-compatible language detection
 * - `transport`: Chat transport (`transport::telegram`)
 * - `auth`: Password gate and allow-list
 * - `retry`: Bounded polling policies
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod auth;
pub mod dispatcher;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod lifecycle;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod router;
pub mod session;
pub mod transport;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::Controller;
pub use dispatcher::{JobDispatcher, Transcript};
pub use errors::{DispatchError, PersistenceError, ProviderError, ProvisionError, SessionError, TransportError};
pub use lifecycle::{ComputeLease, ComputeLifecycleManager, Readiness};
pub use registry::ActiveJobRegistry;
pub use router::ConversationRouter;
pub use session::SessionStateMachine;
