use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::SessionConfig;
use crate::dispatcher::JobDispatcher;
use crate::errors::{SessionError, TransportError};
use crate::file_utils::{FileManager, AUDIO_EXTENSION};
use crate::language_utils::{describe_language, UNKNOWN_LANGUAGE};
use crate::providers::LanguageDetector;
use crate::session::delivery::{chunk_text, load_or_write_transcript};
use crate::session::models::{AddCommand, Session, Step};
use crate::transport::{InboundMessage, Transport};

pub const USAGE_HINT: &str = "add <min speakers> <max speakers (optional)> <language code (optional)>";
const USAGE_EXAMPLES: &str = "e.g. 'add 2 3 en', 'add 2 en', or 'add 2'.";
pub const TRANSCRIPT_CAPTION: &str = "📝 Transcript file";
pub const COMPLETION_NOTICE: &str = "✅ Transcript sent as text and file. Ready for a new task! Start by entering number of speakers and language (e.g. 'add 2 en').";

/// Drives one session through the conversation
pub struct SessionStateMachine {
    transport: Arc<dyn Transport>,
    detector: Arc<dyn LanguageDetector>,
    dispatcher: JobDispatcher,
    storage_dir: PathBuf,
    settings: SessionConfig,
}

impl fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("storage_dir", &self.storage_dir)
            .field("settings", &self.settings)
            .finish()
    }
}

impl SessionStateMachine {
    pub fn new(
        transport: Arc<dyn Transport>,
        detector: Arc<dyn LanguageDetector>,
        dispatcher: JobDispatcher,
        storage_dir: impl Into<PathBuf>,
        settings: SessionConfig,
    ) -> Self {
        Self {
            transport,
            detector,
            dispatcher,
            storage_dir: storage_dir.into(),
            settings,
        }
    }

    /// Feed one inbound message to `session`.
    ///
    /// Returns the session when it needs more input, `None` when it is
    /// finished or was abandoned.
    pub async fn advance(&self, mut session: Session, message: &InboundMessage) -> Result<Option<Session>> {
        debug!("Session {} at {:?} received message {}", session.key, session.step, message.message_id);

        match session.step {
            Step::Idle => self.on_idle(session, message).await,
            Step::AwaitFile if !message.has_media() => {
                self.reply(message, "Please upload your audio file.").await?;
                Ok(Some(session))
            }
            Step::AwaitFile => {
                if !self.receive_audio(&mut session, message).await? {
                    return Ok(None);
                }
                if session.language.is_none() {
                    self.detect_language(&mut session, message).await?;
                    self.confirm_language(&mut session, message).await?;
                }
                let lines = self.dispatch(&mut session, message).await?;
                self.deliver(&mut session, message, &lines).await?;
                Ok(None)
            }
            // Later steps run to completion inside the task that received
            // the upload and never wait in the session map
            Step::ConfirmLanguage | Step::Dispatching | Step::Delivering | Step::Terminal => {
                warn!("Session {} got a message in step {:?}, ignoring", session.key, session.step);
                Ok(None)
            }
        }
    }

    async fn on_idle(&self, mut session: Session, message: &InboundMessage) -> Result<Option<Session>> {
        if message.has_media() {
            self.reply(message, &format!("Please start with: {}, {}", USAGE_HINT, USAGE_EXAMPLES))
                .await?;
            return Ok(None);
        }

        match AddCommand::parse(message.trimmed_text()) {
            Ok(Some(command)) => {
                let reply = match &command.language {
                    Some(language) => format!(
                        "Now upload your audio file.\nSpeakers: {}-{}\nLanguage: {}",
                        command.min_speakers, command.max_speakers, language
                    ),
                    None => format!(
                        "Now upload your audio file.\nSpeakers: {}-{}\nLanguage will be auto-detected.",
                        command.min_speakers, command.max_speakers
                    ),
                };
                info!(
                    "Session {} set min_speakers={}, max_speakers={}, language={}",
                    session.key,
                    command.min_speakers,
                    command.max_speakers,
                    command.language.as_deref().unwrap_or("auto")
                );
                session.configure(command);
                self.reply(message, &reply).await?;
                Ok(Some(session))
            }
            Ok(None) => {
                self.reply(message, &format!("Please start with: {}, {}", USAGE_HINT, USAGE_EXAMPLES))
                    .await?;
                Ok(Some(session))
            }
            Err(e) => {
                debug!("Session {}: {}", session.key, e);
                self.reply(message, &format!("Please use: {}, {}", USAGE_HINT, USAGE_EXAMPLES))
                    .await?;
                Ok(Some(session))
            }
        }
    }

    /// Download the upload; `false` when the session has to be abandoned
    async fn receive_audio(&self, session: &mut Session, message: &InboundMessage) -> Result<bool> {
        self.reply(message, "📥 Downloading audio file, please wait…").await?;

        FileManager::ensure_dir(&self.storage_dir)?;
        let extension = message
            .media
            .as_ref()
            .map(|media| media.extension())
            .unwrap_or(AUDIO_EXTENSION);
        let dest = FileManager::audio_path(
            &self.storage_dir,
            session.key.user_id,
            &session.key.session_id,
            extension,
        );
        let downloaded = self
            .transport
            .download_media(message, &dest)
            .await
            .map_err(SessionError::Download);

        match downloaded {
            Ok(path) if FileManager::file_exists(&path) => {
                info!(
                    "Audio file for session {} saved at {:?}, size={} bytes",
                    session.key,
                    path,
                    FileManager::file_size(&path)
                );
                session.audio_path = Some(path);
                Ok(true)
            }
            outcome => {
                if let Err(e) = outcome {
                    error!("Session {}: {}", session.key, e);
                }
                error!("FATAL: Audio file not found at {:?} (session {})", dest, session.key);
                self.reply(message, &format!("❌ FATAL: Audio file not found at {}", dest.display()))
                    .await?;
                session.step = Step::Terminal;
                Ok(false)
            }
        }
    }

    async fn detect_language(&self, session: &mut Session, message: &InboundMessage) -> Result<()> {
        self.reply(message, "🔎 Detecting language, please wait…").await?;

        let audio_path = session.audio_path.clone().context("audio path missing before detection")?;
        let detected = match self.detector.detect_language(&audio_path).await {
            Ok(code) => code,
            Err(e) => {
                warn!("Language detection failed for session {}: {}", session.key, e);
                UNKNOWN_LANGUAGE.to_string()
            }
        };
        info!("Detected language for session {}: {}", session.key, detected);

        self.reply(
            message,
            &format!(
                "🌐 Detected language: {}\nIf this is correct, reply 'yes'. Otherwise, type the correct language code (e.g. 'en', 'ru').",
                describe_language(&detected)
            ),
        )
        .await?;
        session.language = Some(detected);
        session.step = Step::ConfirmLanguage;
        Ok(())
    }

    async fn confirm_language(&self, session: &mut Session, message: &InboundMessage) -> Result<()> {
        let timeout = self.settings.confirm_timeout();
        let answer = match self.transport.await_reply(session.key.user_id, timeout).await {
            Ok(text) => text.trim().to_lowercase(),
            Err(e) => {
                if !matches!(e, TransportError::TimedOut(_)) {
                    warn!("Waiting for a language reply failed for session {}: {}", session.key, e);
                }
                self.reply(
                    message,
                    &format!(
                        "⏳ No language reply in {}, continuing with detected language.",
                        describe_wait(timeout)
                    ),
                )
                .await?;
                "yes".to_string()
            }
        };

        if answer != "yes" && !answer.is_empty() {
            session.language = Some(answer);
        }
        let language = session.language.clone().unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());
        info!("Session {} confirmed/overrode language: {}", session.key, language);

        self.reply(
            message,
            &format!(
                "👍 Got it!\nSpeakers: {}-{}\nLanguage: {}\nStarting transcription now…",
                session.min_speakers, session.max_speakers, language
            ),
        )
        .await?;
        Ok(())
    }

    async fn dispatch(&self, session: &mut Session, message: &InboundMessage) -> Result<Vec<String>> {
        session.step = Step::Dispatching;
        self.reply(message, "⏳ Running WhisperX, please wait…").await?;

        let audio_path = session.audio_path.clone().context("audio path missing before dispatch")?;
        let language = session.language.clone().unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());
        let outcome = self
            .dispatcher
            .dispatch(&audio_path, session.min_speakers, session.max_speakers, &language)
            .await;

        match outcome {
            Ok(transcript) => Ok(transcript.lines),
            Err(e) => {
                warn!("Job for session {} failed: {}", session.key, e);
                self.reply(message, &format!("❌ {}", e)).await?;
                Ok(vec![format!("Remote error: {}", e)])
            }
        }
    }

    async fn deliver(&self, session: &mut Session, message: &InboundMessage, lines: &[String]) -> Result<()> {
        session.step = Step::Delivering;
        let audio_path = session.audio_path.clone().context("audio path missing before delivery")?;
        let transcript_path = FileManager::transcript_path_for(&audio_path);
        let transcript = load_or_write_transcript(&transcript_path, lines)
            .await
            .with_context(|| format!("Failed to prepare transcript at {:?}", transcript_path))?;

        let chunks = chunk_text(&transcript, self.settings.chunk_chars);
        for (index, chunk) in chunks.iter().enumerate() {
            self.reply(message, chunk).await?;
            debug!(
                "Transcript chunk {} sent for session {}, length: {}",
                index + 1,
                session.key,
                chunk.chars().count()
            );
        }

        self.transport
            .send_file(message, &transcript_path, TRANSCRIPT_CAPTION)
            .await
            .context("Failed to send transcript file")?;
        self.reply(message, COMPLETION_NOTICE).await?;

        session.step = Step::Terminal;
        info!("All done for session {}", session.key);
        Ok(())
    }

    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<()> {
        self.transport
            .send_text(message, text)
            .await
            .with_context(|| format!("Failed to reply to user {}", message.user_id))
    }
}

fn describe_wait(timeout: Duration) -> String {
    match timeout.as_secs() {
        60 => "1 minute".to_string(),
        secs if secs % 60 == 0 => format!("{} minutes", secs / 60),
        secs => format!("{} seconds", secs),
    }
}
