/*!
 * Messaging transport.
 *
 * The conversation layer only sees the [`Transport`] trait:
 * - `telegram`: Telegram Bot API over long polling
 * - `mock`: scripted in-process transport used by tests
 *
 * Replies a session is waiting for (language confirmation) are handed to
 * that session through a [`ReplyHub`] and never reach the router.
 */

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::errors::TransportError;
use crate::file_utils::AUDIO_EXTENSION;
use crate::session::models::is_add_command;

/// Chat user identifier
pub type UserId = i64;

/// Downloadable attachment of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Transport-specific handle used to download the file
    pub file_id: String,
    /// Original file name, if the client sent one
    pub file_name: Option<String>,
    /// MIME type, if known
    pub mime_type: Option<String>,
}

impl MediaRef {
    /// File extension to store the download under.
    ///
    /// Taken from the client's file name, then the MIME type. Falls back
    /// to [`AUDIO_EXTENSION`] when neither names a format.
    pub fn extension(&self) -> &str {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
        if let Some(ext) = from_name {
            return ext;
        }

        match self.mime_type.as_deref().map(|m| m.split(';').next().unwrap_or(m).trim()) {
            Some("audio/ogg" | "audio/opus") => "ogg",
            Some("audio/mpeg" | "audio/mp3") => "mp3",
            Some("audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac") => "m4a",
            Some("audio/wav" | "audio/x-wav" | "audio/wave") => "wav",
            Some("audio/flac" | "audio/x-flac") => "flac",
            Some("audio/webm" | "video/webm") => "webm",
            Some("video/mp4") => "mp4",
            _ => AUDIO_EXTENSION,
        }
    }
}

/// One inbound chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message identifier, replies are threaded to it
    pub message_id: i64,
    /// Sender
    pub user_id: UserId,
    /// Conversation to answer in
    pub chat_id: i64,
    /// Text or caption
    pub text: Option<String>,
    /// Attached audio, if any
    pub media: Option<MediaRef>,
}

impl InboundMessage {
    /// Trimmed text, empty when the message has none
    pub fn trimmed_text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }

    /// Whether the message carries an attachment
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

/// Chat platform operations used by the conversation layer
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Next message not claimed by a waiting session, `None` once the
    /// transport is closed
    async fn next_message(&self) -> Result<Option<InboundMessage>, TransportError>;

    /// Reply with text
    async fn send_text(&self, to: &InboundMessage, text: &str) -> Result<(), TransportError>;

    /// Reply with a file attachment
    async fn send_file(
        &self,
        to: &InboundMessage,
        path: &Path,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Download the message's attachment to `dest`
    async fn download_media(
        &self,
        message: &InboundMessage,
        dest: &Path,
    ) -> Result<PathBuf, TransportError>;

    /// Wait up to `timeout` for the next text message from `user`.
    ///
    /// Fails with `TransportError::TimedOut` when nothing arrives.
    async fn await_reply(&self, user: UserId, timeout: Duration) -> Result<String, TransportError>;
}

/// Hands text messages to sessions waiting for a reply from the same user
#[derive(Debug, Default)]
pub struct ReplyHub {
    waiters: Mutex<HashMap<UserId, VecDeque<oneshot::Sender<String>>>>,
}

impl ReplyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an inbound message to a waiting session.
    ///
    /// Returns the message back when nobody claimed it. Only text-only
    /// messages can be claimed, and an `add` command always goes back to
    /// the router so it starts a new session.
    pub fn offer(&self, message: InboundMessage) -> Option<InboundMessage> {
        if message.has_media() {
            return Some(message);
        }
        let Some(text) = message.text.clone() else {
            return Some(message);
        };
        if is_add_command(&text) {
            return Some(message);
        }

        let mut waiters = self.waiters.lock();
        let Some(queue) = waiters.get_mut(&message.user_id) else {
            return Some(message);
        };
        while let Some(waiter) = queue.pop_front() {
            if waiter.send(text.clone()).is_ok() {
                debug!("Reply from user {} handed to waiting session", message.user_id);
                if queue.is_empty() {
                    waiters.remove(&message.user_id);
                }
                return None;
            }
        }
        waiters.remove(&message.user_id);
        Some(message)
    }

    /// Wait up to `timeout` for the next text message from `user`
    pub async fn wait(&self, user: UserId, timeout: Duration) -> Result<String, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(user).or_default().push_back(tx);

        let received = tokio::time::timeout(timeout, rx).await;
        match received {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.prune(user);
                Err(TransportError::TimedOut(timeout))
            }
        }
    }

    /// Number of sessions waiting on `user`
    pub fn waiting(&self, user: UserId) -> usize {
        self.waiters
            .lock()
            .get(&user)
            .map(|queue| queue.iter().filter(|w| !w.is_closed()).count())
            .unwrap_or(0)
    }

    fn prune(&self, user: UserId) {
        let mut waiters = self.waiters.lock();
        if let Some(queue) = waiters.get_mut(&user) {
            queue.retain(|w| !w.is_closed());
            if queue.is_empty() {
                waiters.remove(&user);
            }
        }
    }
}

pub mod mock;
pub mod telegram;
