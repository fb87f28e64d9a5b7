/*!
 * In-process transport for tests.
 *
 * Inbound messages are pushed by the test, outbound messages are recorded
 * in order. Replies to `await_reply` can be scripted up front or pushed
 * like any other message while a session is waiting.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::errors::{ProviderError, TransportError};
use crate::transport::{InboundMessage, MediaRef, ReplyHub, Transport, UserId};

/// A message sent by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text reply
    Text {
        /// Chat the reply went to
        chat_id: i64,
        /// Body
        text: String,
    },
    /// File attachment
    File {
        /// Chat the file went to
        chat_id: i64,
        /// Local path that was sent
        path: PathBuf,
        /// Caption
        caption: String,
        /// File content at send time
        content: String,
    },
}

impl Outbound {
    /// Chat the message went to
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Text { chat_id, .. } | Self::File { chat_id, .. } => *chat_id,
        }
    }

    /// Text body, `None` for files
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::File { .. } => None,
        }
    }
}

/// Scripted transport
#[derive(Debug)]
pub struct MockTransport {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    hub: ReplyHub,
    outbound: Mutex<Vec<Outbound>>,
    sent: Notify,
    media: Mutex<HashMap<String, Vec<u8>>>,
    replies: Mutex<VecDeque<Option<String>>>,
    next_message_id: AtomicI64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            hub: ReplyHub::new(),
            outbound: Mutex::new(Vec::new()),
            sent: Notify::new(),
            media: Mutex::new(HashMap::new()),
            replies: Mutex::new(VecDeque::new()),
            next_message_id: AtomicI64::new(1),
        }
    }

    /// Build a text message from `user`
    pub fn text_message(&self, user: UserId, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            user_id: user,
            chat_id: user,
            text: Some(text.to_string()),
            media: None,
        }
    }

    /// Build a media message from `user` and register its content
    pub fn media_message(&self, user: UserId, content: &[u8]) -> InboundMessage {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let file_id = format!("file-{}", message_id);
        self.register_media(&file_id, content);
        InboundMessage {
            message_id,
            user_id: user,
            chat_id: user,
            text: None,
            media: Some(MediaRef {
                file_id,
                file_name: Some("recording.ogg".to_string()),
                mime_type: Some("audio/ogg".to_string()),
            }),
        }
    }

    /// Make `file_id` downloadable with `content`
    pub fn register_media(&self, file_id: &str, content: &[u8]) {
        self.media.lock().insert(file_id.to_string(), content.to_vec());
    }

    /// Deliver an inbound message, to a waiting session first
    pub fn push(&self, message: InboundMessage) {
        if let Some(message) = self.hub.offer(message) {
            if let Some(tx) = self.inbound_tx.lock().as_ref() {
                let _ = tx.send(message);
            }
        }
    }

    /// Queue answers for upcoming `await_reply` calls; `None` times out
    pub fn script_replies(&self, replies: impl IntoIterator<Item = Option<String>>) {
        self.replies.lock().extend(replies);
    }

    /// Stop delivering messages; `next_message` drains then ends
    pub fn close(&self) {
        self.inbound_tx.lock().take();
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<Outbound> {
        self.outbound.lock().clone()
    }

    /// Text bodies sent to `chat_id`, in order
    pub fn texts(&self, chat_id: i64) -> Vec<String> {
        self.outbound
            .lock()
            .iter()
            .filter(|o| o.chat_id() == chat_id)
            .filter_map(|o| o.text().map(str::to_string))
            .collect()
    }

    /// Sessions currently waiting for a reply from `user`
    pub fn waiting_replies(&self, user: UserId) -> usize {
        self.hub.waiting(user)
    }

    /// Wait until some sent text satisfies `predicate`
    pub async fn wait_for_text<F>(&self, predicate: F, timeout: Duration) -> Result<String, TransportError>
    where
        F: Fn(&str) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.sent.notified();
                let found = self
                    .outbound
                    .lock()
                    .iter()
                    .filter_map(Outbound::text)
                    .find(|t| predicate(t))
                    .map(str::to_string);
                if let Some(text) = found {
                    return text;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TransportError::TimedOut(timeout))
    }

    fn record(&self, message: Outbound) {
        self.outbound.lock().push(message);
        self.sent.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn next_message(&self) -> Result<Option<InboundMessage>, TransportError> {
        Ok(self.inbound_rx.lock().await.recv().await)
    }

    async fn send_text(&self, to: &InboundMessage, text: &str) -> Result<(), TransportError> {
        self.record(Outbound::Text {
            chat_id: to.chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_file(
        &self,
        to: &InboundMessage,
        path: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        let content = tokio::fs::read_to_string(path).await?;
        self.record(Outbound::File {
            chat_id: to.chat_id,
            path: path.to_path_buf(),
            caption: caption.to_string(),
            content,
        });
        Ok(())
    }

    async fn download_media(
        &self,
        message: &InboundMessage,
        dest: &Path,
    ) -> Result<PathBuf, TransportError> {
        let media = message.media.as_ref().ok_or(TransportError::NoMedia)?;
        let content = self.media.lock().get(&media.file_id).cloned();
        let content = content.ok_or_else(|| ProviderError::ApiError {
            status_code: 404,
            message: format!("unknown file {}", media.file_id),
        })?;
        tokio::fs::write(dest, content).await?;
        Ok(dest.to_path_buf())
    }

    async fn await_reply(&self, user: UserId, timeout: Duration) -> Result<String, TransportError> {
        let scripted = self.replies.lock().pop_front();
        match scripted {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(TransportError::TimedOut(timeout)),
            None => self.hub.wait(user, timeout).await,
        }
    }
}
