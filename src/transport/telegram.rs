use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::app_config::TelegramConfig;
use crate::errors::{ProviderError, TransportError};
use crate::transport::{InboundMessage, MediaRef, ReplyHub, Transport, UserId};

/// Telegram Bot API client using long polling
pub struct Telegram {
    /// HTTP client for API requests
    client: Client,
    /// Bot token
    token: String,
    /// Bot API base URL
    endpoint: String,
    /// Long-poll wait in seconds
    poll_timeout_secs: u64,
    /// Next update offset and messages fetched but not yet handed out
    updates: Mutex<UpdateCursor>,
    /// Sessions waiting for replies
    hub: ReplyHub,
}

#[derive(Debug, Default)]
struct UpdateCursor {
    offset: i64,
    pending: VecDeque<InboundMessage>,
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    #[serde(default)]
    from: Option<User>,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    audio: Option<Attachment>,
    #[serde(default)]
    voice: Option<Attachment>,
    #[serde(default)]
    video: Option<Attachment>,
    #[serde(default)]
    video_note: Option<Attachment>,
    #[serde(default)]
    document: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    reply_to_message_id: i64,
}

impl Message {
    fn into_inbound(self) -> Option<InboundMessage> {
        let user_id = self.from.map(|u| u.id)?;
        let media = self
            .audio
            .or(self.voice)
            .or(self.video)
            .or(self.video_note)
            .or(self.document)
            .map(|a| MediaRef {
                file_id: a.file_id,
                file_name: a.file_name,
                mime_type: a.mime_type,
            });
        Some(InboundMessage {
            message_id: self.message_id,
            user_id,
            chat_id: self.chat.id,
            text: self.text.or(self.caption),
            media,
        })
    }
}

impl fmt::Debug for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telegram")
            .field("endpoint", &self.endpoint)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl Telegram {
    /// Create a client from configuration
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            client: Client::new(),
            token: config.bot_token.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            poll_timeout_secs: config.poll_timeout_secs,
            updates: Mutex::new(UpdateCursor::default()),
            hub: ReplyHub::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.endpoint, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.endpoint, self.token, file_path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        let status = response.status();
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        match envelope.result {
            Some(result) if envelope.ok => Ok(result),
            _ => {
                let status_code = envelope.error_code.unwrap_or(status.as_u16());
                let message = envelope.description.unwrap_or_else(|| "no description".to_string());
                if status_code == 401 {
                    Err(ProviderError::AuthenticationError(message))
                } else {
                    Err(ProviderError::ApiError { status_code, message })
                }
            }
        }
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>, ProviderError> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout_secs.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(Duration::from_secs(self.poll_timeout_secs + 10))
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl Transport for Telegram {
    async fn next_message(&self) -> Result<Option<InboundMessage>, TransportError> {
        let mut cursor = self.updates.lock().await;
        loop {
            while let Some(message) = cursor.pending.pop_front() {
                if let Some(message) = self.hub.offer(message) {
                    return Ok(Some(message));
                }
            }

            let updates = self.fetch_updates(cursor.offset).await?;
            for update in updates {
                cursor.offset = cursor.offset.max(update.update_id + 1);
                if let Some(message) = update.message.and_then(Message::into_inbound) {
                    cursor.pending.push_back(message);
                }
            }
        }
    }

    async fn send_text(&self, to: &InboundMessage, text: &str) -> Result<(), TransportError> {
        let body = SendMessage {
            chat_id: to.chat_id,
            text,
            reply_to_message_id: to.message_id,
        };
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn send_file(
        &self,
        to: &InboundMessage,
        path: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "transcript.txt".to_string());
        let part = multipart::Part::bytes(content)
            .file_name(file_name)
            .mime_str("text/plain")
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let form = multipart::Form::new()
            .text("chat_id", to.chat_id.to_string())
            .text("reply_to_message_id", to.message_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::from)?;
        let _: serde_json::Value = Self::decode(response).await?;
        debug!("Sent file {:?} to chat {}", path, to.chat_id);
        Ok(())
    }

    async fn download_media(
        &self,
        message: &InboundMessage,
        dest: &Path,
    ) -> Result<PathBuf, TransportError> {
        let media = message.media.as_ref().ok_or(TransportError::NoMedia)?;

        let response = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", media.file_id.as_str())])
            .send()
            .await
            .map_err(ProviderError::from)?;
        let file: File = Self::decode(response).await?;
        let file_path = file.file_path.ok_or_else(|| {
            ProviderError::ParseError(format!("getFile returned no path for {}", media.file_id))
        })?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(ProviderError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: format!("file download failed for {}", file_path),
            }
            .into());
        }
        let content = response.bytes().await.map_err(ProviderError::from)?;
        tokio::fs::write(dest, &content).await?;
        info!("Downloaded {} bytes to {:?}", content.len(), dest);
        Ok(dest.to_path_buf())
    }

    async fn await_reply(&self, user: UserId, timeout: Duration) -> Result<String, TransportError> {
        let reply = self.hub.wait(user, timeout).await;
        if let Err(TransportError::TimedOut(_)) = &reply {
            warn!("No reply from user {} within {:?}", user, timeout);
        }
        reply
    }
}
