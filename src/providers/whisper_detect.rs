use async_trait::async_trait;
use log::debug;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::app_config::LanguageDetectionConfig;
use crate::errors::ProviderError;
use crate::file_utils::AUDIO_EXTENSION;
use crate::language_utils::detected_language_code;
use crate::providers::{error_body, LanguageDetector};

/// Language detector backed by an OpenAI-compatible
/// `/audio/transcriptions` endpoint
pub struct WhisperLanguageDetector {
    /// HTTP client for API requests
    client: Client,
    /// API base URL
    endpoint: String,
    /// API key, may be empty for local servers
    api_key: String,
    /// Model name
    model: String,
}

/// The only field of the `verbose_json` response we need
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    /// Detected language, a name (`"french"`) or a code depending on server
    #[serde(default)]
    language: Option<String>,
}

impl fmt::Debug for WhisperLanguageDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhisperLanguageDetector")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl WhisperLanguageDetector {
    /// Create a detector from configuration
    pub fn from_config(config: &LanguageDetectionConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LanguageDetector for WhisperLanguageDetector {
    async fn detect_language(&self, audio_path: &Path) -> Result<String, ProviderError> {
        let audio = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("cannot read {:?}: {}", audio_path, e)))?;

        let part = multipart::Part::bytes(audio)
            .file_name(upload_file_name(audio_path))
            .mime_str("application/octet-stream")
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.endpoint))
            .multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body(response).await,
            });
        }

        let body = response.text().await?;
        let code = language_from_body(&body)?;
        debug!("Language detection for {:?}: {}", audio_path, code);
        Ok(code)
    }
}

/// Name the upload after the stored file so the server can pick a decoder
/// from its extension. Telegram voice notes are Ogg, so that is the guess
/// for downloads whose format was never named.
fn upload_file_name(audio_path: &Path) -> String {
    let known = audio_path
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| *ext != AUDIO_EXTENSION);
    match (known, audio_path.file_name().and_then(|n| n.to_str())) {
        (Some(_), Some(name)) => name.to_string(),
        _ => "sample.ogg".to_string(),
    }
}

fn language_from_body(body: &str) -> Result<String, ProviderError> {
    let parsed: VerboseTranscription =
        serde_json::from_str(body).map_err(|e| ProviderError::ParseError(e.to_string()))?;
    Ok(detected_language_code(parsed.language.as_deref().unwrap_or_default()))
}
