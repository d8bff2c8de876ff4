//! Telegram Bot API delivery sink.
//!
//! Uploads finished videos and group archives to a chat, and doubles as the
//! pipeline's status channel via `sendMessage`. Files are streamed from disk
//! into the multipart body (archives can be large), so the payload is never
//! buffered in memory.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::debug;

use super::{DeliveryError, DeliveryMeta, DeliverySink, MediaKind, StatusSink};

fn default_max_upload_bytes() -> u64 {
    // Bot API document/video cap
    50 * 1024 * 1024
}

/// Configuration for the Telegram sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Telegram Bot API client
pub struct TelegramSink {
    /// Bot token
    bot_token: String,
    /// Target chat ID
    chat_id: String,
    /// Upload size ceiling; larger payloads fail permanently
    max_upload_bytes: u64,
    /// HTTP client
    client: reqwest::Client,
}

/// Response envelope from the Telegram API
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Message result from sendMessage/sendVideo/sendDocument
#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

impl TelegramSink {
    /// Create a new sink with the default upload limit
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            max_upload_bytes: default_max_upload_bytes(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from config
    pub fn from_config(config: TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            chat_id: config.chat_id,
            max_upload_bytes: config.max_upload_bytes,
            client: reqwest::Client::new(),
        }
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    /// Send a text message
    pub async fn send_message(&self, text: &str) -> Result<i64> {
        let url = self.api_url("sendMessage");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let result: TelegramResponse<MessageResult> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }

        Ok(result.result.map(|r| r.message_id).unwrap_or(0))
    }

    /// Upload a file as a streamed multipart part
    async fn send_file(&self, path: &Path, meta: &DeliveryMeta) -> Result<(), DeliveryError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| DeliveryError::Permanent(format!("cannot stat payload: {}", e)))?
            .len();

        if size > self.max_upload_bytes {
            return Err(DeliveryError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let (method, field, mime) = match meta.kind {
            MediaKind::Video => ("sendVideo", "video", "video/mp4"),
            MediaKind::Archive => ("sendDocument", "document", "application/zip"),
        };

        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| DeliveryError::Permanent(format!("cannot open payload: {}", e)))?;

        let body = reqwest::Body::wrap_stream(FramedRead::new(file, BytesCodec::new()));
        let part = Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| DeliveryError::Permanent(format!("invalid mime type: {}", e)))?;

        let mut form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", meta.caption.clone())
            .part(field, part);

        if meta.kind == MediaKind::Video {
            form = form.text("supports_streaming", "true");
        }

        debug!(method, %size, path = %path.display(), "uploading to Telegram");

        let response = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(DeliveryError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let envelope: TelegramResponse<MessageResult> = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transient(format!("unreadable response: {}", e)))?;

        if envelope.ok {
            return Ok(());
        }

        let description = envelope.description.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(DeliveryError::Transient(format!(
                "{}: {}",
                status, description
            )))
        } else {
            Err(DeliveryError::Permanent(format!(
                "{}: {}",
                status, description
            )))
        }
    }
}

/// Network-level errors are worth retrying; everything else is not
fn classify_request_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        DeliveryError::Transient(e.to_string())
    } else {
        DeliveryError::Permanent(e.to_string())
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(&self, path: &Path, meta: &DeliveryMeta) -> Result<(), DeliveryError> {
        self.send_file(path, meta).await
    }
}

#[async_trait]
impl StatusSink for TelegramSink {
    async fn status(&self, text: &str) -> Result<()> {
        self.send_message(text).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let sink = TelegramSink::new("TOKEN".to_string(), "123".to_string());
        assert_eq!(
            sink.api_url("sendMessage"),
            "https://api.telegram.org/botTOKEN/sendMessage"
        );
    }

    #[tokio::test]
    async fn test_oversized_payload_fails_before_any_request() {
        let sink = TelegramSink::from_config(TelegramConfig {
            bot_token: "TOKEN".to_string(),
            chat_id: "123".to_string(),
            max_upload_bytes: 4,
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mp4");
        tokio::fs::write(&path, b"more than four bytes").await.unwrap();

        let meta = DeliveryMeta {
            caption: "big".to_string(),
            kind: MediaKind::Video,
        };
        let err = sink.deliver(&path, &meta).await.unwrap_err();

        assert!(matches!(
            err,
            DeliveryError::TooLarge { size: 20, limit: 4 }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_default_upload_limit() {
        let yaml = r#"
bot_token: TOKEN
chat_id: "123"
"#;
        let config: TelegramConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }
}
