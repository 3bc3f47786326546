//! Canvas inbox delivery.
//!
//! Canvas email actions render HTML that is escaped once more; the result
//! is posted as a new conversation to the row's Canvas user id through the
//! Canvas REST API.

use async_trait::async_trait;
use ontask_core::transport::{Artifact, ArtifactTransport, Delivery, TransportError};
use serde_json::json;

use super::json_post::{JsonPostConfig, JsonPostError, JsonPostTransport};

const CONVERSATIONS_PATH: &str = "/api/v1/conversations";

#[derive(Debug, Clone)]
pub struct CanvasConfig {
    /// Base URL of the Canvas instance, e.g. `https://canvas.example.edu`.
    pub api_url: String,
    pub token: String,
}

impl CanvasConfig {
    /// `None` unless both `CANVAS_API_URL` and `CANVAS_TOKEN` are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            api_url: std::env::var("CANVAS_API_URL").ok()?,
            token: std::env::var("CANVAS_TOKEN").ok()?,
        })
    }

    pub fn conversations_url(&self) -> String {
        format!("{}{CONVERSATIONS_PATH}", self.api_url.trim_end_matches('/'))
    }
}

pub struct CanvasTransport {
    url: String,
    http: JsonPostTransport,
}

impl CanvasTransport {
    pub fn new(config: CanvasConfig) -> Result<Self, JsonPostError> {
        Ok(Self {
            url: config.conversations_url(),
            http: JsonPostTransport::new(JsonPostConfig { token: Some(config.token) })?,
        })
    }

    /// Request body for one conversation.
    pub fn conversation(delivery: &Delivery<'_>) -> Result<serde_json::Value, TransportError> {
        let recipient = delivery
            .recipient
            .ok_or(TransportError::MissingRecipient(delivery.index))?;
        let body = match delivery.artifact {
            Artifact::CanvasHtml(body) => body,
            _ => return Err(TransportError::Unsupported("non-Canvas")),
        };
        Ok(json!({
            "recipients": [recipient],
            "subject": delivery.subject.unwrap_or(delivery.action),
            "body": body,
            "force_new": true,
            "group_conversation": false,
        }))
    }
}

#[async_trait]
impl ArtifactTransport for CanvasTransport {
    fn name(&self) -> &'static str {
        "canvas"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), TransportError> {
        let payload = Self::conversation(delivery)?;
        self.http.post(&self.url, &payload).await?;
        tracing::info!(action = delivery.action, row = delivery.index, to = delivery.recipient, "Canvas message sent");
        Ok(())
    }
}
