//! Delivery of rendered artifacts.
//!
//! The core crate renders; concrete transports (SMTP, JSON endpoints, Canvas)
//! live in `ontask-events` and implement [`ArtifactTransport`].

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::action::ActionType;
use crate::survey::SurveyForm;
use crate::value::Cell;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Row {0} has no recipient")]
    MissingRecipient(usize),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("No transport for {0} actions")]
    Unsupported(&'static str),
}

/// One rendered output of an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Artifact {
    Html(String),
    /// HTML escaped once more for the Canvas inbox API.
    CanvasHtml(String),
    Json(serde_json::Value),
    /// Rendered text that did not parse as JSON.
    IncorrectJson(String),
    Form(SurveyForm),
}

impl Artifact {
    /// Whether a transport should ever see this artifact.
    pub fn is_deliverable(&self) -> bool {
        !matches!(self, Artifact::IncorrectJson(_) | Artifact::Form(_))
    }
}

/// Everything a transport needs to send one artifact.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub action: &'a str,
    pub action_type: ActionType,
    pub index: usize,
    pub row_key: &'a Cell,
    pub recipient: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub target_url: Option<&'a str>,
    pub artifact: &'a Artifact,
}

#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), TransportError>;
}

/// A delivered artifact kept in memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredArtifact {
    pub action: String,
    pub index: usize,
    pub recipient: Option<String>,
    pub artifact: Artifact,
}

/// Transport that keeps every artifact, used for previews, page-style
/// actions without recipients, and tests.
#[derive(Debug, Default)]
pub struct CollectingTransport {
    pages: Mutex<Vec<StoredArtifact>>,
}

impl CollectingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<StoredArtifact> {
        match self.pages.lock() {
            Ok(mut pages) => std::mem::take(&mut *pages),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl ArtifactTransport for CollectingTransport {
    fn name(&self) -> &'static str {
        "collect"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), TransportError> {
        let stored = StoredArtifact {
            action: delivery.action.to_string(),
            index: delivery.index,
            recipient: delivery.recipient.map(str::to_string),
            artifact: delivery.artifact.clone(),
        };
        self.pages
            .lock()
            .map_err(|_| TransportError::Unavailable("page store poisoned".into()))?
            .push(stored);
        Ok(())
    }
}
