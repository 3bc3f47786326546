//! Transport selection by action type.

use async_trait::async_trait;
use ontask_core::action::ActionType;
use ontask_core::transport::{ArtifactTransport, Delivery, TransportError};

use super::canvas::{CanvasConfig, CanvasTransport};
use super::email::{EmailConfig, EmailTransport};
use super::json_post::{JsonPostConfig, JsonPostTransport};

/// Dispatches HTML actions to email, JSON actions to their endpoint and
/// Canvas actions to Canvas. Unconfigured channels fail per row.
#[derive(Default)]
pub struct RoutingTransport {
    pub email: Option<Box<dyn ArtifactTransport>>,
    pub json: Option<Box<dyn ArtifactTransport>>,
    pub canvas: Option<Box<dyn ArtifactTransport>>,
}

impl RoutingTransport {
    /// Build every channel whose configuration is present in the environment.
    pub fn from_env() -> Self {
        let email = EmailConfig::from_env().and_then(|config| match EmailTransport::new(config) {
            Ok(t) => Some(Box::new(t) as Box<dyn ArtifactTransport>),
            Err(e) => {
                tracing::error!(error = %e, "SMTP transport could not be built, email delivery disabled");
                None
            }
        });
        let json = match JsonPostTransport::new(JsonPostConfig::from_env()) {
            Ok(t) => Some(Box::new(t) as Box<dyn ArtifactTransport>),
            Err(e) => {
                tracing::error!(error = %e, "HTTP client could not be built, JSON delivery disabled");
                None
            }
        };
        let canvas = CanvasConfig::from_env().and_then(|config| match CanvasTransport::new(config) {
            Ok(t) => Some(Box::new(t) as Box<dyn ArtifactTransport>),
            Err(e) => {
                tracing::error!(error = %e, "Canvas transport could not be built");
                None
            }
        });
        tracing::info!(
            email = email.is_some(),
            json = json.is_some(),
            canvas = canvas.is_some(),
            "Artifact transports configured"
        );
        Self { email, json, canvas }
    }

    fn channel(&self, action_type: ActionType) -> Result<&dyn ArtifactTransport, TransportError> {
        let (slot, what) = match action_type {
            ActionType::PersonalizedText | ActionType::RubricText => (&self.email, "SMTP is not configured"),
            ActionType::PersonalizedJson | ActionType::JsonReport => (&self.json, "JSON delivery is not configured"),
            ActionType::PersonalizedCanvasEmail => (&self.canvas, "Canvas is not configured"),
            ActionType::Survey | ActionType::TodoList => {
                return Err(TransportError::Unsupported(action_type.as_str()))
            }
        };
        slot.as_deref()
            .ok_or_else(|| TransportError::Unavailable(what.to_string()))
    }
}

#[async_trait]
impl ArtifactTransport for RoutingTransport {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), TransportError> {
        self.channel(delivery.action_type)?.deliver(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontask_core::transport::{Artifact, CollectingTransport};
    use ontask_core::value::Value;

    fn delivery<'a>(action_type: ActionType, artifact: &'a Artifact, key: &'a Option<Value>) -> Delivery<'a> {
        Delivery {
            action: "a",
            action_type,
            index: 0,
            row_key: key,
            recipient: Some("ada@example.com"),
            subject: None,
            target_url: None,
            artifact,
        }
    }

    #[tokio::test]
    async fn routes_html_to_email_channel() {
        let router = RoutingTransport {
            email: Some(Box::new(CollectingTransport::new())),
            ..RoutingTransport::default()
        };
        let artifact = Artifact::Html("<p/>".into());
        let key = Some(Value::Integer(1));
        router
            .deliver(&delivery(ActionType::RubricText, &artifact, &key))
            .await
            .unwrap();
        assert_eq!(router.channel(ActionType::PersonalizedText).unwrap().name(), "collect");
    }

    #[tokio::test]
    async fn missing_channel_is_unavailable() {
        let router = RoutingTransport::default();
        let artifact = Artifact::Json(serde_json::json!({}));
        let key = Some(Value::Integer(1));
        let err = router
            .deliver(&delivery(ActionType::PersonalizedJson, &artifact, &key))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Unavailable("JSON delivery is not configured".into()));
    }

    #[test]
    fn forms_have_no_channel() {
        let router = RoutingTransport::default();
        assert!(matches!(
            router.channel(ActionType::Survey),
            Err(TransportError::Unsupported("survey"))
        ));
    }
}
