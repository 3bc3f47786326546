//! JSON artifact delivery with exponential-backoff retry.
//!
//! [`JsonPostTransport`] POSTs each JSON artifact to the action's target URL
//! with `Authorization: Bearer <token>`. Failed attempts are retried after
//! each delay in [`RETRY_DELAYS`](super::RETRY_DELAYS).

use std::time::Duration;

use async_trait::async_trait;
use ontask_core::transport::{Artifact, ArtifactTransport, Delivery, TransportError};

use super::{REQUEST_TIMEOUT, RETRY_DELAYS};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JsonPostError {
    /// Network, DNS or timeout failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

impl From<JsonPostError> for TransportError {
    fn from(e: JsonPostError) -> Self {
        let message = e.to_string();
        match e {
            JsonPostError::HttpStatus(status) if (400..500).contains(&status) => {
                TransportError::Rejected(message)
            }
            _ => TransportError::Unavailable(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct JsonPostConfig {
    /// Bearer token sent with every request (`JSON_POST_TOKEN`).
    pub token: Option<String>,
}

impl JsonPostConfig {
    pub fn from_env() -> Self {
        Self {
            token: std::env::var("JSON_POST_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// JsonPostTransport
// ---------------------------------------------------------------------------

pub struct JsonPostTransport {
    client: reqwest::Client,
    config: JsonPostConfig,
    retry_delays: Vec<Duration>,
}

impl JsonPostTransport {
    pub fn new(config: JsonPostConfig) -> Result<Self, JsonPostError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            config,
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Replace the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// POST with retry; rejections (4xx) are not retried.
    pub async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), JsonPostError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.try_send(url, payload).await {
                Ok(()) => return Ok(()),
                Err(JsonPostError::HttpStatus(status)) if (400..500).contains(&status) => {
                    return Err(JsonPostError::HttpStatus(status))
                }
                Err(e) => e,
            };
            match self.retry_delays.get(attempt - 1) {
                Some(delay) => {
                    tracing::warn!(attempt, url, error = %err, "JSON delivery attempt failed, retrying");
                    tokio::time::sleep(*delay).await;
                }
                None => {
                    tracing::error!(url, error = %err, "JSON delivery failed after all retries");
                    return Err(err);
                }
            }
        }
    }

    async fn try_send(&self, url: &str, payload: &serde_json::Value) -> Result<(), JsonPostError> {
        let mut request = self.client.post(url).json(payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(JsonPostError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactTransport for JsonPostTransport {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), TransportError> {
        let payload = match delivery.artifact {
            Artifact::Json(payload) => payload,
            _ => return Err(TransportError::Unsupported("non-JSON")),
        };
        let url = delivery
            .target_url
            .ok_or_else(|| TransportError::Rejected(format!("Action '{}' has no target URL", delivery.action)))?;
        self.post(url, payload).await?;
        tracing::info!(action = delivery.action, row = delivery.index, url, "JSON artifact posted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use ontask_core::action::ActionType;
    use ontask_core::value::Value;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    struct Endpoint {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        status: u16,
    }

    async fn receive(State(endpoint): State<Endpoint>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> StatusCode {
        let n = endpoint.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(headers["authorization"], "Bearer secret");
        assert_eq!(body["score"], 65);
        if n < endpoint.fail_first {
            StatusCode::from_u16(endpoint.status).unwrap()
        } else {
            StatusCode::OK
        }
    }

    async fn serve(endpoint: Endpoint) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/hook", post(receive)).with_state(endpoint);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/hook")
    }

    fn transport() -> JsonPostTransport {
        JsonPostTransport::new(JsonPostConfig { token: Some("secret".into()) })
            .unwrap()
            .with_retry_delays(vec![Duration::from_millis(1); 3])
    }

    fn delivery<'a>(url: &'a str, artifact: &'a Artifact, key: &'a Option<Value>) -> Delivery<'a> {
        Delivery {
            action: "scores",
            action_type: ActionType::PersonalizedJson,
            index: 0,
            row_key: key,
            recipient: None,
            subject: None,
            target_url: Some(url),
            artifact,
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let endpoint = Endpoint { fail_first: 2, status: 503, ..Endpoint::default() };
        let calls = endpoint.calls.clone();
        let url = serve(endpoint).await;
        let artifact = Artifact::Json(json!({"score": 65}));
        let key = Some(Value::Integer(1));

        transport().deliver(&delivery(&url, &artifact, &key)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let endpoint = Endpoint { fail_first: 10, status: 422, ..Endpoint::default() };
        let calls = endpoint.calls.clone();
        let url = serve(endpoint).await;
        let artifact = Artifact::Json(json!({"score": 65}));
        let key = Some(Value::Integer(1));

        let err = transport().deliver(&delivery(&url, &artifact, &key)).await.unwrap_err();
        assert_eq!(err, TransportError::Rejected("Endpoint returned HTTP 422".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn html_is_unsupported() {
        let artifact = Artifact::Html("<p/>".into());
        let key = Some(Value::Integer(1));
        let err = transport()
            .deliver(&delivery("http://127.0.0.1:9/", &artifact, &key))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Unsupported("non-JSON"));
    }

    #[test]
    fn error_display_http_status() {
        assert_eq!(JsonPostError::HttpStatus(502).to_string(), "Endpoint returned HTTP 502");
    }
}
