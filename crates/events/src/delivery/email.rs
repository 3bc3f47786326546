//! HTML email delivery via SMTP.
//!
//! [`EmailTransport`] wraps the `lettre` async SMTP transport. Configuration
//! is loaded from environment variables; if `SMTP_HOST` is not set,
//! [`EmailConfig::from_env`] returns `None` and no mailer is constructed.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use ontask_core::transport::{Artifact, ArtifactTransport, Delivery, TransportError};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

impl From<EmailError> for TransportError {
    fn from(e: EmailError) -> Self {
        match e {
            EmailError::Transport(e) => TransportError::Unavailable(e.to_string()),
            other => TransportError::Rejected(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@ontask.local";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    /// Defaults to 587.
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable        | Required | Default                 |
    /// |-----------------|----------|-------------------------|
    /// | `SMTP_HOST`     | yes      |                         |
    /// | `SMTP_PORT`     | no       | `587`                   |
    /// | `SMTP_FROM`     | no       | `noreply@ontask.local`  |
    /// | `SMTP_USER`     | no       |                         |
    /// | `SMTP_PASSWORD` | no       |                         |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailTransport
// ---------------------------------------------------------------------------

/// Sends HTML artifacts to the row's recipient address.
pub struct EmailTransport {
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            mailer: builder.build(),
            config,
        })
    }

    /// Assemble the message for one delivery.
    pub fn build_message(&self, delivery: &Delivery<'_>) -> Result<Message, TransportError> {
        let to = delivery
            .recipient
            .ok_or(TransportError::MissingRecipient(delivery.index))?;
        let body = match delivery.artifact {
            Artifact::Html(html) => html.clone(),
            _ => return Err(TransportError::Unsupported("non-HTML")),
        };
        let subject = delivery.subject.unwrap_or(delivery.action);

        Message::builder()
            .from(self.config.from_address.parse().map_err(EmailError::from)?)
            .to(to.parse().map_err(EmailError::from)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| EmailError::Build(e.to_string()).into())
    }
}

#[async_trait]
impl ArtifactTransport for EmailTransport {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), TransportError> {
        let message = self.build_message(delivery)?;
        self.mailer.send(message).await.map_err(EmailError::from)?;
        tracing::info!(
            action = delivery.action,
            row = delivery.index,
            to = delivery.recipient,
            "Personalized email sent"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ontask_core::action::ActionType;
    use ontask_core::value::Value;

    fn transport() -> EmailTransport {
        EmailTransport::new(EmailConfig {
            smtp_host: "localhost".into(),
            smtp_port: 2525,
            from_address: "course@ontask.local".into(),
            smtp_user: None,
            smtp_password: None,
        })
        .unwrap()
    }

    fn delivery<'a>(recipient: Option<&'a str>, artifact: &'a Artifact, key: &'a Option<Value>) -> Delivery<'a> {
        Delivery {
            action: "feedback",
            action_type: ActionType::PersonalizedText,
            index: 3,
            row_key: key,
            recipient,
            subject: Some("Week 3"),
            target_url: None,
            artifact,
        }
    }

    #[test]
    fn from_env_returns_none_without_smtp_host() {
        std::env::remove_var("SMTP_HOST");
        assert!(EmailConfig::from_env().is_none());
    }

    #[test]
    fn builds_html_message() {
        let artifact = Artifact::Html("<p>Hi Ada</p>".into());
        let key = Some(Value::Integer(1));
        let message = transport()
            .build_message(&delivery(Some("ada@example.com"), &artifact, &key))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Week 3"));
        assert!(raw.contains("To: ada@example.com"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn missing_recipient_names_row() {
        let artifact = Artifact::Html("<p>Hi</p>".into());
        let key = Some(Value::Integer(1));
        let err = transport().build_message(&delivery(None, &artifact, &key)).unwrap_err();
        assert_eq!(err, TransportError::MissingRecipient(3));
    }

    #[test]
    fn bad_address_is_rejected() {
        let artifact = Artifact::Html("<p>Hi</p>".into());
        let key = Some(Value::Integer(1));
        let err = transport()
            .build_message(&delivery(Some("not-an-email"), &artifact, &key))
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected(msg) if msg.contains("Email address parse error")));
    }
}
