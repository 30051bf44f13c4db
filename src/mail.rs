//! Outbound email delivery.
//!
//! Requests never talk SMTP directly: the workflow enqueues an
//! [`OutboundEmail`] and the worker hands it to a [`Mailer`].

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("email build error: {0}")]
    Build(String),
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let transport = builder.build();
        Ok(Self { config, transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|err| MailError::Build(err.to_string()))?;

        self.transport.send(message).await?;
        info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Stand-in used when SMTP is not configured: the message only reaches the log.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "SMTP not configured; email logged instead of sent"
        );
        Ok(())
    }
}

pub fn mailer_from_config(smtp: Option<&SmtpConfig>) -> Result<Arc<dyn Mailer>, MailError> {
    match smtp {
        Some(config) => Ok(Arc::new(SmtpMailer::new(config.clone())?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_email_payload_shape() {
        let email = OutboundEmail {
            to: "candidate@example.com".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
        };
        let value = serde_json::to_value(&email).unwrap();
        assert_eq!(value["to"], "candidate@example.com");
        let back: OutboundEmail = serde_json::from_value(value).unwrap();
        assert_eq!(back, email);
    }

    #[test]
    fn address_errors_are_reported() {
        let parsed: Result<lettre::Address, _> = "not-an-email".parse();
        let err = MailError::Address(parsed.unwrap_err());
        assert!(err.to_string().contains("email address parse error"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let email = OutboundEmail {
            to: "x@example.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        assert!(LogMailer.send(&email).await.is_ok());
    }
}
