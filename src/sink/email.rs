//! Email sink - sends each approved idea report over SMTP (STARTTLS)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{render_report, IdeaSink};
use crate::config::{ConfigError, EmailConfig};
use crate::ideas::IdeaPayload;

pub struct EmailSink {
    sender: Mailbox,
    recipient: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSink {
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let sender_addr = config
            .sender
            .as_deref()
            .ok_or(ConfigError::MissingEmailSetting("email.sender"))?;
        let recipient_addr = config
            .recipient
            .as_deref()
            .ok_or(ConfigError::MissingEmailSetting("email.recipient"))?;
        let password = config
            .app_password
            .clone()
            .ok_or(ConfigError::MissingEmailSetting("IDEA_AGENT_EMAIL_PASSWORD"))?;

        let sender: Mailbox = sender_addr
            .parse()
            .with_context(|| format!("Invalid sender address {:?}", sender_addr))?;
        let recipient: Mailbox = recipient_addr
            .parse()
            .with_context(|| format!("Invalid recipient address {:?}", recipient_addr))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .with_context(|| format!("Failed to set up SMTP relay {}", config.smtp_host))?
            .port(config.smtp_port)
            .credentials(Credentials::new(sender_addr.to_string(), password))
            .build();

        Ok(Self { sender, recipient, transport })
    }

    /// Build the message for an approved idea without sending it
    pub fn build_message(&self, idea: &IdeaPayload) -> Result<Message> {
        Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(format!("Startup idea: {}", idea.title.trim()))
            .header(ContentType::TEXT_PLAIN)
            .body(render_report(idea, Local::now()))
            .context("Failed to build email message")
    }
}

#[async_trait]
impl IdeaSink for EmailSink {
    async fn publish(&self, idea: &IdeaPayload) -> Result<String> {
        let message = self.build_message(idea)?;
        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;

        info!("Idea emailed to {}", self.recipient);
        Ok(format!("email to {}", self.recipient.email))
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_config() -> EmailConfig {
        EmailConfig {
            sender: Some("agent@example.com".to_string()),
            recipient: Some("founder@example.com".to_string()),
            app_password: Some("app-pass".to_string()),
            ..EmailConfig::default()
        }
    }

    #[test]
    fn test_missing_recipient_is_config_error() {
        let mut config = email_config();
        config.recipient = None;
        let err = EmailSink::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("email.recipient"));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let mut config = email_config();
        config.sender = Some("not an address".to_string());
        assert!(EmailSink::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_build_message_subject_and_body() {
        let sink = EmailSink::from_config(&email_config()).unwrap();
        let mut idea = IdeaPayload::titled("Acme Analytics");
        idea.core_problem = "Dashboards nobody reads.".to_string();

        let message = sink.build_message(&idea).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Startup idea: Acme Analytics"));
        assert!(raw.contains("To: founder@example.com"));
        assert!(raw.contains("Dashboards nobody reads."));
    }
}
