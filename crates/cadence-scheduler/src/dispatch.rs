//! Notification transports — actually deliver a rendered message.
//! Supports: SMTP (async lettre) and a log-only fallback.
//!
//! Delivery is fire-and-forget from the dispatcher's point of view: no retries
//! happen at this layer.

use async_trait::async_trait;
use cadence_core::config::{NotifyConfig, SmtpConfig};

use crate::error::NotifyError;

/// A rendered notification ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError>;
}

/// Send via SMTP (STARTTLS relay).
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NotificationTransport for SmtpTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox, message::header::ContentType,
            transport::smtp::authentication::Credentials,
        };

        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| NotifyError::Transport(format!("Invalid from: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &message.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| NotifyError::Transport(format!("Invalid to '{to}': {e}")))?;
            builder = builder.to(mailbox);
        }

        let email = builder
            .body(message.body.clone())
            .map_err(|e| NotifyError::Transport(format!("Build email: {e}")))?;

        let mut mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay: {e}")))?
            .port(self.config.port);
        if !self.config.username.is_empty() {
            mailer = mailer.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }

        mailer
            .build()
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Notification mailed to {} recipient(s): {}", message.to.len(), message.subject);
        Ok(())
    }
}

/// Writes notifications to the operational log instead of sending them.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        tracing::info!(
            "📢 Notification (no SMTP configured) to {}: {}\n{}",
            message.to.join(", "),
            message.subject,
            message.body
        );
        Ok(())
    }
}

/// Pick the transport the configuration asks for.
pub fn transport_from_config(config: &NotifyConfig) -> Box<dyn NotificationTransport> {
    match &config.smtp {
        Some(smtp) if !smtp.host.is_empty() => Box::new(SmtpTransport::new(smtp.clone())),
        _ => Box::new(LogTransport),
    }
}
