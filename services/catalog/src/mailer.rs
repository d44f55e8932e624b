//! Upload notification mail.

use crate::config::MailConfig;
use crate::error::MailError;
use crate::model::ACCEPTED_EXTENSIONS;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub const CONFIRMATION_SUBJECT: &str = "New Image Upload";
pub const REJECTION_SUBJECT: &str = "Image Upload Rejected";

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

impl Notice {
    /// Acceptance notice for a newly cataloged image
    pub fn confirmation(image_id: &str) -> Self {
        Self {
            subject: CONFIRMATION_SUBJECT.to_string(),
            body: format!(
                "We received your image '{}' and it was added to the photo album catalog. \
                 Thank you for using Photo Album!",
                image_id
            ),
        }
    }

    /// Rejection notice for an upload that was not cataloged
    pub fn rejection(file_name: &str, reason: &str) -> Self {
        Self {
            subject: REJECTION_SUBJECT.to_string(),
            body: format!(
                "Your upload '{}' was rejected: {}. Photo Album only accepts {} files.",
                file_name,
                reason,
                ACCEPTED_EXTENSIONS.join(", ")
            ),
        }
    }
}

/// Delivers notices to the configured recipient
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), MailError>;
}

/// SMTP mailer
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::Address {
        address: address.to_string(),
        message: e.to_string(),
    })
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let from = parse_mailbox(&config.sender)?;
        let to = parse_mailbox(&config.recipient)?;

        let builder = if config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let builder = builder.port(config.smtp_port);
        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            tls = config.smtp_tls,
            "Mailer initialized"
        );

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, notice: &Notice) -> Result<(), MailError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notice.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notice.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        Ok(())
    }
}
