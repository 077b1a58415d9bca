use crate::{
    compose::NotificationMessage,
    config::ConfigurationError,
    secrets::{SecretError, SecretRepository},
    templates::TemplateError,
};
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment as AttachmentPart, MultiPart, SinglePart},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use std::borrow::Cow;
use tracing::{debug, info};

const SMTP_URL: &str = "smtp://localhost";
pub const SMTP_CREDENTIALS_NAME: &str = "smtp-credentials";

/// Delivers notification mails.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Attachment {index} is malformed: {reason}")]
    MalformedAttachment { index: usize, reason: String },
    #[error("Error building message: {0}")]
    BuildMessage(#[from] lettre::error::Error),
    #[error("Unable to connect to SMTP server: {0}")]
    Connect(String),
    #[error("Error sending message: {0}")]
    Send(#[from] lettre::transport::smtp::Error),
}

/// Sends mail over SMTP. The connection pool is set up on first use.
pub struct SmtpMailTransport<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    smtp_url: Cow<'static, str>,
    mailer: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl<SecretRepositoryT: SecretRepository> SmtpMailTransport<SecretRepositoryT> {
    pub fn new(secrets_repository: SecretRepositoryT, smtp_url: impl Into<Cow<'static, str>>) -> Self {
        Self {
            secrets_repository,
            smtp_url: smtp_url.into(),
            mailer: Default::default(),
        }
    }

    pub fn from_env(secrets_repository: SecretRepositoryT) -> Self {
        let smtp_url = std::env::var("SMTP_URL")
            .map(Cow::Owned)
            .unwrap_or(SMTP_URL.into());
        Self::new(secrets_repository, smtp_url)
    }

    async fn initialise_mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DispatchError> {
        info!("Connecting to {}", self.smtp_url);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&self.smtp_url)?
            .authentication(vec![Mechanism::Plain]);

        // Credentials are only sent over TLS. A misconfigured environment then
        // gets its connection rejected instead of leaking the password.
        if self.smtp_url.starts_with("smtps://") {
            let parsed_credentials: SmtpCredentials = self
                .secrets_repository
                .get_secret(SMTP_CREDENTIALS_NAME)
                .await
                .map_err(|e: SecretError| DispatchError::Connect(e.to_string()))?;
            builder = builder.credentials(Credentials::new(
                parsed_credentials.username,
                parsed_credentials.password,
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl<SecretRepositoryT> MailTransport for SmtpMailTransport<SecretRepositoryT>
where
    SecretRepositoryT: SecretRepository + Send + Sync,
{
    async fn send(&self, message: &NotificationMessage) -> Result<(), DispatchError> {
        let email = build_message(message)?;
        let mailer = self
            .mailer
            .get_or_try_init(self.initialise_mailer())
            .await
            .map_err(|e| match e {
                DispatchError::Connect(_) => e,
                other => DispatchError::Connect(other.to_string()),
            })?;
        mailer.send(email).await?;
        debug!("Notification \"{}\" handed to SMTP server", message.subject);
        Ok(())
    }
}

/// Turns a notification into a MIME message: plain text, or multipart/mixed
/// when there are attachments.
pub fn build_message(message: &NotificationMessage) -> Result<Message, DispatchError> {
    let mut builder = Message::builder()
        .from(message.from.clone())
        .reply_to(message.reply_to.clone())
        .subject(message.subject.as_str());
    for recipient in &message.to {
        builder = builder.to(recipient.clone());
    }
    let email = if message.attachments.is_empty() {
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())?
    } else {
        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
        for attachment in &message.attachments {
            parts = parts.singlepart(
                AttachmentPart::new(attachment.filename.clone())
                    .body(attachment.content.clone(), attachment.content_type.clone()),
            );
        }
        builder.multipart(parts)?
    };
    Ok(email)
}

#[derive(Deserialize)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}
