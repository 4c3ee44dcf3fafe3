pub mod log;
pub mod resend;
pub mod smtp;
pub mod template;

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, MailerKind};
use crate::error::Result;

/// Mailbox with an optional display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddress {
    pub address: String,
    pub name: Option<String>,
}

impl MailAddress {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// File attached to an outbound message
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Fully composed message handed to a transport
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: MailAddress,
    pub reply_to: Option<MailAddress>,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers composed messages. Every error is treated as retryable by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &OutboundMessage) -> std::result::Result<(), TransportError>;
}

/// Create the transport selected by `MAIL_MAILER`
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.mail_mailer {
        MailerKind::Smtp => Arc::new(smtp::SmtpTransport::new(config)?),
        MailerKind::Resend => Arc::new(resend::ResendTransport::new(config)?),
        MailerKind::Log => Arc::new(log::LogTransport),
    };

    tracing::info!(mailer = %config.mail_mailer, "Mail transport initialized");
    Ok(transport)
}

/// Read attachment files, skipping paths that no longer exist.
pub async fn load_attachments(paths: &[PathBuf]) -> std::io::Result<Vec<Attachment>> {
    let mut attachments = Vec::with_capacity(paths.len());

    for path in paths {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Attachment missing, skipped");
                continue;
            }
            Err(e) => return Err(e),
        };

        attachments.push(Attachment {
            filename: attachment_filename(path),
            content_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string(),
            data,
        });
    }

    Ok(attachments)
}

fn attachment_filename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}
