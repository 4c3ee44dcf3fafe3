use std::path::PathBuf;

use crate::mail::template::{TemplateData, TemplateError};
use crate::mail::TransportError;

/// Message body: raw HTML or a template rendered at send time
#[derive(Debug, Clone)]
pub enum MailBody {
    Html(String),
    Template { id: String, data: TemplateData },
}

/// One message to one recipient
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: MailBody,
    pub attachments: Vec<PathBuf>,
}

impl SendRequest {
    pub fn html(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: MailBody::Html(html.into()),
            attachments: Vec::new(),
        }
    }

    pub fn template(
        to: impl Into<String>,
        subject: impl Into<String>,
        template_id: impl Into<String>,
        data: TemplateData,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: MailBody::Template {
                id: template_id.into(),
                data,
            },
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<PathBuf>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn template_id(&self) -> Option<&str> {
        match &self.body {
            MailBody::Html(_) => None,
            MailBody::Template { id, .. } => Some(id),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Hourly send limit of {max} reached")]
    RateLimited { max: u64 },

    #[error("Rate limit store unavailable: {0}")]
    RateLimitUnavailable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    TemplateRender(#[from] TemplateError),

    #[error("Failed to read attachment: {0}")]
    Attachment(String),
}

impl SendError {
    /// Stable tag for logs and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::InvalidAddress(_) => "invalid_address",
            SendError::RateLimited { .. } => "rate_limited",
            SendError::RateLimitUnavailable(_) => "rate_limit_unavailable",
            SendError::Transport(_) => "transport_failure",
            SendError::TemplateRender(_) => "template_render_failure",
            SendError::Attachment(_) => "attachment_failure",
        }
    }
}

/// Terminal result of one send
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub attempts: u32,
    pub error: Option<SendError>,
}

impl SendOutcome {
    pub fn delivered(attempts: u32) -> Self {
        Self {
            success: true,
            attempts,
            error: None,
        }
    }

    pub fn failed(attempts: u32, error: SendError) -> Self {
        Self {
            success: false,
            attempts,
            error: Some(error),
        }
    }
}
