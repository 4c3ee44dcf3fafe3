use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::extension::ClientId;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{MailAddress, OutboundMessage, Transport, TransportError};
use crate::config::{Config, SmtpEncryption};
use crate::error::{AppError, Result};

/// SMTP relay transport
#[derive(Clone)]
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let host = config.smtp_host.as_str();
        let mut builder = match config.smtp_encryption {
            SmtpEncryption::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| AppError::TransportError(e.to_string()))?,
            SmtpEncryption::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| AppError::TransportError(e.to_string()))?,
            SmtpEncryption::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.mail_timeout_seconds)));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        if let Some(domain) = &config.smtp_local_domain {
            builder = builder.hello_name(ClientId::Domain(domain.clone()));
        }

        tracing::debug!(
            host = %config.smtp_host,
            port = config.smtp_port,
            encryption = %config.smtp_encryption,
            "SMTP transport configured"
        );

        Ok(Self {
            inner: builder.build(),
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn deliver(&self, message: &OutboundMessage) -> std::result::Result<(), TransportError> {
        let email = build_message(message)?;

        self.inner
            .send(email)
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))?;

        Ok(())
    }
}

fn mailbox(address: &MailAddress) -> std::result::Result<Mailbox, TransportError> {
    let email: Address = address
        .address
        .parse()
        .map_err(|e| TransportError::InvalidMessage(format!("{}: {}", address.address, e)))?;

    Ok(Mailbox::new(address.name.clone(), email))
}

/// Compose the MIME message: an HTML part, plus one part per attachment
pub(crate) fn build_message(
    message: &OutboundMessage,
) -> std::result::Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone());

    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }
    for to in &message.to {
        builder = builder.to(mailbox(&MailAddress::new(to.clone(), None))?);
    }

    let html = SinglePart::html(message.html.clone());
    let email = if message.attachments.is_empty() {
        builder.singlepart(html)
    } else {
        let mut parts = MultiPart::mixed().singlepart(html);
        for attachment in &message.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;
            parts = parts.singlepart(
                MimeAttachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }
        builder.multipart(parts)
    };

    email.map_err(|e| TransportError::InvalidMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Attachment;

    fn message() -> OutboundMessage {
        OutboundMessage {
            from: MailAddress::new("hello@example.com", Some("Example".to_string())),
            reply_to: Some(MailAddress::new("support@example.com", None)),
            to: vec!["user@example.com".to_string()],
            subject: "Welcome".to_string(),
            html: "<h1>Hello</h1>".to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_build_html_message() {
        let email = build_message(&message()).expect("Should build message");
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("Subject: Welcome"));
        assert!(raw.contains("To: user@example.com"));
        assert!(raw.contains("Reply-To: support@example.com"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_build_message_with_attachment() {
        let mut msg = message();
        msg.attachments.push(Attachment {
            filename: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            data: b"remember the milk".to_vec(),
        });

        let email = build_message(&msg).expect("Should build message");
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("filename=\"notes.txt\""));
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let mut msg = message();
        msg.to = vec!["not-an-email".to_string()];

        assert!(matches!(
            build_message(&msg),
            Err(TransportError::InvalidMessage(_))
        ));
    }
}
