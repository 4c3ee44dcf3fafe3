use async_trait::async_trait;

use super::{OutboundMessage, Transport, TransportError};

/// Writes messages to the log instead of delivering them (`MAIL_MAILER=log`)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        tracing::info!(
            from = %message.from,
            to = ?message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            html_bytes = message.html.len(),
            "Mail logged (not delivered)"
        );
        Ok(())
    }
}
