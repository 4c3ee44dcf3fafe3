use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;

use super::{OutboundMessage, Transport, TransportError};
use crate::config::Config;
use crate::error::{AppError, Result};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Clone)]
pub struct ResendTransport {
    client: Client,
    api_key: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    from: String,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<PayloadAttachment<'a>>,
}

#[derive(Serialize)]
struct PayloadAttachment<'a> {
    filename: &'a str,
    content: String,
}

impl ResendTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .resend_api_key
            .clone()
            .ok_or_else(|| AppError::BadRequest("RESEND_API_KEY missing in env".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.mail_timeout_seconds))
            .build()
            .map_err(|e| AppError::TransportError(e.to_string()))?;

        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl Transport for ResendTransport {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn deliver(&self, message: &OutboundMessage) -> std::result::Result<(), TransportError> {
        let payload = Payload {
            from: message.from.to_string(),
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            reply_to: message.reply_to.as_ref().map(ToString::to_string),
            attachments: message
                .attachments
                .iter()
                .map(|a| PayloadAttachment {
                    filename: &a.filename,
                    content: STANDARD.encode(&a.data),
                })
                .collect(),
        };

        let res = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Delivery(format!("Mail send failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
