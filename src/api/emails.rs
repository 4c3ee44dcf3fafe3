use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tempfile::TempDir;

use crate::error::{AppError, Result};
use crate::mail::template::TemplateData;
use crate::models::{MessageResponse, SendOutcome, StatsResponse};
use crate::state::AppState;
use crate::validation::AddressValidator;

/// Template used by the templated send endpoint
pub const EXAMPLE_TEMPLATE: &str = "emails.example";

/// Upload ceiling for a whole multipart request
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Email routes
pub fn email_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(send_email))
        .route("/template", post(send_template_email))
        .route("/stats", get(stats))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Parsed multipart form. Uploaded files live until the form is dropped.
struct EmailForm {
    fields: HashMap<String, String>,
    attachments: Vec<PathBuf>,
    _upload_dir: TempDir,
}

impl EmailForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let upload_dir = tempfile::tempdir()?;
        let mut fields = HashMap::new();
        let mut attachments = Vec::new();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "attachments" || name == "attachments[]" {
                let file_name = field
                    .file_name()
                    .and_then(|n| Path::new(n).file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "attachment".to_string());
                let data = field.bytes().await?;

                // one directory per upload keeps client file names intact
                let dir = upload_dir.path().join(attachments.len().to_string());
                tokio::fs::create_dir(&dir).await?;
                let path = dir.join(file_name);
                tokio::fs::write(&path, &data).await?;
                attachments.push(path);
            } else {
                let value = field.text().await?;
                fields.insert(name, value);
            }
        }

        Ok(Self {
            fields,
            attachments,
            _upload_dir: upload_dir,
        })
    }

    fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }

    /// Require non-blank `required` fields and a valid `to` address
    fn validate(&self, required: &[&str]) -> Result<()> {
        let mut errors = BTreeMap::new();

        for &field in required {
            if self.get(field).trim().is_empty() {
                errors.insert(field.to_string(), format!("The {} field is required.", field));
            }
        }

        let to = self.get("to");
        if !errors.contains_key("to") && !AddressValidator::new().is_valid(to) {
            errors.insert(
                "to".to_string(),
                "The to field must be a valid email address.".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

fn respond(
    outcome: SendOutcome,
    success_message: &str,
    failure_message: &str,
) -> (StatusCode, Json<MessageResponse>) {
    if outcome.success {
        let mut body = MessageResponse::new(success_message);
        body.attempts = Some(outcome.attempts);
        return (StatusCode::OK, Json(body));
    }

    let mut body = MessageResponse::new(failure_message);
    body.attempts = Some(outcome.attempts);
    body.error = outcome.error.as_ref().map(|e| e.kind().to_string());
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
}

/// POST /api/v1/emails - Send raw HTML content
async fn send_email(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let form = EmailForm::read(multipart).await?;
    form.validate(&["to", "subject", "content"])?;

    let outcome = state
        .pipeline
        .send_html(
            form.get("to"),
            form.get("subject"),
            form.get("content"),
            form.attachments.clone(),
        )
        .await;

    Ok(respond(
        outcome,
        "Email sent successfully",
        "Failed to send email",
    ))
}

/// POST /api/v1/emails/template - Send the example template
async fn send_template_email(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let form = EmailForm::read(multipart).await?;
    form.validate(&["to", "subject", "title", "content"])?;

    let mut data = TemplateData::new();
    for key in ["title", "content", "subject"] {
        data.insert(key.to_string(), Value::String(form.get(key).to_string()));
    }

    let outcome = state
        .pipeline
        .send_template(
            form.get("to"),
            form.get("subject"),
            EXAMPLE_TEMPLATE,
            data,
            form.attachments.clone(),
        )
        .await;

    Ok(respond(
        outcome,
        "Template email sent successfully",
        "Failed to send template email",
    ))
}

/// GET /api/v1/emails/stats - Rate limit snapshot
async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let rate_limit = state.stats.snapshot().await?;
    Ok(Json(StatsResponse { rate_limit }))
}
