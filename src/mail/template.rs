//! HTML body rendering for templated sends.
//!
//! Template identifiers use dotted notation: `emails.example` resolves to
//! `<template dir>/emails/example.html`.

use std::collections::BTreeMap;
use std::path::Path;

use tera::{Context, ErrorKind, Tera};

use crate::error::Result;

/// Variables passed to a template
pub type TemplateData = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to render template {template}: {message}")]
    Render { template: String, message: String },
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_id: &str, data: &TemplateData)
        -> std::result::Result<String, TemplateError>;
}

/// Map a dotted template id to the file name Tera knows it by
pub fn template_name(template_id: &str) -> String {
    if template_id.ends_with(".html") {
        return template_id.to_string();
    }
    format!("{}.html", template_id.replace('.', "/"))
}

pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    /// Load every `*.html` file below `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Template directory not found, starting empty");
            return Ok(Self::empty());
        }

        let glob = format!("{}/**/*.html", dir.display());
        let tera = Tera::new(&glob)?;
        tracing::info!(
            dir = %dir.display(),
            templates = tera.get_template_names().count(),
            "Templates loaded"
        );

        Ok(Self { tera })
    }

    pub fn empty() -> Self {
        Self {
            tera: Tera::default(),
        }
    }

    pub fn add_raw_template(&mut self, template_id: &str, content: &str) -> Result<()> {
        self.tera
            .add_raw_template(&template_name(template_id), content)?;
        Ok(())
    }

    pub fn has_template(&self, template_id: &str) -> bool {
        let name = template_name(template_id);
        self.tera.get_template_names().any(|n| n == name)
    }
}

impl TemplateRenderer for TeraRenderer {
    fn render(
        &self,
        template_id: &str,
        data: &TemplateData,
    ) -> std::result::Result<String, TemplateError> {
        let name = template_name(template_id);
        let render_error = |message: String| TemplateError::Render {
            template: template_id.to_string(),
            message,
        };

        let context = Context::from_serialize(data).map_err(|e| render_error(e.to_string()))?;

        self.tera.render(&name, &context).map_err(|e| match e.kind {
            ErrorKind::TemplateNotFound(_) => TemplateError::NotFound(template_id.to_string()),
            _ => render_error(error_chain(&e)),
        })
    }
}

/// Tera nests the useful message in the error source chain
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
