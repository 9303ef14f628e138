//! Template types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum buttons kept on a structured message.
pub const MAX_BUTTONS: usize = 3;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Invalid argument for filter {filter}: {arg}")]
    InvalidFilterArg { filter: String, arg: String },

    #[error("Unterminated tag starting at byte {0}")]
    UnterminatedTag(usize),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Interactive button kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonKind {
    WebUrl,
    Postback,
}

/// An interactive button attached to a structured message.
///
/// The same shape is used for the template definition (placeholders still
/// present) and the rendered, validated output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: ButtonKind,

    pub title: String,

    /// Target URL; required (and validated) for `web_url` buttons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Postback payload; required for `postback` buttons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Button {
    pub fn web_url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: ButtonKind::WebUrl,
            title: title.into(),
            url: Some(url.into()),
            payload: None,
        }
    }

    pub fn postback(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: ButtonKind::Postback,
            title: title.into(),
            url: None,
            payload: Some(payload.into()),
        }
    }
}

/// Rendering options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Leave tags with no resolvable value verbatim instead of rendering
    /// them as empty strings. Callers choose based on whether partial
    /// rendering is acceptable.
    pub preserve_unknown: bool,
}

/// Output of structured rendering.
///
/// An empty `buttons` list after validation means the caller must fall
/// back to plain-text sending.
#[derive(Debug, Clone)]
pub struct StructuredMessage {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl StructuredMessage {
    pub fn has_buttons(&self) -> bool {
        !self.buttons.is_empty()
    }
}
