//! Message template rendering.
//!
//! This module provides:
//! - Placeholder substitution with dotted paths ({{ order.total }})
//! - Filter chains ({{ name | upper }}, {{ price | number(2) }})
//! - Structured button rendering with validation and capping
//!
//! Rendering is pure and synchronous; no I/O, no suspension points.

mod renderer;
mod types;

pub use renderer::{render_structured, render_text};
pub use types::{
    Button, ButtonKind, RenderOptions, StructuredMessage, TemplateError, TemplateResult,
    MAX_BUTTONS,
};
