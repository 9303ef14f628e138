//! Placeholder substitution engine.
//!
//! Tags look like `{{ path.to.key }}` with optional filter chains:
//! `{{ price | number(2) }}`, `{{ name | upper | escape }}`. Lookup is a
//! dotted path into the payload object. A tag that resolves to nothing
//! renders as an empty string, or stays verbatim when
//! `RenderOptions::preserve_unknown` is set.

use serde_json::Value;

use super::types::{
    Button, ButtonKind, RenderOptions, StructuredMessage, TemplateError, TemplateResult,
    MAX_BUTTONS,
};

/// Substitute placeholder tags in a text template.
pub fn render_text(template: &str, payload: &Value, options: RenderOptions) -> TemplateResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0usize;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);

        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::UnterminatedTag(offset + start));
        };

        let raw_tag = &rest[start..start + 2 + end + 2];
        let inner = &after[..end];

        match render_tag(inner, payload)? {
            Some(value) => out.push_str(&value),
            None if options.preserve_unknown => out.push_str(raw_tag),
            None => {}
        }

        offset += start + 2 + end + 2;
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Render a structured message: substitute the text and every button
/// field, then validate and cap the button list.
///
/// Dropped buttons: empty title after rendering; `web_url` without a
/// parseable absolute URL; `postback` without a non-empty payload. At most
/// [`MAX_BUTTONS`] survive, in original order.
pub fn render_structured(
    text: &str,
    buttons: &[Button],
    payload: &Value,
    options: RenderOptions,
) -> TemplateResult<StructuredMessage> {
    let rendered_text = render_text(text, payload, options)?;

    let mut kept = Vec::new();
    for button in buttons {
        if kept.len() >= MAX_BUTTONS {
            break;
        }

        let title = render_text(&button.title, payload, options)?;
        if title.trim().is_empty() {
            tracing::debug!(kind = ?button.kind, "Dropping button with empty title");
            continue;
        }

        match button.kind {
            ButtonKind::WebUrl => {
                let url = match &button.url {
                    Some(u) => render_text(u, payload, options)?,
                    None => String::new(),
                };
                if url::Url::parse(&url).is_err() {
                    tracing::debug!(title = %title, url = %url, "Dropping button with invalid URL");
                    continue;
                }
                kept.push(Button {
                    kind: ButtonKind::WebUrl,
                    title,
                    url: Some(url),
                    payload: None,
                });
            }
            ButtonKind::Postback => {
                let pb = match &button.payload {
                    Some(p) => render_text(p, payload, options)?,
                    None => String::new(),
                };
                if pb.trim().is_empty() {
                    tracing::debug!(title = %title, "Dropping postback button with empty payload");
                    continue;
                }
                kept.push(Button {
                    kind: ButtonKind::Postback,
                    title,
                    url: None,
                    payload: Some(pb),
                });
            }
        }
    }

    Ok(StructuredMessage {
        text: rendered_text,
        buttons: kept,
    })
}

/// Resolve one tag body (path plus filter chain) to its final string, or
/// `None` when the value is missing/null/empty.
fn render_tag(inner: &str, payload: &Value) -> TemplateResult<Option<String>> {
    let mut parts = inner.split('|');
    let path = parts.next().unwrap_or("").trim();

    let Some(value) = lookup_path(payload, path) else {
        return Ok(None);
    };

    let mut rendered = match value_to_string(value) {
        Some(s) => s,
        None => return Ok(None),
    };

    for filter in parts {
        rendered = apply_filter(filter.trim(), &rendered)?;
    }

    if rendered.is_empty() {
        return Ok(None);
    }

    Ok(Some(rendered))
}

/// Dotted-path lookup into the payload map.
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = payload;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        // Arrays and objects use their JSON representation
        other => Some(other.to_string()),
    }
}

fn apply_filter(spec: &str, input: &str) -> TemplateResult<String> {
    let (name, arg) = match spec.find('(') {
        Some(open) => {
            let close = spec.rfind(')').unwrap_or(spec.len());
            (spec[..open].trim(), Some(spec[open + 1..close].trim()))
        }
        None => (spec, None),
    };

    match name {
        "upper" => Ok(input.to_uppercase()),
        "lower" => Ok(input.to_lowercase()),
        "escape" => Ok(escape_html(input)),
        "urlencode" => Ok(urlencoding::encode(input).into_owned()),
        "json" => Ok(serde_json::to_string(input).unwrap_or_default()),
        "number" => {
            let decimals: usize = match arg {
                Some(a) if !a.is_empty() => {
                    a.parse().map_err(|_| TemplateError::InvalidFilterArg {
                        filter: "number".to_string(),
                        arg: a.to_string(),
                    })?
                }
                _ => 2,
            };
            // Non-numeric data passes through unchanged
            match input.parse::<f64>() {
                Ok(n) => Ok(format!("{:.*}", decimals, n)),
                Err(_) => Ok(input.to_string()),
            }
        }
        other => Err(TemplateError::UnknownFilter(other.to_string())),
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
