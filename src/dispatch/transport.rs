//! Transport boundary.
//!
//! The external send API is a black box: the engine POSTs a JSON payload
//! and gets back a success marker (a provider-assigned message id) or a
//! failure. Everything the provider returns is surfaced for operator
//! diagnosis.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::config::TransportConfig;
use crate::credentials::Credentials;
use crate::template::Button;

type HmacSha256 = Hmac<Sha256>;

/// One outbound transport call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Provider-specific destination (thread id, phone, email)
    pub recipient_id: String,
    /// Rendered message text
    pub text: String,
    /// Validated interactive buttons; empty means plain-text send
    pub buttons: Vec<Button>,
    /// Provider messaging type hint
    pub messaging_type: String,
    /// Tenant credentials resolved for this attempt
    pub credentials: Credentials,
}

/// Successful provider response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Provider-assigned message identifier
    pub provider_msg_id: String,
    /// Full response body, persisted for diagnosis
    pub raw: serde_json::Value,
}

/// Errors from a transport call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Non-2xx response from the provider
    #[error("Provider rejected send with HTTP {status}")]
    Provider { status: u16, body: String },

    /// 2xx response without the provider's success marker
    #[error("Provider response missing message id")]
    MissingMessageId { body: String },

    /// Connection failure, timeout, or other HTTP-level error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Diagnostic payload persisted into the message metadata on failure.
    pub fn diagnostics(&self) -> serde_json::Value {
        match self {
            TransportError::Provider { status, body } => serde_json::json!({
                "http_status": status,
                "provider_body": body,
            }),
            TransportError::MissingMessageId { body } => serde_json::json!({
                "provider_body": body,
            }),
            TransportError::Http(e) => serde_json::json!({
                "error": e.to_string(),
            }),
        }
    }
}

/// A channel's send endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Graph-style chat platform transport.
///
/// POSTs `{recipient, message, messaging_type}` to `/me/messages` with the
/// access token and an HMAC-SHA256 appsecret proof as query parameters.
pub struct GraphTransport {
    http: reqwest::Client,
    base_url: String,
}

impl GraphTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// HMAC-SHA256 of the access token keyed by the app secret, hex-encoded.
    fn appsecret_proof(secret: &str, token: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn message_payload(request: &TransportRequest) -> serde_json::Value {
        if request.buttons.is_empty() {
            serde_json::json!({ "text": request.text })
        } else {
            serde_json::json!({
                "attachment": {
                    "type": "template",
                    "payload": {
                        "template_type": "button",
                        "text": request.text,
                        "buttons": request.buttons,
                    }
                }
            })
        }
    }
}

#[async_trait]
impl Transport for GraphTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = format!("{}/me/messages", self.base_url);

        let body = serde_json::json!({
            "recipient": { "id": request.recipient_id },
            "message": Self::message_payload(request),
            "messaging_type": request.messaging_type,
        });

        let mut query: Vec<(&str, String)> = vec![(
            "access_token",
            request.credentials.access_token.clone(),
        )];
        if let Some(secret) = request.credentials.app_secret.as_deref() {
            query.push((
                "appsecret_proof",
                Self::appsecret_proof(secret, &request.credentials.access_token),
            ));
        }

        let response = self.http.post(&url).query(&query).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Provider {
                status: status.as_u16(),
                body: text,
            });
        }

        let raw: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);

        let provider_msg_id = raw
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(TransportError::MissingMessageId { body: text })?;

        tracing::debug!(
            provider_msg_id = %provider_msg_id,
            recipient = %request.recipient_id,
            "Transport call accepted"
        );

        Ok(TransportResponse {
            provider_msg_id,
            raw,
        })
    }
}
