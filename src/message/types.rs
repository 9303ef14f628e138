use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a message.
///
/// `sending` is a transient claim state: a dispatcher atomically moves a
/// message from `queued` to `sending` before doing any work, so two
/// concurrent dispatchers can never both deliver the same row. `dead` is
/// terminal for messages past the retry cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Dead,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Queued => "queued",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
            MessageStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the message entered or leaves the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

/// Logical delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Channel {
    Messenger,
    Sms,
    Email,
    LivePost,
    Dm,
    Web,
    Other,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Messenger => "messenger",
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::LivePost => "live_post",
            Channel::Dm => "dm",
            Channel::Web => "web",
            Channel::Other => "other",
        }
    }

    /// Channels addressed by a conversation thread id rather than a
    /// phone number or email address.
    pub fn is_thread_addressed(&self) -> bool {
        !matches!(self, Channel::Sms | Channel::Email)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason codes recorded when a dispatch attempt cannot complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MissingThreadId,
    MissingPhone,
    MissingEmail,
    MissingClientForPhone,
    MissingClientForEmail,
    NoToken,
    SendError,
    UnsupportedChannel,
    Exception,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MissingThreadId => "missing_thread_id",
            FailureReason::MissingPhone => "missing_phone",
            FailureReason::MissingEmail => "missing_email",
            FailureReason::MissingClientForPhone => "missing_client_for_phone",
            FailureReason::MissingClientForEmail => "missing_client_for_email",
            FailureReason::NoToken => "no_token",
            FailureReason::SendError => "send_error",
            FailureReason::UnsupportedChannel => "unsupported_channel",
            FailureReason::Exception => "exception",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted message row.
///
/// Content and routing fields are immutable once created; retries only
/// mutate lifecycle fields (`status`, `retries`, `next_attempt_at`,
/// `sent_at`, `platform_msg_id`, `error_message`, `metadata` diagnostics).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub owner_id: i64,
    pub direction: Direction,
    pub channel: Channel,
    pub platform: Option<String>,
    pub platform_user_id: Option<String>,
    pub platform_thread_id: Option<String>,
    pub client_id: Option<i64>,
    pub order_id: Option<i64>,
    pub order_group_id: Option<i64>,
    pub subject: Option<String>,
    pub body_text: String,
    pub metadata: sqlx::types::Json<serde_json::Value>,
    pub status: MessageStatus,
    pub retries: i64,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub platform_msg_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Forced sending-account id, when an operator pinned one in metadata.
    pub fn forced_account(&self) -> Option<&str> {
        self.metadata.0.get("account_id").and_then(|v| v.as_str())
    }

    /// Provider messaging type stored at enqueue time, if any.
    pub fn messaging_type(&self) -> Option<&str> {
        self.metadata
            .0
            .get("messaging_type")
            .and_then(|v| v.as_str())
    }
}

/// Request to create an outbound message in `queued` state.
///
/// Creating a message performs no deliverability validation and no network
/// call; that is the dispatch pipeline's job.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub owner_id: i64,
    pub channel: Channel,
    pub platform: Option<String>,
    pub platform_user_id: Option<String>,
    pub platform_thread_id: Option<String>,
    pub client_id: Option<i64>,
    pub order_id: Option<i64>,
    pub order_group_id: Option<i64>,
    pub subject: Option<String>,
    pub body_text: String,
    pub metadata: serde_json::Value,
}

impl EnqueueRequest {
    pub fn new(owner_id: i64, channel: Channel, body_text: impl Into<String>) -> Self {
        Self {
            owner_id,
            channel,
            platform: None,
            platform_user_id: None,
            platform_thread_id: None,
            client_id: None,
            order_id: None,
            order_group_id: None,
            subject: None,
            body_text: body_text.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn recipient(mut self, platform_user_id: impl Into<String>) -> Self {
        self.platform_user_id = Some(platform_user_id.into());
        self
    }

    pub fn thread(mut self, platform_thread_id: impl Into<String>) -> Self {
        self.platform_thread_id = Some(platform_thread_id.into());
        self
    }

    pub fn client(mut self, client_id: i64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn order_group(mut self, order_group_id: i64) -> Self {
        self.order_group_id = Some(order_group_id);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// A structured payload (e.g. button definitions) can stand in for
    /// plain body text.
    pub fn has_structured_payload(&self) -> bool {
        self.metadata
            .get("buttons")
            .and_then(|v| v.as_array())
            .map(|a| !a.is_empty())
            .unwrap_or(false)
            || self.metadata.get("template").is_some()
    }
}

/// An inbound message observed on an external channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub owner_id: i64,
    pub channel: Channel,
    pub platform: Option<String>,
    pub platform_user_id: Option<String>,
    pub platform_thread_id: Option<String>,
    pub client_id: Option<i64>,
    pub body_text: String,
    pub metadata: serde_json::Value,
}
