//! The "try send" pipeline: one dispatch attempt for one message.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::credentials::{CredentialError, CredentialResolver};
use crate::message::{
    Channel, Direction, FailureReason, Message, MessageStatus, MessageStore, StoreError,
};
use crate::template::Button;

use super::clients::ClientDirectory;
use super::router::TransportRouter;
use super::transport::{Transport, TransportRequest};

/// Default provider messaging type when the message metadata has none.
const DEFAULT_MESSAGING_TYPE: &str = "UPDATE";

/// Infrastructure failures during an attempt.
///
/// Domain outcomes (ineligible, missing address, no credentials, provider
/// rejection) are not errors — they are reported in the [`DispatchReport`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Structured outcome of one dispatch attempt.
///
/// Always produced, success or failure; the operator UI renders it
/// directly.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub ok: bool,
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchReport {
    fn sent(message_id: i64, retries: i64, platform_msg_id: String) -> Self {
        Self {
            ok: true,
            message_id,
            status: Some(MessageStatus::Sent),
            retries: Some(retries),
            platform_msg_id: Some(platform_msg_id),
            error: None,
        }
    }

    fn rejected(
        message_id: i64,
        status: Option<MessageStatus>,
        retries: Option<i64>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            message_id,
            status,
            retries,
            platform_msg_id: None,
            error: Some(error.into()),
        }
    }
}

/// Resolved destination address, or the reason it could not be resolved.
enum AddressOutcome {
    Resolved(String),
    Missing(FailureReason),
}

/// Validates, claims, addresses, authenticates and sends one message.
pub struct DispatchPipeline {
    store: MessageStore,
    resolver: CredentialResolver,
    router: TransportRouter,
    clients: Arc<dyn ClientDirectory>,
}

impl DispatchPipeline {
    pub fn new(
        store: MessageStore,
        resolver: CredentialResolver,
        router: TransportRouter,
        clients: Arc<dyn ClientDirectory>,
    ) -> Self {
        Self {
            store,
            resolver,
            router,
            clients,
        }
    }

    /// Attempt delivery of one queued outbound message.
    ///
    /// Never returns an error: infrastructure failures are flattened into
    /// a report with a generic `exception` reason so one bad message can
    /// never halt a batch.
    #[tracing::instrument(
        name = "dispatch.try_send",
        skip(self),
        fields(owner_id = owner_id, message_id = message_id)
    )]
    pub async fn try_send(&self, owner_id: i64, message_id: i64) -> DispatchReport {
        match self.attempt(owner_id, message_id).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(
                    owner_id = owner_id,
                    message_id = message_id,
                    error = %e,
                    "Unexpected error during dispatch"
                );
                DispatchReport::rejected(
                    message_id,
                    None,
                    None,
                    format!("{}: {}", FailureReason::Exception, e),
                )
            }
        }
    }

    async fn attempt(
        &self,
        owner_id: i64,
        message_id: i64,
    ) -> Result<DispatchReport, DispatchError> {
        // Eligibility: exists for this tenant, queued, outbound, channel wired.
        let Some(msg) = self.store.get(owner_id, message_id).await? else {
            return Ok(DispatchReport::rejected(message_id, None, None, "not_found"));
        };

        if msg.direction != Direction::Out {
            return Ok(DispatchReport::rejected(
                message_id,
                Some(msg.status),
                Some(msg.retries),
                "not_outbound",
            ));
        }

        if msg.status != MessageStatus::Queued {
            return Ok(DispatchReport::rejected(
                message_id,
                Some(msg.status),
                Some(msg.retries),
                "not_queued",
            ));
        }

        let Some(transport) = self.router.get(msg.channel) else {
            return Ok(DispatchReport::rejected(
                message_id,
                Some(msg.status),
                Some(msg.retries),
                FailureReason::UnsupportedChannel.as_str(),
            ));
        };

        // Claim before anything else touches the network: concurrent
        // dispatchers cannot both win this conditional update.
        if !self.store.claim(message_id).await? {
            return Ok(DispatchReport::rejected(
                message_id,
                None,
                None,
                "already_claimed",
            ));
        }

        match self.dispatch_claimed(&msg, transport.as_ref()).await {
            Ok(report) => Ok(report),
            Err(e) => {
                // Undo the claim so the row is not stranded in `sending`
                if let Err(release_err) = self.store.release(message_id).await {
                    tracing::error!(
                        message_id = message_id,
                        error = %release_err,
                        "Failed to release claim after dispatch error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Work performed while holding the claim.
    async fn dispatch_claimed(
        &self,
        msg: &Message,
        transport: &dyn Transport,
    ) -> Result<DispatchReport, DispatchError> {
        // Address resolution is cheap and runs before credentials: a
        // message missing both records the address error, never the
        // credential one.
        let recipient = match self.resolve_address(msg).await? {
            AddressOutcome::Resolved(addr) => addr,
            AddressOutcome::Missing(reason) => {
                // The row stays queued so a human can fix the data
                self.store.release(msg.id).await?;
                tracing::warn!(
                    owner_id = msg.owner_id,
                    message_id = msg.id,
                    reason = %reason,
                    "No destination address, message left queued"
                );
                return Ok(DispatchReport::rejected(
                    msg.id,
                    Some(MessageStatus::Queued),
                    Some(msg.retries),
                    reason.as_str(),
                ));
            }
        };

        let credentials = self
            .resolver
            .resolve(msg.owner_id, msg.channel, msg.forced_account())
            .await?;

        let Some(credentials) = credentials else {
            let retries = self
                .store
                .mark_failed(
                    msg.id,
                    FailureReason::NoToken,
                    "no delivery credentials configured for tenant",
                    &serde_json::json!({}),
                )
                .await?;
            return Ok(DispatchReport::rejected(
                msg.id,
                Some(MessageStatus::Failed),
                Some(retries),
                FailureReason::NoToken.as_str(),
            ));
        };

        let request = TransportRequest {
            recipient_id: recipient,
            text: msg.body_text.clone(),
            buttons: self.stored_buttons(msg),
            messaging_type: msg
                .messaging_type()
                .unwrap_or(DEFAULT_MESSAGING_TYPE)
                .to_string(),
            credentials,
        };

        match transport.send(&request).await {
            Ok(response) => {
                let retries = self
                    .store
                    .mark_sent(msg.id, &response.provider_msg_id, &response.raw)
                    .await?;
                Ok(DispatchReport::sent(
                    msg.id,
                    retries,
                    response.provider_msg_id,
                ))
            }
            Err(e) => {
                let retries = self
                    .store
                    .mark_failed(
                        msg.id,
                        FailureReason::SendError,
                        &e.to_string(),
                        &e.diagnostics(),
                    )
                    .await?;
                Ok(DispatchReport::rejected(
                    msg.id,
                    Some(MessageStatus::Failed),
                    Some(retries),
                    FailureReason::SendError.as_str(),
                ))
            }
        }
    }

    /// Resolve the transport destination for the message's channel.
    async fn resolve_address(&self, msg: &Message) -> Result<AddressOutcome, DispatchError> {
        match msg.channel {
            Channel::Sms => {
                let Some(client_id) = msg.client_id else {
                    return Ok(AddressOutcome::Missing(FailureReason::MissingClientForPhone));
                };
                let contact = self.clients.contact(msg.owner_id, client_id).await?;
                match contact.as_ref().and_then(|c| c.phone()) {
                    Some(phone) => Ok(AddressOutcome::Resolved(phone.to_string())),
                    None if contact.is_none() => {
                        Ok(AddressOutcome::Missing(FailureReason::MissingClientForPhone))
                    }
                    None => Ok(AddressOutcome::Missing(FailureReason::MissingPhone)),
                }
            }
            Channel::Email => {
                let Some(client_id) = msg.client_id else {
                    return Ok(AddressOutcome::Missing(FailureReason::MissingClientForEmail));
                };
                let contact = self.clients.contact(msg.owner_id, client_id).await?;
                match contact.as_ref().and_then(|c| c.email()) {
                    Some(email) => Ok(AddressOutcome::Resolved(email.to_string())),
                    None if contact.is_none() => {
                        Ok(AddressOutcome::Missing(FailureReason::MissingClientForEmail))
                    }
                    None => Ok(AddressOutcome::Missing(FailureReason::MissingEmail)),
                }
            }
            // Thread-addressed chat channels
            _ => {
                if let Some(thread) = msg
                    .platform_thread_id
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                {
                    return Ok(AddressOutcome::Resolved(thread.to_string()));
                }
                // No stored thread: recover from the most recent inbound
                // message for the same client and platform.
                let Some(client_id) = msg.client_id else {
                    return Ok(AddressOutcome::Missing(FailureReason::MissingThreadId));
                };
                let thread = self
                    .store
                    .latest_inbound_thread(msg.owner_id, client_id, msg.platform.as_deref())
                    .await?;
                match thread {
                    Some(t) => Ok(AddressOutcome::Resolved(t)),
                    None => Ok(AddressOutcome::Missing(FailureReason::MissingThreadId)),
                }
            }
        }
    }

    /// Button definitions baked into the message metadata at render time.
    fn stored_buttons(&self, msg: &Message) -> Vec<Button> {
        let Some(raw) = msg.metadata.0.get("buttons") else {
            return Vec::new();
        };
        match serde_json::from_value::<Vec<Button>>(raw.clone()) {
            Ok(buttons) => buttons,
            Err(e) => {
                tracing::warn!(
                    message_id = msg.id,
                    error = %e,
                    "Unreadable button definitions in metadata, sending text only"
                );
                Vec::new()
            }
        }
    }
}
