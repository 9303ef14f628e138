//! Cross-component integration tests for the dispatch engine.
//!
//! These run against an in-memory SQLite store and a mock transport, so
//! they exercise the real store, resolver and pipeline without any
//! network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;

use canal_dispatch::config::CredentialsConfig;
use canal_dispatch::credentials::CredentialResolver;
use canal_dispatch::db;
use canal_dispatch::dispatch::{
    ClientContact, ClientDirectory, DispatchPipeline, RetryPolicy, SqlClientDirectory, Transport,
    TransportError, TransportRequest, TransportResponse, TransportRouter,
};
use canal_dispatch::message::{
    Channel, EnqueueRequest, InboundMessage, MessageStatus, MessageStore, ScheduleOutcome,
};
use canal_dispatch::worker::DispatchWorker;

// =============================================================================
// Test environment
// =============================================================================

#[derive(Clone)]
enum MockMode {
    Succeed,
    ProviderError { status: u16, body: String },
}

/// Transport double: programmable outcome, call counter, request capture.
struct MockTransport {
    calls: AtomicUsize,
    mode: Mutex<MockMode>,
    last_request: Mutex<Option<TransportRequest>>,
}

impl MockTransport {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode: Mutex::new(MockMode::Succeed),
            last_request: Mutex::new(None),
        })
    }

    fn set_provider_error(&self, status: u16, body: &str) {
        *self.mode.lock().unwrap() = MockMode::ProviderError {
            status,
            body: body.to_string(),
        };
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_recipient(&self) -> Option<String> {
        self.last_request
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.recipient_id.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request.clone());

        match self.mode.lock().unwrap().clone() {
            MockMode::Succeed => Ok(TransportResponse {
                provider_msg_id: format!("mid.{}", n),
                raw: json!({"message_id": format!("mid.{}", n)}),
            }),
            MockMode::ProviderError { status, body } => {
                Err(TransportError::Provider { status, body })
            }
        }
    }
}

struct TestEnvironment {
    pool: SqlitePool,
    store: MessageStore,
    pipeline: Arc<DispatchPipeline>,
    worker: DispatchWorker,
    transport: Arc<MockTransport>,
}

async fn create_test_environment() -> TestEnvironment {
    let pool = db::connect_in_memory().await.expect("in-memory db");
    let store = MessageStore::new(pool.clone());
    let resolver = CredentialResolver::from_config(&CredentialsConfig::default(), &pool);

    let transport = MockTransport::succeeding();
    let router = TransportRouter::new()
        .with_transport(Channel::Messenger, transport.clone())
        .with_transport(Channel::Sms, transport.clone())
        .with_transport(Channel::Email, transport.clone());

    let pipeline = Arc::new(DispatchPipeline::new(
        store.clone(),
        resolver,
        router,
        Arc::new(SqlClientDirectory::new(pool.clone())),
    ));
    let worker = DispatchWorker::new(store.clone(), pipeline.clone());

    TestEnvironment {
        pool,
        store,
        pipeline,
        worker,
        transport,
    }
}

async fn seed_settings_credentials(pool: &SqlitePool, owner: i64) {
    for (key, value) in [
        ("messenger.access_token", "tok-settings"),
        ("messenger.account_id", "page-1"),
        ("messenger.app_secret", "shh"),
    ] {
        sqlx::query("INSERT INTO tenant_settings (owner_id, key, value) VALUES (?, ?, ?)")
            .bind(owner)
            .bind(key)
            .bind(value)
            .execute(pool)
            .await
            .unwrap();
    }
}

async fn seed_client(
    pool: &SqlitePool,
    owner: i64,
    phone: Option<&str>,
    email: Option<&str>,
) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO clients (owner_id, name, phone, email) VALUES (?, 'Test Client', ?, ?) RETURNING id",
    )
    .bind(owner)
    .bind(phone)
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

// =============================================================================
// Enqueue
// =============================================================================

#[tokio::test]
async fn test_enqueue_twice_yields_independent_messages() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;

    let req = EnqueueRequest::new(1, Channel::Messenger, "hello").thread("t-1");
    let a = env.store.enqueue(req.clone()).await.unwrap();
    let b = env.store.enqueue(req).await.unwrap();
    assert_ne!(a, b);

    // No implicit deduplication: both dispatch independently
    assert!(env.pipeline.try_send(1, a).await.ok);
    assert!(env.pipeline.try_send(1, b).await.ok);
    assert_eq!(env.transport.calls(), 2);
}

// =============================================================================
// Eligibility & tenant isolation
// =============================================================================

#[tokio::test]
async fn test_tenant_isolation_never_calls_transport() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 2).await;
    let id = env
        .store
        .enqueue(EnqueueRequest::new(2, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;

    assert!(!report.ok);
    assert_eq!(report.error.as_deref(), Some("not_found"));
    assert_eq!(env.transport.calls(), 0);
    // The other tenant's message is untouched
    assert_eq!(
        env.store.status(2, id).await.unwrap(),
        Some(MessageStatus::Queued)
    );
}

#[tokio::test]
async fn test_non_queued_message_is_rejected() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    assert!(env.pipeline.try_send(1, id).await.ok);

    // Second attempt finds the message already sent
    let report = env.pipeline.try_send(1, id).await;
    assert!(!report.ok);
    assert_eq!(report.error.as_deref(), Some("not_queued"));
    assert_eq!(report.status, Some(MessageStatus::Sent));
    assert_eq!(env.transport.calls(), 1);
}

#[tokio::test]
async fn test_inbound_message_is_not_dispatchable() {
    let env = create_test_environment().await;
    let id = env
        .store
        .record_inbound(InboundMessage {
            owner_id: 1,
            channel: Channel::Messenger,
            platform: Some("facebook".to_string()),
            platform_user_id: Some("u-1".to_string()),
            platform_thread_id: Some("t-1".to_string()),
            client_id: None,
            body_text: "customer says hi".to_string(),
            metadata: json!({}),
        })
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;
    assert!(!report.ok);
    assert_eq!(report.error.as_deref(), Some("not_outbound"));
    assert_eq!(env.transport.calls(), 0);
}

// =============================================================================
// Address resolution
// =============================================================================

#[tokio::test]
async fn test_address_error_reported_before_credential_error() {
    let env = create_test_environment().await;
    // No thread, no client, AND no credentials configured
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi"))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;

    assert!(!report.ok);
    assert_eq!(report.error.as_deref(), Some("missing_thread_id"));
    assert_eq!(env.transport.calls(), 0);
    // Address failures leave the row queued for a human to fix
    let msg = env.store.get(1, id).await.unwrap().unwrap();
    assert_eq!(msg.status, MessageStatus::Queued);
    assert_eq!(msg.retries, 0);
}

#[tokio::test]
async fn test_thread_id_recovered_from_inbound_history() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    let client_id = seed_client(&env.pool, 1, None, None).await;

    env.store
        .record_inbound(InboundMessage {
            owner_id: 1,
            channel: Channel::Messenger,
            platform: Some("facebook".to_string()),
            platform_user_id: Some("u-1".to_string()),
            platform_thread_id: Some("t-history".to_string()),
            client_id: Some(client_id),
            body_text: "hi there".to_string(),
            metadata: json!({}),
        })
        .await
        .unwrap();

    // Outbound message with no stored thread id
    let id = env
        .store
        .enqueue(
            EnqueueRequest::new(1, Channel::Messenger, "reply")
                .platform("facebook")
                .client(client_id),
        )
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;

    assert!(report.ok, "expected success, got {:?}", report.error);
    assert_eq!(env.transport.last_recipient().as_deref(), Some("t-history"));
}

#[tokio::test]
async fn test_sms_and_email_address_reasons() {
    let env = create_test_environment().await;
    let no_contact = seed_client(&env.pool, 1, None, None).await;

    // sms without a linked client
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Sms, "hi"))
        .await
        .unwrap();
    let report = env.pipeline.try_send(1, id).await;
    assert_eq!(report.error.as_deref(), Some("missing_client_for_phone"));

    // sms with a client that has no phone on file
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Sms, "hi").client(no_contact))
        .await
        .unwrap();
    let report = env.pipeline.try_send(1, id).await;
    assert_eq!(report.error.as_deref(), Some("missing_phone"));

    // email with a client that has no email on file
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Email, "hi").client(no_contact))
        .await
        .unwrap();
    let report = env.pipeline.try_send(1, id).await;
    assert_eq!(report.error.as_deref(), Some("missing_email"));

    // All of the above failed before any transport call, rows still queued
    assert_eq!(env.transport.calls(), 0);
}

#[tokio::test]
async fn test_sms_uses_client_phone_as_recipient() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    let client_id = seed_client(&env.pool, 1, Some("+5511999990000"), None).await;

    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Sms, "your order shipped").client(client_id))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;
    assert!(report.ok);
    assert_eq!(
        env.transport.last_recipient().as_deref(),
        Some("+5511999990000")
    );
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn test_missing_credentials_mark_failed() {
    let env = create_test_environment().await;
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;

    assert!(!report.ok);
    assert_eq!(report.error.as_deref(), Some("no_token"));
    assert_eq!(report.status, Some(MessageStatus::Failed));
    assert_eq!(report.retries, Some(1));
    assert_eq!(env.transport.calls(), 0);
}

#[tokio::test]
async fn test_legacy_credentials_used_when_settings_absent() {
    let env = create_test_environment().await;
    sqlx::query(
        "INSERT INTO platform_credentials (owner_id, account_id, access_token, created_at)
         VALUES (1, 'page-legacy', 'tok-legacy', datetime('now'))",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;
    assert!(report.ok);

    let last = env.transport.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(last.credentials.access_token, "tok-legacy");
    assert_eq!(last.credentials.source.as_str(), "legacy");
}

// =============================================================================
// Outcome recording
// =============================================================================

#[tokio::test]
async fn test_successful_send_records_sent_state() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;

    assert!(report.ok);
    assert_eq!(report.status, Some(MessageStatus::Sent));
    assert_eq!(report.retries, Some(1));
    assert!(report.platform_msg_id.is_some());

    let msg = env.store.get(1, id).await.unwrap().unwrap();
    assert_eq!(msg.status, MessageStatus::Sent);
    assert_eq!(msg.retries, 1);
    assert!(msg.sent_at.is_some());
    assert_eq!(msg.platform_msg_id, report.platform_msg_id);
    assert!(msg.error_message.is_none());
}

#[tokio::test]
async fn test_provider_failure_records_diagnostics() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    env.transport
        .set_provider_error(400, r#"{"error":{"message":"Invalid OAuth token"}}"#);

    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;

    assert!(!report.ok);
    assert_eq!(report.error.as_deref(), Some("send_error"));
    assert_eq!(report.status, Some(MessageStatus::Failed));

    let msg = env.store.get(1, id).await.unwrap().unwrap();
    assert_eq!(msg.status, MessageStatus::Failed);
    assert_eq!(msg.retries, 1);
    assert!(msg.sent_at.is_none());
    assert!(msg.platform_msg_id.is_none());
    assert!(msg.error_message.is_some());

    // HTTP status and provider body persisted for operator diagnosis
    let failure = &msg.metadata.0["last_failure"];
    assert_eq!(failure["reason"], json!("send_error"));
    assert_eq!(failure["details"]["http_status"], json!(400));
    assert!(failure["details"]["provider_body"]
        .as_str()
        .unwrap()
        .contains("Invalid OAuth token"));
}

#[tokio::test]
async fn test_failure_does_not_requeue_automatically() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    env.transport.set_provider_error(500, "upstream down");

    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();
    env.pipeline.try_send(1, id).await;

    // Still failed, invisible to the worker until a retry is scheduled
    let report = env.worker.run_batch(10).await;
    assert_eq!(report.processed, 0);

    // Scheduling a retry is the explicit step that re-queues
    let policy = RetryPolicy::new(Default::default());
    let outcome = policy.schedule(&env.store, 1, id).await.unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Scheduled { .. }));
    assert_eq!(
        env.store.status(1, id).await.unwrap(),
        Some(MessageStatus::Queued)
    );
}

// =============================================================================
// Worker loop
// =============================================================================

#[tokio::test]
async fn test_worker_batch_isolates_failures() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;

    // Tenant 1 has credentials; tenant 2 does not
    for i in 0..4 {
        env.store
            .enqueue(
                EnqueueRequest::new(1, Channel::Messenger, format!("msg {}", i)).thread("t-1"),
            )
            .await
            .unwrap();
    }
    for i in 0..3 {
        env.store
            .enqueue(
                EnqueueRequest::new(2, Channel::Messenger, format!("msg {}", i)).thread("t-2"),
            )
            .await
            .unwrap();
    }

    let report = env.worker.run_batch(100).await;

    assert_eq!(report.processed, 7);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 3);
    assert_eq!(env.transport.calls(), 4);
}

#[tokio::test]
async fn test_worker_respects_batch_limit_and_order() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            env.store
                .enqueue(
                    EnqueueRequest::new(1, Channel::Messenger, format!("m{}", i)).thread("t-1"),
                )
                .await
                .unwrap(),
        );
    }

    let report = env.worker.run_batch(2).await;
    assert_eq!(report.processed, 2);

    // Oldest-first: the first two enqueued are now sent
    assert_eq!(
        env.store.status(1, ids[0]).await.unwrap(),
        Some(MessageStatus::Sent)
    );
    assert_eq!(
        env.store.status(1, ids[1]).await.unwrap(),
        Some(MessageStatus::Sent)
    );
    assert_eq!(
        env.store.status(1, ids[2]).await.unwrap(),
        Some(MessageStatus::Queued)
    );
}

// =============================================================================
// Infrastructure failures
// =============================================================================

/// Directory whose backing table is unreachable.
struct FailingDirectory;

#[async_trait]
impl ClientDirectory for FailingDirectory {
    async fn contact(
        &self,
        _owner_id: i64,
        _client_id: i64,
    ) -> Result<Option<ClientContact>, sqlx::Error> {
        Err(sqlx::Error::PoolClosed)
    }
}

#[tokio::test]
async fn test_infrastructure_error_releases_claim_and_batch_continues() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    let client_id = seed_client(&env.pool, 1, Some("+5511999990000"), None).await;

    // Same store and transport, but the client directory errors out
    let router = TransportRouter::new()
        .with_transport(Channel::Messenger, env.transport.clone())
        .with_transport(Channel::Sms, env.transport.clone());
    let pipeline = Arc::new(DispatchPipeline::new(
        env.store.clone(),
        CredentialResolver::from_config(&CredentialsConfig::default(), &env.pool),
        router,
        Arc::new(FailingDirectory),
    ));
    let worker = DispatchWorker::new(env.store.clone(), pipeline.clone());

    let broken = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Sms, "hi").client(client_id))
        .await
        .unwrap();
    let fine = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let report = pipeline.try_send(1, broken).await;
    assert!(!report.ok);
    assert!(report.error.as_deref().unwrap().starts_with("exception"));

    // The claim was released: no attempt recorded, row back in queue
    let msg = env.store.get(1, broken).await.unwrap().unwrap();
    assert_eq!(msg.status, MessageStatus::Queued);
    assert_eq!(msg.retries, 0);

    // A batch counts the failure and keeps going past the broken message
    let batch = worker.run_batch(10).await;
    assert_eq!(batch.processed, 2);
    assert_eq!(batch.succeeded, 1);
    assert_eq!(batch.failed, 1);
    assert_eq!(
        env.store.status(1, fine).await.unwrap(),
        Some(MessageStatus::Sent)
    );
}

#[tokio::test]
async fn test_closed_pool_yields_exception_report_not_panic() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    env.pool.close().await;

    let report = env.pipeline.try_send(1, id).await;
    assert!(!report.ok);
    assert!(report.error.as_deref().unwrap().starts_with("exception"));
    assert_eq!(env.transport.calls(), 0);

    // The worker survives a store it can no longer reach
    let batch = env.worker.run_batch(10).await;
    assert_eq!(batch.processed, 0);
}

// =============================================================================
// Template rendering through the pipeline
// =============================================================================

#[tokio::test]
async fn test_rendered_template_flows_through_to_transport() {
    use canal_dispatch::template::{render_structured, Button, RenderOptions};

    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;

    let payload = json!({
        "client": { "name": "Ada" },
        "order": { "id": 99, "total": 12.5 }
    });
    let buttons = vec![
        Button::web_url("View order {{ order.id }}", "https://shop.example/orders/{{ order.id }}"),
        Button::web_url("Broken", "{{ missing.url }}"),
        Button::postback("Confirm", "CONFIRM_{{ order.id }}"),
    ];
    let rendered = render_structured(
        "Hi {{ client.name }}, order {{ order.id }} totals {{ order.total | number(2) }}",
        &buttons,
        &payload,
        RenderOptions::default(),
    )
    .unwrap();

    assert_eq!(rendered.text, "Hi Ada, order 99 totals 12.50");
    // Invalid URL dropped during validation
    assert_eq!(rendered.buttons.len(), 2);

    let id = env
        .store
        .enqueue(
            EnqueueRequest::new(1, Channel::Messenger, rendered.text.clone())
                .thread("t-1")
                .metadata(json!({ "buttons": rendered.buttons })),
        )
        .await
        .unwrap();

    let report = env.pipeline.try_send(1, id).await;
    assert!(report.ok);

    let sent = env.transport.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(sent.text, "Hi Ada, order 99 totals 12.50");
    assert_eq!(sent.buttons.len(), 2);
    assert_eq!(sent.buttons[0].title, "View order 99");
    assert_eq!(
        sent.buttons[0].url.as_deref(),
        Some("https://shop.example/orders/99")
    );
    assert_eq!(sent.buttons[1].payload.as_deref(), Some("CONFIRM_99"));
}

// =============================================================================
// Retry policy end-to-end
// =============================================================================

#[tokio::test]
async fn test_retry_until_dead() {
    let env = create_test_environment().await;
    seed_settings_credentials(&env.pool, 1).await;
    env.transport.set_provider_error(500, "always down");

    let id = env
        .store
        .enqueue(EnqueueRequest::new(1, Channel::Messenger, "hi").thread("t-1"))
        .await
        .unwrap();

    let policy = RetryPolicy::new(canal_dispatch::config::RetryConfig {
        initial_delay_seconds: 0,
        max_delay_seconds: 0,
        multiplier: 1.0,
        jitter_factor: 0.0,
        max_attempts: 3,
    });

    let mut dead = false;
    for _ in 0..5 {
        let report = env.pipeline.try_send(1, id).await;
        assert!(!report.ok);
        match policy.schedule(&env.store, 1, id).await.unwrap() {
            ScheduleOutcome::Scheduled { .. } => {}
            ScheduleOutcome::Dead => {
                dead = true;
                break;
            }
        }
    }

    assert!(dead, "message should hit the attempt cap");
    assert_eq!(
        env.store.status(1, id).await.unwrap(),
        Some(MessageStatus::Dead)
    );
}
