//! Webhook delivery tests
//!
//! A local axum server plays the subscriber endpoint with a scripted status
//! sequence; the real delivery workers run against it. Covers the retry law,
//! circuit suspension, signature headers, and delivery idempotency.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use cvforge::config::{Config, StorageProvider};
use cvforge::domain::webhook::RetryPolicy;
use cvforge::domain::{DeliveryStatus, DomainEvent, EventType, WebhookStatus};
use cvforge::runtime::Core;
use cvforge::services::webhooks::CreateWebhook;
use cvforge::webhooks::signature::WebhookSigner;
use tempfile::TempDir;
use tokio::sync::watch;

const USER: &str = "user-hooks";

#[derive(Debug, Clone)]
struct CapturedRequest {
    headers: HeaderMap,
    body: Vec<u8>,
}

#[derive(Clone)]
struct EndpointState {
    /// Status codes to serve, in order; the last one repeats once drained.
    statuses: Arc<Mutex<VecDeque<u16>>>,
    fallback: u16,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl EndpointState {
    fn new(statuses: Vec<u16>, fallback: u16) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(statuses.into_iter().collect())),
            fallback,
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn request_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }
}

async fn receive(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.captured.lock().unwrap().push(CapturedRequest {
        headers,
        body: body.to_vec(),
    });
    let status = state
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(state.fallback);
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

async fn start_endpoint(state: EndpointState) -> SocketAddr {
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestContext {
    core: Core,
    shutdown: watch::Sender<bool>,
    _temp: TempDir,
}

impl TestContext {
    async fn setup() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.runtime.data_dir = temp.path().to_path_buf();
        config.storage.provider = StorageProvider::Memory;

        let core = Core::build(config).unwrap();
        let (shutdown, rx) = watch::channel(false);
        core.start_workers(rx);

        Self {
            core,
            shutdown,
            _temp: temp,
        }
    }

    fn event(&self) -> DomainEvent {
        DomainEvent {
            event_type: EventType::GenerationCompleted,
            job_id: format!("job-{}", uuid::Uuid::now_v7()),
            user_id: USER.to_string(),
            job_type: "generation".to_string(),
            cv_id: Some("cv-1".to_string()),
            score: None,
            data: serde_json::json!({"fileName": "cv.pdf"}),
        }
    }

    async fn wait_delivery(
        &self,
        delivery_id: &str,
        expected: DeliveryStatus,
        max: Duration,
    ) -> cvforge::domain::WebhookDelivery {
        let deadline = tokio::time::Instant::now() + max;
        loop {
            let delivery = self
                .core
                .store
                .get_delivery(delivery_id)
                .unwrap()
                .expect("delivery row exists");
            if delivery.status == expected {
                return delivery;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "delivery {delivery_id} still {:?}, wanted {expected:?}",
                    delivery.status
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[tokio::test]
async fn test_delivery_signature_and_headers() {
    let ctx = TestContext::setup().await;
    let endpoint = EndpointState::new(vec![], 200);
    let addr = start_endpoint(endpoint.clone()).await;

    let created = ctx
        .core
        .webhooks
        .create(
            USER,
            CreateWebhook {
                url: format!("http://{addr}/hook"),
                events: vec!["generation.completed".to_string()],
                headers: Some(
                    [
                        ("X-Custom-Tag".to_string(), "cvforge-test".to_string()),
                        // Attempted override of a reserved header is dropped
                        ("X-Webhook-Event".to_string(), "spoofed".to_string()),
                    ]
                    .into(),
                ),
                ..Default::default()
            },
        )
        .unwrap();

    let delivery_ids = ctx.core.dispatcher.dispatch(&ctx.event()).unwrap();
    assert_eq!(delivery_ids.len(), 1);
    let delivery = ctx
        .wait_delivery(&delivery_ids[0], DeliveryStatus::Success, Duration::from_secs(10))
        .await;

    assert!(delivery.delivered_at.is_some());
    assert_eq!(delivery.attempts.len(), 1);
    assert!((200..300).contains(&delivery.attempts[0].status_code.unwrap()));

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    assert_eq!(
        request.headers.get("user-agent").unwrap(),
        "CV-Enhancer-Webhook/1.0"
    );
    assert_eq!(
        request.headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(
        request.headers.get("x-webhook-event").unwrap(),
        "generation.completed"
    );
    assert_eq!(request.headers.get("x-custom-tag").unwrap(), "cvforge-test");

    // Signature covers "{timestamp}.{payload}" with the revealed secret
    let timestamp: i64 = request
        .headers
        .get("x-webhook-timestamp")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let signature = request
        .headers
        .get("x-webhook-signature")
        .unwrap()
        .to_str()
        .unwrap();
    let body = std::str::from_utf8(&request.body).unwrap();
    assert!(WebhookSigner::new(&created.secret).verify(timestamp, body, signature));

    // Envelope shape
    let payload: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(payload["event"], "generation.completed");
    assert_eq!(payload["data"]["userId"], USER);
    assert_eq!(payload["data"]["jobType"], "generation");
    assert_eq!(payload["data"]["cvId"], "cv-1");
}

#[tokio::test]
async fn test_retry_until_success() {
    let ctx = TestContext::setup().await;
    // Three failures, then success
    let endpoint = EndpointState::new(vec![500, 500, 500], 200);
    let addr = start_endpoint(endpoint.clone()).await;

    let created = ctx
        .core
        .webhooks
        .create(
            USER,
            CreateWebhook {
                url: format!("http://{addr}/hook"),
                events: vec!["generation.completed".to_string()],
                retry_policy: Some(RetryPolicy {
                    max_retries: 3,
                    retry_delay_ms: 1_000,
                    backoff_multiplier: 2.0,
                }),
                ..Default::default()
            },
        )
        .unwrap();

    let delivery_ids = ctx.core.dispatcher.dispatch(&ctx.event()).unwrap();
    let delivery = ctx
        .wait_delivery(&delivery_ids[0], DeliveryStatus::Success, Duration::from_secs(30))
        .await;

    assert_eq!(delivery.attempts.len(), 4);
    assert_eq!(delivery.attempts[3].status_code, Some(200));
    for window in delivery.attempts.windows(2) {
        assert!(window[0].timestamp < window[1].timestamp);
    }
    // Backoff law: gaps grow monotonically (1s, 2s, 4s nominal)
    let gap1 = delivery.attempts[1].timestamp - delivery.attempts[0].timestamp;
    let gap2 = delivery.attempts[2].timestamp - delivery.attempts[1].timestamp;
    let gap3 = delivery.attempts[3].timestamp - delivery.attempts[2].timestamp;
    assert!(gap2 > gap1);
    assert!(gap3 > gap2);

    let stats = ctx.core.webhooks.stats(USER, &created.webhook.id).unwrap();
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.total, 4);
    assert_eq!(stats.success + stats.failure, stats.total);
}

#[tokio::test]
async fn test_circuit_suspension_blocks_new_deliveries() {
    let ctx = TestContext::setup().await;
    let endpoint = EndpointState::new(vec![], 500);
    let addr = start_endpoint(endpoint.clone()).await;

    let created = ctx
        .core
        .webhooks
        .create(
            USER,
            CreateWebhook {
                url: format!("http://{addr}/hook"),
                events: vec!["generation.completed".to_string()],
                // One attempt per delivery keeps the failure count exact
                retry_policy: Some(RetryPolicy {
                    max_retries: 0,
                    retry_delay_ms: 1_000,
                    backoff_multiplier: 1.0,
                }),
                ..Default::default()
            },
        )
        .unwrap();
    let webhook_id = created.webhook.id.clone();

    for round in 1..=5 {
        let delivery_ids = ctx.core.dispatcher.dispatch(&ctx.event()).unwrap();
        assert_eq!(delivery_ids.len(), 1, "round {round} should deliver");
        ctx.wait_delivery(&delivery_ids[0], DeliveryStatus::Exhausted, Duration::from_secs(10))
            .await;
    }

    let webhook = ctx.core.webhooks.get(USER, &webhook_id).unwrap();
    assert_eq!(webhook.status, WebhookStatus::Suspended);
    assert!(webhook.stats.consecutive_failures >= 5);

    // Further events create no delivery rows for the suspended webhook
    let delivery_ids = ctx.core.dispatcher.dispatch(&ctx.event()).unwrap();
    assert!(delivery_ids.is_empty());
    assert_eq!(
        ctx.core.webhooks.deliveries(USER, &webhook_id, 100).unwrap().len(),
        5
    );
}

#[tokio::test]
async fn test_successful_test_delivery_reinstates() {
    let ctx = TestContext::setup().await;
    let endpoint = EndpointState::new(vec![], 200);
    let addr = start_endpoint(endpoint.clone()).await;

    let created = ctx
        .core
        .webhooks
        .create(
            USER,
            CreateWebhook {
                url: format!("http://{addr}/hook"),
                events: vec!["generation.completed".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    let webhook_id = created.webhook.id.clone();

    ctx.core
        .store
        .update_webhook_with(&webhook_id, |webhook| {
            webhook.status = WebhookStatus::Suspended;
            webhook.stats.consecutive_failures = 5;
        })
        .unwrap();

    let delivery_id = ctx.core.webhooks.test(USER, &webhook_id).unwrap();
    ctx.wait_delivery(&delivery_id, DeliveryStatus::Success, Duration::from_secs(10))
        .await;

    let webhook = ctx.core.webhooks.get(USER, &webhook_id).unwrap();
    assert_eq!(webhook.status, WebhookStatus::Active);
    assert_eq!(webhook.stats.consecutive_failures, 0);
}

#[tokio::test]
async fn test_redelivery_after_success_is_idempotent() {
    let ctx = TestContext::setup().await;
    let endpoint = EndpointState::new(vec![], 200);
    let addr = start_endpoint(endpoint.clone()).await;

    ctx.core
        .webhooks
        .create(
            USER,
            CreateWebhook {
                url: format!("http://{addr}/hook"),
                events: vec!["generation.completed".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

    let delivery_ids = ctx.core.dispatcher.dispatch(&ctx.event()).unwrap();
    ctx.wait_delivery(&delivery_ids[0], DeliveryStatus::Success, Duration::from_secs(10))
        .await;
    assert_eq!(endpoint.request_count(), 1);

    // Force a duplicate delivery job for the same (successful) delivery row
    ctx.core
        .dispatcher
        .requeue_delivery(&delivery_ids[0], USER, 0)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let delivery = ctx
        .core
        .store
        .get_delivery(&delivery_ids[0])
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempts.len(), 1, "no new attempt after success");
    assert_eq!(endpoint.request_count(), 1, "no second HTTP call");
}
