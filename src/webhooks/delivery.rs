//! Delivery worker
//!
//! The processor behind the `webhook_delivery` queue. Each job run performs
//! exactly one HTTP attempt for its delivery row; retries are scheduled as
//! fresh delayed jobs against the same row, so the row accumulates the full
//! attempt chain while the engine sees each attempt complete normally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::dispatcher::WebhookDispatcher;
use super::signature::WebhookSigner;
use super::{RESERVED_HEADERS, USER_AGENT};
use crate::domain::webhook::{REINSTATE_SUCCESS_RATE, SUSPENSION_THRESHOLD};
use crate::domain::{
    DeliveryAttempt, DeliveryStatus, EventType, JobType, Webhook, WebhookStatus,
};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{JobContext, JobProcessor, ProcessorOutcome};
use crate::store::CoreStore;

const RESPONSE_SNIPPET_LEN: usize = 1_000;

pub struct DeliveryProcessor {
    store: CoreStore,
    dispatcher: Arc<WebhookDispatcher>,
    client: reqwest::Client,
}

impl DeliveryProcessor {
    pub fn new(store: CoreStore, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            // Per-request timeouts come from each webhook's configuration
            client: reqwest::Client::new(),
        }
    }

    async fn attempt_delivery(
        &self,
        webhook: &Webhook,
        payload: &Value,
        event_type: &str,
    ) -> AttemptResult {
        let timestamp_ms = Utc::now().timestamp_millis();
        let payload_json = payload.to_string();
        let signature = WebhookSigner::new(&webhook.secret).sign(timestamp_ms, &payload_json);

        let mut request = self
            .client
            .post(&webhook.url)
            .timeout(Duration::from_millis(webhook.timeout_ms))
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("X-Webhook-Event", event_type)
            .header("X-Webhook-Timestamp", timestamp_ms.to_string())
            .header("X-Webhook-Signature", &signature);

        // Custom headers merge last but can never shadow the reserved set
        for (name, value) in &webhook.headers {
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            request = request.header(name, value);
        }

        let started = Instant::now();
        match request.body(payload_json).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                AttemptResult {
                    status_code: Some(status_code),
                    response: Some(truncate(&body, RESPONSE_SNIPPET_LEN)),
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    signature,
                }
            }
            Err(err) => {
                let error = if err.is_timeout() {
                    format!("timeout after {}ms", webhook.timeout_ms)
                } else {
                    err.to_string()
                };
                AttemptResult {
                    status_code: None,
                    response: None,
                    error: Some(error),
                    duration_ms: started.elapsed().as_millis() as u64,
                    signature,
                }
            }
        }
    }
}

struct AttemptResult {
    status_code: Option<u16>,
    response: Option<String>,
    error: Option<String>,
    duration_ms: u64,
    signature: String,
}

impl AttemptResult {
    fn succeeded(&self) -> bool {
        self.status_code.is_some_and(|code| (200..300).contains(&code))
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[async_trait]
impl JobProcessor for DeliveryProcessor {
    fn job_type(&self) -> JobType {
        JobType::WebhookDelivery
    }

    fn total_steps(&self, _data: &Value) -> u32 {
        1
    }

    async fn run(&self, ctx: &JobContext, data: Value) -> CoreResult<ProcessorOutcome> {
        let delivery_id = data
            .get("delivery_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::new(ErrorCode::ValidationError, "missing delivery_id").retryable(false)
            })?;

        let delivery = self
            .store
            .get_delivery(delivery_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::WebhookDeliveryFailed, "delivery row missing"))?;

        // At-least-once: a re-delivered job after success records nothing new
        if delivery.status == DeliveryStatus::Success {
            return Ok(ProcessorOutcome::with_result(json!({
                "alreadyDelivered": true,
            })));
        }

        let Some(webhook) = self.store.get_webhook(&delivery.webhook_id)? else {
            self.store.update_delivery_with(delivery_id, |delivery| {
                delivery.status = DeliveryStatus::Failed;
            })?;
            return Ok(ProcessorOutcome::with_result(json!({
                "delivered": false,
                "reason": "webhook deleted",
            })));
        };

        ctx.checkpoint(0, "deliver")?;

        let attempt_number = delivery.attempts.len() as u32 + 1;
        let result = self
            .attempt_delivery(&webhook, &delivery.payload, &delivery.event_type)
            .await;
        let succeeded = result.succeeded();
        let now = Utc::now();

        let attempt = DeliveryAttempt {
            attempt_number,
            timestamp: now,
            status_code: result.status_code,
            response: result.response.clone(),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
        };

        let policy = webhook.retry_policy.clone();
        let retry_delay_ms = policy.delay_for_attempt(attempt_number);
        let retries_remain = attempt_number <= policy.max_retries;

        let updated_delivery = self.store.update_delivery_with(delivery_id, |delivery| {
            delivery.attempts.push(attempt.clone());
            if succeeded {
                delivery.status = DeliveryStatus::Success;
                delivery.delivered_at = Some(now);
                delivery.signature = Some(result.signature.clone());
                delivery.next_retry_at = None;
            } else if retries_remain {
                delivery.status = DeliveryStatus::Retrying;
                delivery.next_retry_at =
                    Some(now + chrono::Duration::milliseconds(retry_delay_ms as i64));
            } else {
                delivery.status = DeliveryStatus::Exhausted;
                delivery.next_retry_at = None;
            }
        })?;

        let is_test = delivery.event_type == EventType::WebhookTest.as_str();
        let updated_webhook = self.store.update_webhook_with(&webhook.id, |webhook| {
            if succeeded {
                webhook.stats.record_success(now);
                let reinstate = webhook.status == WebhookStatus::Suspended
                    && (is_test || webhook.stats.success_rate() >= REINSTATE_SUCCESS_RATE);
                if reinstate {
                    webhook.status = WebhookStatus::Active;
                }
            } else {
                webhook.stats.record_failure(now);
                if webhook.stats.consecutive_failures >= SUSPENSION_THRESHOLD
                    && webhook.status == WebhookStatus::Active
                {
                    webhook.status = WebhookStatus::Suspended;
                }
            }
        })?;

        if succeeded {
            info!(
                delivery_id,
                webhook_id = %webhook.id,
                attempt = attempt_number,
                status = attempt.status_code,
                "Webhook delivered"
            );
        } else {
            warn!(
                delivery_id,
                webhook_id = %webhook.id,
                attempt = attempt_number,
                status = ?attempt.status_code,
                error = ?attempt.error,
                suspended = updated_webhook.status == WebhookStatus::Suspended,
                "Webhook delivery attempt failed"
            );

            // Schedule the next attempt unless the endpoint just got suspended
            if updated_delivery.status == DeliveryStatus::Retrying {
                if updated_webhook.status == WebhookStatus::Active || is_test {
                    self.dispatcher.requeue_delivery(
                        delivery_id,
                        ctx.user_id(),
                        retry_delay_ms,
                    )?;
                } else {
                    self.store.update_delivery_with(delivery_id, |delivery| {
                        delivery.status = DeliveryStatus::Failed;
                        delivery.next_retry_at = None;
                    })?;
                }
            }
        }

        Ok(ProcessorOutcome::with_result(json!({
            "delivered": succeeded,
            "attemptNumber": attempt_number,
            "statusCode": attempt.status_code,
        })))
    }
}
