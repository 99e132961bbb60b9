//! Event fan-out
//!
//! Matches a domain event against the user's active webhooks, persists one
//! delivery row per match, and enqueues a `webhook_delivery` job per row.
//! Suspended webhooks receive no new deliveries; test deliveries bypass the
//! status gate so a successful test can reinstate a suspended endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

use super::build_payload;
use crate::domain::{DomainEvent, EventType, Webhook, WebhookDelivery, WebhookStatus};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{CreateJobOptions, EventSink, JobEngine};
use crate::store::CoreStore;
use crate::domain::JobType;

#[derive(Clone)]
pub struct WebhookDispatcher {
    store: CoreStore,
    engine: Arc<JobEngine>,
}

impl WebhookDispatcher {
    pub fn new(store: CoreStore, engine: Arc<JobEngine>) -> Self {
        Self { store, engine }
    }

    /// Fan an event out to every matching active webhook. Returns the
    /// delivery ids created.
    pub fn dispatch(&self, event: &DomainEvent) -> CoreResult<Vec<String>> {
        let candidates = self.store.list_active_webhooks(event.event_type.as_str())?;

        let mut delivery_ids = Vec::new();
        for webhook in candidates {
            if !super::matches(&webhook, event) {
                continue;
            }
            let delivery_id = self.enqueue_delivery(&webhook, event)?;
            delivery_ids.push(delivery_id);
        }

        if !delivery_ids.is_empty() {
            info!(
                event = %event.event_type,
                deliveries = delivery_ids.len(),
                "Webhook fan-out"
            );
        }
        Ok(delivery_ids)
    }

    /// Queue a `webhook.test` delivery regardless of suspension, so a
    /// successful test can clear it.
    pub fn send_test(&self, webhook: &Webhook) -> CoreResult<String> {
        if webhook.status == WebhookStatus::Inactive {
            return Err(CoreError::new(
                ErrorCode::ValidationError,
                "webhook is inactive",
            ));
        }

        let event = DomainEvent {
            event_type: EventType::WebhookTest,
            job_id: format!("test-{}", uuid::Uuid::now_v7()),
            user_id: webhook.user_id.clone(),
            job_type: "webhook_test".to_string(),
            cv_id: None,
            score: None,
            data: json!({"test": true}),
        };
        self.enqueue_delivery(webhook, &event)
    }

    fn enqueue_delivery(&self, webhook: &Webhook, event: &DomainEvent) -> CoreResult<String> {
        let payload = build_payload(event, Utc::now());
        let delivery = WebhookDelivery::new(
            &webhook.id,
            &webhook.user_id,
            event.event_type.as_str(),
            payload,
        );
        self.store.put_delivery(&delivery)?;

        self.engine.create(
            JobType::WebhookDelivery,
            &webhook.user_id,
            json!({"delivery_id": delivery.id}),
            CreateJobOptions::default(),
        )?;

        debug!(webhook_id = %webhook.id, delivery_id = %delivery.id, "Delivery queued");
        Ok(delivery.id)
    }

    /// Re-queue a delivery job for an existing (non-successful) delivery.
    pub fn requeue_delivery(&self, delivery_id: &str, user_id: &str, delay_ms: u64) -> CoreResult<()> {
        self.engine.create(
            JobType::WebhookDelivery,
            user_id,
            json!({"delivery_id": delivery_id}),
            CreateJobOptions {
                delay_ms: Some(delay_ms),
                ..Default::default()
            },
        )?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for WebhookDispatcher {
    async fn emit(&self, event: DomainEvent) {
        if let Err(err) = self.dispatch(&event) {
            error!(event = %event.event_type, error = %err, "Webhook dispatch failed");
        }
    }
}
