//! Webhook management
//!
//! CRUD plus test delivery, stats, delivery history, and manual retry. The
//! signing secret is generated server-side and revealed exactly once, in the
//! create response; every other read masks it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::domain::webhook::RetryPolicy;
use crate::domain::{
    DeliveryStatus, Webhook, WebhookDelivery, WebhookFilters, WebhookStatus,
};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::store::CoreStore;
use crate::webhooks::WebhookDispatcher;

#[derive(Debug, Clone, Default)]
pub struct CreateWebhook {
    pub url: String,
    pub events: Vec<String>,
    pub filters: Option<WebhookFilters>,
    pub headers: Option<BTreeMap<String, String>>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWebhook {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub filters: Option<WebhookFilters>,
    pub headers: Option<BTreeMap<String, String>>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    /// `active` also clears an automatic suspension.
    pub status: Option<WebhookStatus>,
}

/// Creation response: the only place the secret appears in clear.
#[derive(Debug)]
pub struct CreatedWebhook {
    pub webhook: Webhook,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct WebhookStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub last_delivery_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_success_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone)]
pub struct WebhookService {
    store: CoreStore,
    dispatcher: Arc<WebhookDispatcher>,
}

impl WebhookService {
    pub fn new(store: CoreStore, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn create(&self, user_id: &str, params: CreateWebhook) -> CoreResult<CreatedWebhook> {
        super::check_user_can_start(&self.store, user_id, None)?;

        let mut webhook = Webhook::new(user_id, params.url, params.events);
        if let Some(filters) = params.filters {
            webhook.filters = filters;
        }
        if let Some(headers) = params.headers {
            webhook.headers = headers;
        }
        if let Some(retry_policy) = params.retry_policy {
            webhook.retry_policy = retry_policy;
        }
        if let Some(timeout_ms) = params.timeout_ms {
            webhook.timeout_ms = timeout_ms;
        }
        webhook.validate()?;

        self.store.put_webhook(&webhook)?;
        info!(webhook_id = %webhook.id, user_id, "Webhook created");

        let secret = webhook.secret.clone();
        Ok(CreatedWebhook {
            webhook: mask_secret(webhook),
            secret,
        })
    }

    pub fn update(&self, user_id: &str, webhook_id: &str, params: UpdateWebhook) -> CoreResult<Webhook> {
        let apply = |webhook: &mut Webhook| {
            if let Some(url) = &params.url {
                webhook.url = url.clone();
            }
            if let Some(events) = &params.events {
                webhook.events = events.clone();
            }
            if let Some(filters) = &params.filters {
                webhook.filters = filters.clone();
            }
            if let Some(headers) = &params.headers {
                webhook.headers = headers.clone();
            }
            if let Some(retry_policy) = &params.retry_policy {
                webhook.retry_policy = retry_policy.clone();
            }
            if let Some(timeout_ms) = params.timeout_ms {
                webhook.timeout_ms = timeout_ms;
            }
            if let Some(status) = params.status {
                webhook.status = status;
                // A manual activate resets the circuit breaker
                if status == WebhookStatus::Active {
                    webhook.stats.consecutive_failures = 0;
                }
            }
        };

        // Validate on a copy before anything is persisted
        let mut candidate = self.get_owned(user_id, webhook_id)?;
        apply(&mut candidate);
        candidate.validate()?;

        let updated = self.store.update_webhook_with(webhook_id, apply)?;
        Ok(mask_secret(updated))
    }

    pub fn delete(&self, user_id: &str, webhook_id: &str) -> CoreResult<()> {
        self.get_owned(user_id, webhook_id)?;
        self.store.delete_webhook(webhook_id)?;
        info!(webhook_id, user_id, "Webhook deleted");
        Ok(())
    }

    pub fn list(&self, user_id: &str) -> CoreResult<Vec<Webhook>> {
        Ok(self
            .store
            .list_webhooks_by_user(user_id)?
            .into_iter()
            .map(mask_secret)
            .collect())
    }

    pub fn get(&self, user_id: &str, webhook_id: &str) -> CoreResult<Webhook> {
        Ok(mask_secret(self.get_owned(user_id, webhook_id)?))
    }

    /// Queue a `webhook.test` delivery.
    pub fn test(&self, user_id: &str, webhook_id: &str) -> CoreResult<String> {
        let webhook = self.get_owned(user_id, webhook_id)?;
        self.dispatcher.send_test(&webhook)
    }

    pub fn stats(&self, user_id: &str, webhook_id: &str) -> CoreResult<WebhookStats> {
        let webhook = self.get_owned(user_id, webhook_id)?;
        let stats = &webhook.stats;
        Ok(WebhookStats {
            total: stats.total,
            success: stats.success,
            failure: stats.failure,
            consecutive_failures: stats.consecutive_failures,
            success_rate: stats.success_rate(),
            last_delivery_at: stats.last_delivery_at,
            last_success_at: stats.last_success_at,
        })
    }

    pub fn deliveries(
        &self,
        user_id: &str,
        webhook_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<WebhookDelivery>> {
        self.get_owned(user_id, webhook_id)?;
        Ok(self.store.list_deliveries(webhook_id, limit)?)
    }

    /// Manually re-queue a delivery that did not succeed.
    pub fn retry_delivery(&self, user_id: &str, delivery_id: &str) -> CoreResult<()> {
        let delivery = self
            .store
            .get_delivery(delivery_id)?
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| CoreError::new(ErrorCode::NotFound, "delivery not found"))?;

        if delivery.status == DeliveryStatus::Success {
            return Err(CoreError::new(
                ErrorCode::Conflict,
                "delivery already succeeded",
            ));
        }

        self.dispatcher
            .requeue_delivery(delivery_id, user_id, 0)
    }

    fn get_owned(&self, user_id: &str, webhook_id: &str) -> CoreResult<Webhook> {
        self.store
            .get_webhook(webhook_id)?
            .filter(|webhook| webhook.is_owned_by(user_id))
            .ok_or_else(|| CoreError::new(ErrorCode::WebhookNotFound, "webhook not found"))
    }
}

fn mask_secret(mut webhook: Webhook) -> Webhook {
    webhook.secret = String::new();
    webhook
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueuesConfig;
    use crate::observability::Metrics;
    use crate::queue::{JobEngine, QueueStore};
    use tempfile::TempDir;

    fn setup() -> (WebhookService, CoreStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CoreStore::open(temp_dir.path().join("docs")).unwrap();
        let queue = Arc::new(QueueStore::open(temp_dir.path().join("queue")).unwrap());
        let engine = Arc::new(JobEngine::new(
            store.clone(),
            queue,
            QueuesConfig::default(),
            Arc::new(Metrics::new()),
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(store.clone(), engine));
        (WebhookService::new(store.clone(), dispatcher), store, temp_dir)
    }

    fn create_params() -> CreateWebhook {
        CreateWebhook {
            url: "https://example.com/hook".to_string(),
            events: vec!["parse.completed".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_secret_revealed_only_on_create() {
        let (service, _store, _temp) = setup();
        let created = service.create("user-1", create_params()).unwrap();

        assert_eq!(created.secret.len(), 64);
        assert!(created.webhook.secret.is_empty());

        let listed = service.list("user-1").unwrap();
        assert!(listed[0].secret.is_empty());
        let fetched = service.get("user-1", &listed[0].id).unwrap();
        assert!(fetched.secret.is_empty());
    }

    #[test]
    fn test_create_validates() {
        let (service, _store, _temp) = setup();
        let mut params = create_params();
        params.events = vec!["nonsense.event".to_string()];

        let err = service.create("user-1", params).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_manual_activate_clears_suspension() {
        let (service, store, _temp) = setup();
        let created = service.create("user-1", create_params()).unwrap();
        let webhook_id = created.webhook.id.clone();

        store
            .update_webhook_with(&webhook_id, |webhook| {
                webhook.status = WebhookStatus::Suspended;
                webhook.stats.consecutive_failures = 7;
            })
            .unwrap();

        let updated = service
            .update(
                "user-1",
                &webhook_id,
                UpdateWebhook {
                    status: Some(WebhookStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, WebhookStatus::Active);
        assert_eq!(updated.stats.consecutive_failures, 0);
    }

    #[test]
    fn test_foreign_webhook_hidden() {
        let (service, _store, _temp) = setup();
        let created = service.create("user-1", create_params()).unwrap();

        let err = service.get("user-2", &created.webhook.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::WebhookNotFound);
        let err = service.delete("user-2", &created.webhook.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::WebhookNotFound);
    }

    #[test]
    fn test_retry_delivery_rejects_successful() {
        let (service, store, _temp) = setup();
        let created = service.create("user-1", create_params()).unwrap();

        let mut delivery = crate::domain::WebhookDelivery::new(
            &created.webhook.id,
            "user-1",
            "parse.completed",
            serde_json::json!({}),
        );
        delivery.status = DeliveryStatus::Success;
        store.put_delivery(&delivery).unwrap();

        let err = service.retry_delivery("user-1", &delivery.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }
}
