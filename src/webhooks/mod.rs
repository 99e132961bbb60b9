//! Webhook dispatcher
//!
//! Event matching, payload signing, and the delivery worker. Subscription
//! filters use intersection semantics (every configured filter must pass);
//! failing endpoints suspend automatically after five consecutive failures
//! and reinstate on a qualifying success.

pub mod delivery;
pub mod dispatcher;
pub mod signature;

pub use delivery::DeliveryProcessor;
pub use dispatcher::WebhookDispatcher;
pub use signature::WebhookSigner;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::domain::{DomainEvent, Webhook};

/// Reserved request headers custom headers may never override.
pub const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "user-agent",
    "x-webhook-event",
    "x-webhook-timestamp",
    "x-webhook-signature",
];

pub const USER_AGENT: &str = "CV-Enhancer-Webhook/1.0";

/// Does this webhook subscribe to the event, with all filters passing?
pub fn matches(webhook: &Webhook, event: &DomainEvent) -> bool {
    if webhook.user_id != event.user_id {
        return false;
    }
    if !webhook.events.iter().any(|e| e == event.event_type.as_str()) {
        return false;
    }

    let filters = &webhook.filters;

    if !filters.job_types.is_empty() && !filters.job_types.iter().any(|t| t == &event.job_type) {
        return false;
    }

    if let Some(score) = event.score {
        if filters.min_score.is_some_and(|min| score < min) {
            return false;
        }
        if filters.max_score.is_some_and(|max| score > max) {
            return false;
        }
    }

    if let Some(cv_id) = &event.cv_id {
        if !filters.cv_ids.is_empty() && !filters.cv_ids.iter().any(|id| id == cv_id) {
            return false;
        }
    }

    true
}

/// Wire envelope: `{event, timestamp, data}` with the §6 minimum fields,
/// event-specific data merged in without overriding them.
pub fn build_payload(event: &DomainEvent, timestamp: DateTime<Utc>) -> Value {
    let mut data = json!({
        "jobId": event.job_id,
        "userId": event.user_id,
        "jobType": event.job_type,
    });
    if let Some(cv_id) = &event.cv_id {
        data["cvId"] = json!(cv_id);
    }
    if let Some(score) = event.score {
        data["score"] = json!(score);
    }
    if let Value::Object(extra) = &event.data {
        let base = data.as_object_mut().expect("data envelope is an object");
        for (key, value) in extra {
            base.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    json!({
        "event": event.event_type.as_str(),
        "timestamp": timestamp.to_rfc3339(),
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;

    fn event(score: Option<f64>, cv_id: Option<&str>) -> DomainEvent {
        DomainEvent {
            event_type: EventType::AtsCompleted,
            job_id: "job-1".to_string(),
            user_id: "user-1".to_string(),
            job_type: "ats".to_string(),
            cv_id: cv_id.map(str::to_string),
            score,
            data: json!({"overallScore": 70}),
        }
    }

    fn subscribed_webhook() -> Webhook {
        Webhook::new(
            "user-1",
            "https://example.com/hook",
            vec!["ats.completed".to_string()],
        )
    }

    #[test]
    fn test_event_subscription_required() {
        let webhook = subscribed_webhook();
        assert!(matches(&webhook, &event(None, None)));

        let mut other = subscribed_webhook();
        other.events = vec!["parse.completed".to_string()];
        assert!(!matches(&other, &event(None, None)));
    }

    #[test]
    fn test_cross_user_never_matches() {
        let mut webhook = subscribed_webhook();
        webhook.user_id = "user-2".to_string();
        assert!(!matches(&webhook, &event(None, None)));
    }

    #[test]
    fn test_score_filters_bound_when_present() {
        let mut webhook = subscribed_webhook();
        webhook.filters.min_score = Some(50.0);
        webhook.filters.max_score = Some(90.0);

        assert!(matches(&webhook, &event(Some(70.0), None)));
        assert!(!matches(&webhook, &event(Some(40.0), None)));
        assert!(!matches(&webhook, &event(Some(95.0), None)));
        // No score on the event: bounds do not apply
        assert!(matches(&webhook, &event(None, None)));
    }

    #[test]
    fn test_cv_id_filter_intersects() {
        let mut webhook = subscribed_webhook();
        webhook.filters.cv_ids = vec!["cv-1".to_string()];

        assert!(matches(&webhook, &event(None, Some("cv-1"))));
        assert!(!matches(&webhook, &event(None, Some("cv-2"))));
        assert!(matches(&webhook, &event(None, None)));
    }

    #[test]
    fn test_job_type_filter() {
        let mut webhook = subscribed_webhook();
        webhook.filters.job_types = vec!["generation".to_string()];
        assert!(!matches(&webhook, &event(None, None)));

        webhook.filters.job_types = vec!["ats".to_string()];
        assert!(matches(&webhook, &event(None, None)));
    }

    #[test]
    fn test_payload_envelope_shape() {
        let now = Utc::now();
        let payload = build_payload(&event(Some(70.0), Some("cv-1")), now);

        assert_eq!(payload["event"], "ats.completed");
        assert_eq!(payload["timestamp"], now.to_rfc3339());
        assert_eq!(payload["data"]["jobId"], "job-1");
        assert_eq!(payload["data"]["userId"], "user-1");
        assert_eq!(payload["data"]["jobType"], "ats");
        assert_eq!(payload["data"]["cvId"], "cv-1");
        assert_eq!(payload["data"]["score"], 70.0);
        // Event-specific data merged without clobbering the envelope fields
        assert_eq!(payload["data"]["overallScore"], 70);
    }
}
