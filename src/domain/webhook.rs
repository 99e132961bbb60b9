use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Consecutive failures after which a webhook is auto-suspended.
pub const SUSPENSION_THRESHOLD: u32 = 5;
/// Success rate at or above which a successful delivery clears suspension.
pub const REINSTATE_SUCCESS_RATE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Active,
    Inactive,
    Suspended,
}

/// Per-webhook retry behavior, bounded at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub const MAX_RETRIES_CAP: u32 = 6;
    pub const MIN_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 300_000;

    /// Delay before attempt `attempt_number + 1`, following
    /// `clamp(base * multiplier^(n-1), base, max)`.
    pub fn delay_for_attempt(&self, attempt_number: u32) -> u64 {
        let exponent = attempt_number.saturating_sub(1);
        let raw = self.retry_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        (raw as u64).clamp(self.retry_delay_ms, Self::MAX_DELAY_MS)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_retries > Self::MAX_RETRIES_CAP {
            return Err(CoreError::validation(format!(
                "retry_policy.max_retries must be <= {}",
                Self::MAX_RETRIES_CAP
            )));
        }
        if !(Self::MIN_DELAY_MS..=Self::MAX_DELAY_MS).contains(&self.retry_delay_ms) {
            return Err(CoreError::validation(
                "retry_policy.retry_delay_ms must be within 1000..=300000",
            ));
        }
        if !(1.0..=8.0).contains(&self.backoff_multiplier) {
            return Err(CoreError::validation(
                "retry_policy.backoff_multiplier must be within 1..=8",
            ));
        }
        Ok(())
    }
}

/// Intersection-semantics event filters: every configured filter must pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookFilters {
    pub job_types: Vec<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub cv_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub consecutive_failures: u32,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl DeliveryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.success as f64 / self.total as f64
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.total += 1;
        self.success += 1;
        self.consecutive_failures = 0;
        self.last_delivery_at = Some(at);
        self.last_success_at = Some(at);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.total += 1;
        self.failure += 1;
        self.consecutive_failures += 1;
        self.last_delivery_at = Some(at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub status: WebhookStatus,
    /// 32 random bytes, hex-encoded. Revealed to the caller only on creation.
    pub secret: String,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub timeout_ms: u64,
    #[serde(default)]
    pub filters: WebhookFilters,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub stats: DeliveryStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Webhook {
    pub const MIN_TIMEOUT_MS: u64 = 5_000;
    pub const MAX_TIMEOUT_MS: u64 = 120_000;

    pub fn new(user_id: impl Into<String>, url: impl Into<String>, events: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            url: url.into(),
            events,
            status: WebhookStatus::Active,
            secret: generate_secret(),
            retry_policy: RetryPolicy::default(),
            timeout_ms: 30_000,
            filters: WebhookFilters::default(),
            headers: BTreeMap::new(),
            stats: DeliveryStats::default(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(CoreError::validation("webhook url must be http or https"));
        }
        if self.events.is_empty() {
            return Err(CoreError::validation("webhook must subscribe to at least one event"));
        }
        for event in &self.events {
            if EventType::parse(event).is_none() {
                return Err(CoreError::validation(format!("unknown event type: {event}")));
            }
        }
        if !(Self::MIN_TIMEOUT_MS..=Self::MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(CoreError::validation(
                "webhook timeout_ms must be within 5000..=120000",
            ));
        }
        self.retry_policy.validate()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Exhausted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    /// Response body, truncated for storage.
    pub response: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Persisted attempt chain for one event transmitted to one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: String,
    pub user_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(
        webhook_id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            webhook_id: webhook_id.into(),
            user_id: user_id.into(),
            event_type: event_type.into(),
            payload,
            status: DeliveryStatus::Pending,
            attempts: Vec::new(),
            next_retry_at: None,
            delivered_at: None,
            signature: None,
            created_at: Utc::now(),
        }
    }
}

/// Event types emitted on the webhook bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    ParseCompleted,
    ParseFailed,
    OptimizeCompleted,
    OptimizeFailed,
    GenerationCompleted,
    GenerationFailed,
    AtsCompleted,
    AtsFailed,
    WebhookTest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ParseCompleted => "parse.completed",
            EventType::ParseFailed => "parse.failed",
            EventType::OptimizeCompleted => "optimize.completed",
            EventType::OptimizeFailed => "optimize.failed",
            EventType::GenerationCompleted => "generation.completed",
            EventType::GenerationFailed => "generation.failed",
            EventType::AtsCompleted => "ats.completed",
            EventType::AtsFailed => "ats.failed",
            EventType::WebhookTest => "webhook.test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parse.completed" => Some(EventType::ParseCompleted),
            "parse.failed" => Some(EventType::ParseFailed),
            "optimize.completed" => Some(EventType::OptimizeCompleted),
            "optimize.failed" => Some(EventType::OptimizeFailed),
            "generation.completed" => Some(EventType::GenerationCompleted),
            "generation.failed" => Some(EventType::GenerationFailed),
            "ats.completed" => Some(EventType::AtsCompleted),
            "ats.failed" => Some(EventType::AtsFailed),
            "webhook.test" => Some(EventType::WebhookTest),
            _ => None,
        }
    }

    pub fn all() -> [EventType; 9] {
        [
            EventType::ParseCompleted,
            EventType::ParseFailed,
            EventType::OptimizeCompleted,
            EventType::OptimizeFailed,
            EventType::GenerationCompleted,
            EventType::GenerationFailed,
            EventType::AtsCompleted,
            EventType::AtsFailed,
            EventType::WebhookTest,
        ]
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event heading for webhook fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub job_id: String,
    pub user_id: String,
    pub job_type: String,
    pub cv_id: Option<String>,
    pub score: Option<f64>,
    /// Event-specific payload merged into the delivery envelope.
    pub data: Value,
}
