//! Worker pools
//!
//! One pool per queue, `concurrency` tasks each, sharing a sliding-window
//! rate limiter. A worker leases an envelope, moves the job to processing,
//! runs the matching processor under the queue's wall-clock deadline, and
//! writes the terminal state back through the engine. A separate sweeper
//! reclaims leases whose worker died.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::{RateWindow, backoff_delay};
use super::store::LeasedEnvelope;
use super::{JobContext, JobEngine, ProcessorOutcome, ProcessorRegistry};
use crate::domain::{DomainEvent, EventType, Job, JobStatus, JobType};
use crate::error::{CoreError, ErrorCode};

const IDLE_POLL: Duration = Duration::from_millis(100);
const THROTTLED_POLL: Duration = Duration::from_millis(250);

/// Where terminal events go for webhook fan-out.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: DomainEvent);
}

/// Spawn every queue's worker pool plus the lease sweeper. Workers drain
/// until the shutdown signal flips.
pub fn spawn_workers(
    engine: Arc<JobEngine>,
    registry: Arc<ProcessorRegistry>,
    events: Arc<dyn EventSink>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for job_type in JobType::all() {
        if registry.get(job_type).is_err() {
            warn!(queue = job_type.queue_name(), "No processor registered, queue idle");
            continue;
        }
        let config = engine.queue_config(job_type);
        let rate = Arc::new(Mutex::new(RateWindow::new(config.rate_limit.clone())));

        for worker_id in 0..config.concurrency {
            let engine = engine.clone();
            let registry = registry.clone();
            let events = events.clone();
            let rate = rate.clone();
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                debug!(queue = job_type.queue_name(), worker_id, "Worker started");
                worker_loop(job_type, engine, registry, events, rate, shutdown).await;
                debug!(queue = job_type.queue_name(), worker_id, "Worker stopped");
            }));
        }
    }

    handles.push(tokio::spawn(lease_sweeper(engine, shutdown)));
    handles
}

async fn worker_loop(
    job_type: JobType,
    engine: Arc<JobEngine>,
    registry: Arc<ProcessorRegistry>,
    events: Arc<dyn EventSink>,
    rate: Arc<Mutex<RateWindow>>,
    shutdown: watch::Receiver<bool>,
) {
    let queue_name = job_type.queue_name();

    // Lease slightly beyond the processing deadline so the sweeper never
    // reclaims a job its worker is still finalizing
    let lease_ms = engine.queue_config(job_type).timeout_secs * 1000 + 30_000;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match engine.queue_store().pop_ready(queue_name, lease_ms) {
            Ok(Some(leased)) => {
                // Consume a rate slot only for work that actually runs
                let allowed = rate
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .try_acquire();
                if !allowed {
                    let seq = leased.envelope.seq;
                    if let Err(err) = engine.queue_store().return_lease(
                        queue_name,
                        seq,
                        THROTTLED_POLL.as_millis() as u64,
                    ) {
                        error!(queue = queue_name, seq, error = %err, "Lease return failed");
                    }
                    tokio::time::sleep(THROTTLED_POLL).await;
                    continue;
                }
                process_one(job_type, &engine, &registry, &events, leased).await;
            }
            Ok(None) => tokio::time::sleep(IDLE_POLL).await,
            Err(err) => {
                error!(queue = queue_name, error = %err, "Queue pop failed");
                tokio::time::sleep(THROTTLED_POLL).await;
            }
        }
    }
}

async fn process_one(
    job_type: JobType,
    engine: &Arc<JobEngine>,
    registry: &Arc<ProcessorRegistry>,
    events: &Arc<dyn EventSink>,
    leased: LeasedEnvelope,
) {
    let queue_name = job_type.queue_name();
    let seq = leased.envelope.seq;
    let job_id = leased.envelope.job_id.clone();
    let attempt = leased.envelope.attempt;

    let ack = |engine: &Arc<JobEngine>| {
        if let Err(err) = engine.queue_store().ack(queue_name, seq) {
            error!(job_id = %job_id, error = %err, "Ack failed");
        }
    };

    // Stale envelope (job gone, cancelled while pending, or already terminal)
    let job = match engine.begin_attempt(&job_id, attempt) {
        Ok(job) => job,
        Err(err) => {
            debug!(job_id = %job_id, code = %err.code, "Dropping stale envelope");
            ack(engine);
            return;
        }
    };

    let processor = match registry.get(job_type) {
        Ok(processor) => processor,
        Err(err) => {
            let _ = engine.fail(&job_id, &err, false);
            ack(engine);
            return;
        }
    };

    let data = job.data.clone();
    let total_steps = processor.total_steps(&data);
    let ctx = JobContext::new(job.clone(), total_steps, engine.clone());
    let deadline = Duration::from_secs(engine.queue_config(job_type).timeout_secs);

    info!(job_id = %job_id, queue = queue_name, attempt, "Processing job");

    match tokio::time::timeout(deadline, processor.run(&ctx, data)).await {
        Ok(Ok(outcome)) => {
            if let Err(err) = engine.complete(&job_id, outcome.result.clone()) {
                error!(job_id = %job_id, error = %err, "Failed to record completion");
            }
            ack(engine);
            if let Some(event) = build_event(&job, Some(&outcome), None) {
                events.emit(event).await;
            }
        }
        Ok(Err(err)) if err.code == ErrorCode::JobCancelled => {
            let _ = engine.fail(&job_id, &err, false);
            ack(engine);
            info!(job_id = %job_id, "Job cancelled at checkpoint");
        }
        Ok(Err(err)) => {
            // Unclassified failures get a single safety-net retry
            let budget = if err.code == ErrorCode::UnknownError {
                job.max_retries.min(1)
            } else {
                job.max_retries
            };
            let retries_remain = job.retry_count < budget;
            if err.retryable && retries_remain {
                let _ = engine.fail(&job_id, &err, true);
                let delay = err.retry_after.map(Duration::from_millis).unwrap_or_else(|| {
                    backoff_delay(attempt, &engine.queue_config(job_type).backoff)
                });
                if let Err(requeue_err) =
                    engine
                        .queue_store()
                        .requeue(queue_name, seq, delay.as_millis() as u64)
                {
                    error!(job_id = %job_id, error = %requeue_err, "Requeue failed");
                }
            } else {
                let failed = engine.fail(&job_id, &err, false);
                let _ = engine.queue_store().dead_letter(
                    queue_name,
                    seq,
                    err.code.as_str(),
                    &err.message,
                );
                if failed.map(|j| j.status == JobStatus::Failed).unwrap_or(false) {
                    if let Some(event) = build_event(&job, None, Some(&err)) {
                        events.emit(event).await;
                    }
                }
            }
        }
        Err(_elapsed) => {
            let retries_remain = job.retry_count < job.max_retries;
            let _ = engine.time_out(&job_id, retries_remain);
            if retries_remain {
                let delay = backoff_delay(attempt, &engine.queue_config(job_type).backoff);
                if let Err(err) =
                    engine
                        .queue_store()
                        .requeue(queue_name, seq, delay.as_millis() as u64)
                {
                    error!(job_id = %job_id, error = %err, "Requeue after timeout failed");
                }
            } else {
                let _ = engine.queue_store().dead_letter(
                    queue_name,
                    seq,
                    ErrorCode::JobTimeout.as_str(),
                    "queue deadline exceeded",
                );
                let err = CoreError::new(ErrorCode::JobTimeout, "queue deadline exceeded");
                if let Some(event) = build_event(&job, None, Some(&err)) {
                    events.emit(event).await;
                }
            }
        }
    }
}

/// Reclaims leases whose worker died without acking: the envelope goes back
/// to waiting (or dead-letters once the retry budget is gone).
async fn lease_sweeper(engine: Arc<JobEngine>, shutdown: watch::Receiver<bool>) {
    const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;

        let expired = match engine.queue_store().expired_leases() {
            Ok(expired) => expired,
            Err(err) => {
                error!(error = %err, "Lease sweep failed");
                continue;
            }
        };

        for leased in expired {
            let queue = leased.envelope.queue.clone();
            let job_id = leased.envelope.job_id.clone();
            let seq = leased.envelope.seq;

            let retries_remain = engine
                .get(&job_id)
                .map(|job| job.retry_count < job.max_retries && !job.status.is_terminal())
                .unwrap_or(false);

            warn!(job_id = %job_id, queue = %queue, retries_remain, "Reclaiming expired lease");
            let _ = engine.time_out(&job_id, retries_remain);
            if retries_remain {
                let _ = engine.queue_store().requeue(&queue, seq, 0);
            } else {
                let _ = engine.queue_store().dead_letter(
                    &queue,
                    seq,
                    ErrorCode::JobTimeout.as_str(),
                    "lease expired",
                );
            }
        }
    }
}

/// Terminal event for webhook fan-out. Cancellations and webhook-delivery
/// jobs emit nothing.
fn build_event(
    job: &Job,
    outcome: Option<&ProcessorOutcome>,
    error: Option<&CoreError>,
) -> Option<DomainEvent> {
    let prefix = job.job_type.event_prefix()?;
    let suffix = if error.is_some() { "failed" } else { "completed" };
    let event_type = EventType::parse(&format!("{prefix}.{suffix}"))?;

    let cv_id = outcome
        .and_then(|o| o.cv_id.clone())
        .or_else(|| job.data.get("cv_id").and_then(Value::as_str).map(str::to_string));
    let score = outcome.and_then(|o| o.score);

    let data = match (outcome, error) {
        (Some(outcome), _) => outcome.result.clone(),
        (None, Some(err)) => serde_json::json!({
            "error": {"code": err.code, "message": err.message},
        }),
        (None, None) => Value::Null,
    };

    Some(DomainEvent {
        event_type,
        job_id: job.id.clone(),
        user_id: job.user_id.clone(),
        job_type: job.job_type.queue_name().to_string(),
        cv_id,
        score,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with(job_type: JobType, data: Value) -> Job {
        Job::new(job_type, "user-1", data)
    }

    #[test]
    fn test_build_completed_event() {
        let job = job_with(JobType::Ats, json!({"cv_id": "cv-9"}));
        let outcome = ProcessorOutcome {
            result: json!({"overallScore": 70}),
            cv_id: None,
            score: Some(70.0),
        };

        let event = build_event(&job, Some(&outcome), None).unwrap();
        assert_eq!(event.event_type, EventType::AtsCompleted);
        assert_eq!(event.cv_id.as_deref(), Some("cv-9"));
        assert_eq!(event.score, Some(70.0));
        assert_eq!(event.job_type, "ats");
    }

    #[test]
    fn test_build_failed_event() {
        let job = job_with(JobType::Parsing, json!({"cv_id": "cv-1"}));
        let err = CoreError::new(ErrorCode::CvParsingFailed, "no sections");

        let event = build_event(&job, None, Some(&err)).unwrap();
        assert_eq!(event.event_type, EventType::ParseFailed);
        assert_eq!(event.data["error"]["code"], "CV_PARSING_FAILED");
    }

    #[test]
    fn test_webhook_delivery_jobs_emit_nothing() {
        let job = job_with(JobType::WebhookDelivery, json!({}));
        let outcome = ProcessorOutcome::default();
        assert!(build_event(&job, Some(&outcome), None).is_none());
    }
}
