//! Job engine
//!
//! The authority over job rows and their queue envelopes. Services create
//! jobs here; workers lease envelopes, run processors, and report the
//! outcome back through the engine so every status transition follows the
//! §3 state machine: `pending -> processing -> terminal`, terminal states
//! final except via explicit retry (which links a fresh job via `retry_of`).

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::store::QueueStore;
use crate::config::{QueueConfig, QueuesConfig};
use crate::domain::{Job, JobAttempt, JobErrorInfo, JobStatus, JobType};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::observability::Metrics;
use crate::store::{CoreStore, JobFilter};

/// Options accepted at job creation.
#[derive(Debug, Clone, Default)]
pub struct CreateJobOptions {
    /// 0..=10; values outside the range are rejected.
    pub priority: Option<i64>,
    pub delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub total_steps: Option<u32>,
}

pub struct JobEngine {
    store: CoreStore,
    queue: Arc<QueueStore>,
    queues: QueuesConfig,
    metrics: Arc<Metrics>,
}

impl JobEngine {
    pub fn new(
        store: CoreStore,
        queue: Arc<QueueStore>,
        queues: QueuesConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            queue,
            queues,
            metrics,
        }
    }

    pub fn queue_config(&self, job_type: JobType) -> &QueueConfig {
        match job_type {
            JobType::Parsing => &self.queues.parsing,
            JobType::Optimization => &self.queues.optimization,
            JobType::Generation => &self.queues.generation,
            JobType::Ats => &self.queues.ats,
            JobType::WebhookDelivery => &self.queues.webhook_delivery,
        }
    }

    pub fn queue_store(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    pub fn doc_store(&self) -> &CoreStore {
        &self.store
    }

    /// Persist a job row, then enqueue its envelope. If the enqueue fails the
    /// job row is marked failed with `JOB_QUEUE_ERROR` rather than left
    /// dangling as pending.
    pub fn create(
        &self,
        job_type: JobType,
        user_id: &str,
        data: Value,
        opts: CreateJobOptions,
    ) -> CoreResult<Job> {
        self.create_with_setup(job_type, user_id, data, opts, |_| Ok(()))
    }

    /// Like [`create`](Self::create), with a setup hook that runs after the
    /// job row is persisted and before the envelope is enqueued. Services use
    /// it to insert the companion row, so no worker can lease a job whose
    /// companion does not exist yet. A setup failure fails the job row.
    pub fn create_with_setup(
        &self,
        job_type: JobType,
        user_id: &str,
        data: Value,
        opts: CreateJobOptions,
        setup: impl FnOnce(&Job) -> CoreResult<()>,
    ) -> CoreResult<Job> {
        let config = self.queue_config(job_type);

        let priority = match opts.priority {
            Some(p) if !(0..=10).contains(&p) => {
                return Err(CoreError::validation(format!(
                    "priority must be within 0..=10, got {p}"
                )));
            }
            Some(p) => p as u8,
            None => config.priority,
        };

        let mut job = Job::new(job_type, user_id, data);
        job.priority = priority;
        job.max_retries = opts.max_retries.unwrap_or(config.max_retries);
        job.total_steps = opts.total_steps.unwrap_or(1);

        self.store.put_job(&job)?;

        if let Err(err) = setup(&job) {
            warn!(job_id = %job.id, error = %err, "Job setup failed");
            self.store.update_job_with(&job.id, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(JobErrorInfo::from(&err));
                job.completed_at = Some(Utc::now());
            })?;
            return Err(err);
        }

        let enqueued = self.queue.enqueue(
            job_type.queue_name(),
            &job.id,
            priority,
            1,
            opts.delay_ms.unwrap_or(0),
        );

        if let Err(err) = enqueued {
            warn!(job_id = %job.id, error = %err, "Enqueue failed, failing job");
            let queue_err = CoreError::new(ErrorCode::JobQueueError, err.to_string());
            self.store.update_job_with(&job.id, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(JobErrorInfo::from(&queue_err));
                job.completed_at = Some(Utc::now());
            })?;
            return Err(queue_err);
        }

        self.metrics.job_created();
        info!(job_id = %job.id, job_type = %job_type, priority, "Job created");
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> CoreResult<Job> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::JobNotFound, "job not found"))
    }

    /// Owner-checked fetch. Foreign jobs look identical to missing ones.
    pub fn get_owned(&self, job_id: &str, user_id: &str) -> CoreResult<Job> {
        let job = self.get(job_id)?;
        if !job.is_owned_by(user_id) {
            return Err(CoreError::new(ErrorCode::JobNotFound, "job not found"));
        }
        Ok(job)
    }

    pub fn list(
        &self,
        user_id: &str,
        filter: &JobFilter,
        limit: usize,
        skip: usize,
    ) -> CoreResult<(Vec<Job>, usize)> {
        Ok(self.store.list_jobs(user_id, filter, limit, skip)?)
    }

    /// Request cancellation. Pending jobs cancel immediately; processing jobs
    /// get flagged and stop at their next progress checkpoint.
    pub fn cancel(&self, job_id: &str, user_id: &str) -> CoreResult<Job> {
        let job = self.get_owned(job_id, user_id)?;

        match job.status {
            JobStatus::Pending => {
                let cancelled = self.store.update_job_with(job_id, |job| {
                    job.status = JobStatus::Cancelled;
                    job.cancel_requested = true;
                    job.completed_at = Some(Utc::now());
                })?;
                self.metrics.job_cancelled();
                info!(job_id, "Pending job cancelled");
                Ok(cancelled)
            }
            JobStatus::Processing => {
                let flagged = self.store.update_job_with(job_id, |job| {
                    job.cancel_requested = true;
                })?;
                info!(job_id, "Cancellation requested for processing job");
                Ok(flagged)
            }
            status => Err(CoreError::new(
                ErrorCode::JobInvalidState,
                format!("cannot cancel job in state {status:?}"),
            )),
        }
    }

    /// Create a fresh job from a terminal one, linked via `retry_of`.
    pub fn retry(&self, job_id: &str, user_id: &str) -> CoreResult<Job> {
        let job = self.get_owned(job_id, user_id)?;
        if !job.status.is_terminal() {
            return Err(CoreError::new(
                ErrorCode::JobInvalidState,
                "only terminal jobs can be retried",
            ));
        }

        let mut fresh = Job::new(job.job_type, user_id, job.data.clone());
        fresh.priority = job.priority;
        fresh.max_retries = job.max_retries;
        fresh.total_steps = job.total_steps;
        fresh.retry_of = Some(job.id.clone());

        self.store.put_job(&fresh)?;
        self.queue
            .enqueue(job.job_type.queue_name(), &fresh.id, fresh.priority, 1, 0)
            .map_err(CoreError::from)?;

        self.metrics.job_created();
        info!(job_id = %fresh.id, retry_of = %job.id, "Job retried");
        Ok(fresh)
    }

    // Worker-side transitions

    /// `pending -> processing` when a worker picks the job up. Re-delivery of
    /// a terminal job returns `JobInvalidState` so the worker can ack and
    /// drop the stale envelope.
    pub fn begin_attempt(&self, job_id: &str, attempt_number: u32) -> CoreResult<Job> {
        let current = self.get(job_id)?;
        match current.status {
            JobStatus::Pending => {}
            JobStatus::Processing if attempt_number > 1 => {
                // Crash re-delivery: the row stayed processing, resume below
            }
            status => {
                return Err(CoreError::new(
                    ErrorCode::JobInvalidState,
                    format!("job is {status:?}, not pending"),
                ));
            }
        }

        let job = self.store.update_job_with(job_id, |job| {
            job.status = JobStatus::Processing;
            job.started_at.get_or_insert_with(Utc::now);
            job.attempts.push(JobAttempt {
                attempt_number,
                started_at: Utc::now(),
                finished_at: None,
                error: None,
            });
        })?;
        debug!(job_id, attempt_number, "Attempt started");
        Ok(job)
    }

    /// Progress checkpoint. Returns `JOB_CANCELLED` when cancellation was
    /// requested, which the processor propagates to stop promptly.
    pub fn report_progress(
        &self,
        job_id: &str,
        steps_done: u32,
        total_steps: u32,
        current_step: &str,
    ) -> CoreResult<()> {
        let job = self.store.update_job_with(job_id, |job| {
            if job.status == JobStatus::Processing {
                job.progress = Job::progress_for_step(steps_done, total_steps);
                job.total_steps = total_steps;
                job.current_step = Some(current_step.to_string());
            }
        })?;

        if job.cancel_requested {
            return Err(CoreError::new(ErrorCode::JobCancelled, "job cancelled"));
        }
        debug!(job_id, step = current_step, progress = job.progress, "Progress");
        Ok(())
    }

    pub fn complete(&self, job_id: &str, result: Value) -> CoreResult<Job> {
        let job = self.store.update_job_with(job_id, |job| {
            if job.status.can_transition_to(JobStatus::Completed) {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.result = Some(result.clone());
                job.completed_at = Some(Utc::now());
                if let Some(attempt) = job.attempts.last_mut() {
                    attempt.finished_at = Some(Utc::now());
                }
            }
        })?;
        self.metrics.job_completed();
        info!(job_id, "Job completed");
        Ok(job)
    }

    /// Record a failed attempt. With `will_retry` the job returns to pending
    /// for the next delivery; otherwise it fails terminally, preserving the
    /// last underlying error in `error.details` when retries were exhausted.
    pub fn fail(&self, job_id: &str, error: &CoreError, will_retry: bool) -> CoreResult<Job> {
        let info = JobErrorInfo::from(error);
        let job = self.store.update_job_with(job_id, |job| {
            if let Some(attempt) = job.attempts.last_mut() {
                attempt.finished_at = Some(Utc::now());
                attempt.error = Some(info.clone());
            }
            if will_retry {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.current_step = None;
            } else {
                job.status = if error.code == ErrorCode::JobCancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Failed
                };
                job.error = if job.retry_count >= job.max_retries && error.retryable {
                    Some(JobErrorInfo {
                        code: ErrorCode::JobMaxRetriesExceeded,
                        message: "retry budget exhausted".to_string(),
                        details: Some(serde_json::json!({
                            "code": info.code,
                            "message": info.message,
                        })),
                    })
                } else {
                    Some(info.clone())
                };
                job.completed_at = Some(Utc::now());
            }
        })?;

        if !will_retry {
            if job.status == JobStatus::Cancelled {
                self.metrics.job_cancelled();
            } else {
                self.metrics.job_failed();
            }
        }
        warn!(job_id, code = %info.code, will_retry, "Job attempt failed");
        Ok(job)
    }

    /// Deadline expiry: mark timeout, optionally leaving the job pending for
    /// a retry delivery.
    pub fn time_out(&self, job_id: &str, will_retry: bool) -> CoreResult<Job> {
        let job = self.store.update_job_with(job_id, |job| {
            if will_retry {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.current_step = None;
            } else {
                job.status = JobStatus::Timeout;
                job.error = Some(JobErrorInfo {
                    code: ErrorCode::JobTimeout,
                    message: "job exceeded its queue deadline".to_string(),
                    details: None,
                });
                job.completed_at = Some(Utc::now());
            }
            if let Some(attempt) = job.attempts.last_mut() {
                attempt.finished_at = Some(Utc::now());
            }
        })?;
        if !will_retry {
            self.metrics.job_failed();
        }
        warn!(job_id, will_retry, "Job timed out");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_engine() -> (JobEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = CoreStore::open(temp_dir.path().join("docs")).unwrap();
        let queue = Arc::new(QueueStore::open(temp_dir.path().join("queue")).unwrap());
        let engine = JobEngine::new(
            store,
            queue,
            QueuesConfig::default(),
            Arc::new(Metrics::new()),
        );
        (engine, temp_dir)
    }

    #[test]
    fn test_create_persists_and_enqueues() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(
                JobType::Parsing,
                "user-1",
                json!({"cv_id": "cv-1"}),
                CreateJobOptions::default(),
            )
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(engine.queue_store().waiting_count("parsing").unwrap(), 1);
        assert!(engine.get(&job.id).is_ok());
    }

    #[test]
    fn test_priority_bounds() {
        let (engine, _temp) = test_engine();

        for priority in [0, 10] {
            assert!(
                engine
                    .create(
                        JobType::Ats,
                        "user-1",
                        json!({}),
                        CreateJobOptions { priority: Some(priority), ..Default::default() },
                    )
                    .is_ok()
            );
        }
        for priority in [-1, 11] {
            let err = engine
                .create(
                    JobType::Ats,
                    "user-1",
                    json!({}),
                    CreateJobOptions { priority: Some(priority), ..Default::default() },
                )
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::ValidationError);
        }
    }

    #[test]
    fn test_ownership_hides_foreign_jobs() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Parsing, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();

        let err = engine.get_owned(&job.id, "user-2").unwrap_err();
        assert_eq!(err.code, ErrorCode::JobNotFound);
    }

    #[test]
    fn test_cancel_pending_is_terminal() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Parsing, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();

        let cancelled = engine.cancel(&job.id, "user-1").unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // Terminal: cancelling again is an invalid state transition
        let err = engine.cancel(&job.id, "user-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::JobInvalidState);
    }

    #[test]
    fn test_cancel_processing_flags_only() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Parsing, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();
        engine.begin_attempt(&job.id, 1).unwrap();

        let flagged = engine.cancel(&job.id, "user-1").unwrap();
        assert_eq!(flagged.status, JobStatus::Processing);
        assert!(flagged.cancel_requested);

        // The next progress checkpoint surfaces the cancellation
        let err = engine.report_progress(&job.id, 1, 3, "llm-call").unwrap_err();
        assert_eq!(err.code, ErrorCode::JobCancelled);
    }

    #[test]
    fn test_attempt_lifecycle_and_history() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Ats, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();

        engine.begin_attempt(&job.id, 1).unwrap();
        engine.report_progress(&job.id, 1, 2, "llm-score").unwrap();
        let done = engine.complete(&job.id, json!({"overallScore": 70})).unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.attempts.len(), 1);
        assert!(done.attempts[0].finished_at.is_some());
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_fail_with_retry_returns_to_pending() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Parsing, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();
        engine.begin_attempt(&job.id, 1).unwrap();

        let err = CoreError::new(ErrorCode::AiTimeout, "deadline exceeded");
        let failed = engine.fail(&job.id, &err, true).unwrap();
        assert_eq!(failed.status, JobStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(
            failed.attempts[0].error.as_ref().unwrap().code,
            ErrorCode::AiTimeout
        );
    }

    #[test]
    fn test_exhausted_retries_wrap_last_error() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(
                JobType::Parsing,
                "user-1",
                json!({}),
                CreateJobOptions { max_retries: Some(1), ..Default::default() },
            )
            .unwrap();

        engine.begin_attempt(&job.id, 1).unwrap();
        let err = CoreError::new(ErrorCode::AiTimeout, "deadline exceeded");
        engine.fail(&job.id, &err, true).unwrap();

        engine.begin_attempt(&job.id, 2).unwrap();
        let failed = engine.fail(&job.id, &err, false).unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        let error = failed.error.unwrap();
        assert_eq!(error.code, ErrorCode::JobMaxRetriesExceeded);
        assert_eq!(error.details.unwrap()["code"], "AI_TIMEOUT");
    }

    #[test]
    fn test_non_retryable_error_keeps_its_code() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Parsing, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();
        engine.begin_attempt(&job.id, 1).unwrap();

        let err = CoreError::new(ErrorCode::CvParsingFailed, "no usable sections");
        let failed = engine.fail(&job.id, &err, false).unwrap();
        assert_eq!(failed.error.unwrap().code, ErrorCode::CvParsingFailed);
    }

    #[test]
    fn test_retry_links_new_job() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Generation, "user-1", json!({"fmt": "pdf"}), CreateJobOptions::default())
            .unwrap();
        engine.begin_attempt(&job.id, 1).unwrap();
        let err = CoreError::new(ErrorCode::GenerationFailed, "renderer crashed");
        engine.fail(&job.id, &err, false).unwrap();

        let fresh = engine.retry(&job.id, "user-1").unwrap();
        assert_eq!(fresh.retry_of.as_deref(), Some(job.id.as_str()));
        assert_eq!(fresh.status, JobStatus::Pending);
        assert_eq!(fresh.data, json!({"fmt": "pdf"}));

        // A live job cannot be retried
        let err = engine.retry(&fresh.id, "user-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::JobInvalidState);
    }

    #[test]
    fn test_timeout_transition() {
        let (engine, _temp) = test_engine();
        let job = engine
            .create(JobType::Optimization, "user-1", json!({}), CreateJobOptions::default())
            .unwrap();
        engine.begin_attempt(&job.id, 1).unwrap();

        let timed_out = engine.time_out(&job.id, false).unwrap();
        assert_eq!(timed_out.status, JobStatus::Timeout);
        assert_eq!(timed_out.error.unwrap().code, ErrorCode::JobTimeout);
    }
}
