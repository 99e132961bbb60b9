//! Job engine and worker runtime
//!
//! Multi-queue, priority-aware job broker over a durable fjall keyspace.
//! Services create jobs through [`JobEngine`]; per-queue worker pools lease
//! envelopes and dispatch on the envelope's job type to a registered
//! [`JobProcessor`]. Delivery is at-least-once: processors are idempotent
//! with respect to their companion rows.

pub mod engine;
pub mod retry;
pub mod store;
pub mod worker;

pub use engine::{CreateJobOptions, JobEngine};
pub use store::{QueueError, QueueStore};
pub use worker::{EventSink, spawn_workers};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Job, JobType};
use crate::error::{CoreError, CoreResult, ErrorCode};

/// What a processor hands back on success.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutcome {
    pub result: Value,
    /// CV the work concerned, for event filtering.
    pub cv_id: Option<String>,
    /// Score carried on `ats.completed` events.
    pub score: Option<f64>,
}

impl ProcessorOutcome {
    pub fn with_result(result: Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }
}

/// Per-job view handed to a processor: the leased job snapshot plus the
/// progress/cancellation channel back into the engine.
pub struct JobContext {
    job: Job,
    total_steps: u32,
    engine: Arc<JobEngine>,
}

impl JobContext {
    pub fn new(job: Job, total_steps: u32, engine: Arc<JobEngine>) -> Self {
        Self {
            job,
            total_steps: total_steps.max(1),
            engine,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn user_id(&self) -> &str {
        &self.job.user_id
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// Checkpoint: records progress and surfaces a requested cancellation as
    /// `JOB_CANCELLED`, which the processor must propagate promptly.
    pub fn checkpoint(&self, steps_done: u32, step: &str) -> CoreResult<()> {
        self.engine
            .report_progress(&self.job.id, steps_done, self.total_steps, step)
    }
}

/// One pipeline, dispatched by the job type tag on the envelope.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Declared step count so progress is `round(100 * done / total)`.
    fn total_steps(&self, data: &Value) -> u32;

    async fn run(&self, ctx: &JobContext, data: Value) -> CoreResult<ProcessorOutcome>;
}

/// Registry mapping job types to processor instances.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn JobProcessor>) {
        self.processors.insert(processor.job_type(), processor);
    }

    pub fn get(&self, job_type: JobType) -> CoreResult<Arc<dyn JobProcessor>> {
        self.processors.get(&job_type).cloned().ok_or_else(|| {
            CoreError::new(
                ErrorCode::JobQueueError,
                format!("no processor registered for {job_type}"),
            )
        })
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.processors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProcessor;

    #[async_trait]
    impl JobProcessor for NoopProcessor {
        fn job_type(&self) -> JobType {
            JobType::Parsing
        }

        fn total_steps(&self, _data: &Value) -> u32 {
            6
        }

        async fn run(&self, _ctx: &JobContext, _data: Value) -> CoreResult<ProcessorOutcome> {
            Ok(ProcessorOutcome::default())
        }
    }

    #[test]
    fn test_registry_dispatch() {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(NoopProcessor));

        assert!(registry.get(JobType::Parsing).is_ok());
        let err = match registry.get(JobType::Ats) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.code, ErrorCode::JobQueueError);
    }
}
