//! Optimization service

use std::sync::Arc;

use serde_json::json;

use crate::domain::{JobType, UsageKind};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{CreateJobOptions, JobEngine};
use crate::store::CoreStore;

#[derive(Debug, Clone, Default)]
pub struct StartOptimization {
    pub target_role: String,
    pub job_description: Option<String>,
    /// Section filter; empty means the whole document.
    pub sections: Vec<String>,
    pub priority: Option<i64>,
}

#[derive(Clone)]
pub struct OptimizeService {
    store: CoreStore,
    engine: Arc<JobEngine>,
}

impl OptimizeService {
    pub fn new(store: CoreStore, engine: Arc<JobEngine>) -> Self {
        Self { store, engine }
    }

    /// Queue an optimization of the CV's active version.
    pub fn start(&self, user_id: &str, cv_id: &str, opts: StartOptimization) -> CoreResult<String> {
        super::check_user_can_start(&self.store, user_id, Some(UsageKind::Enhancement))?;

        let cv = self
            .store
            .get_cv(cv_id)?
            .filter(|cv| cv.is_owned_by(user_id))
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
        if cv.content.is_empty() {
            return Err(CoreError::new(
                ErrorCode::OptimizationFailed,
                "cv has no content to optimize",
            ));
        }
        if opts.target_role.trim().is_empty() {
            return Err(CoreError::validation("target_role must not be empty"));
        }

        let job = self.engine.create(
            JobType::Optimization,
            user_id,
            json!({
                "cv_id": cv_id,
                "target_role": opts.target_role,
                "job_description": opts.job_description,
                "sections": opts.sections,
            }),
            CreateJobOptions {
                priority: opts.priority,
                total_steps: Some(5),
                ..Default::default()
            },
        )?;

        Ok(job.id)
    }
}
