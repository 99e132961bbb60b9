//! ATS analysis service
//!
//! Starting an analysis snapshots the CV content onto the companion row, so
//! later edits never change what a running analysis scores.

use std::sync::Arc;

use serde_json::json;

use crate::domain::{AtsAnalysis, AtsAnalysisType, AtsReport, JobStatus, JobType, TargetJob, UsageKind};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{CreateJobOptions, JobEngine};
use crate::store::CoreStore;

#[derive(Debug, Clone)]
pub struct StartAnalysis {
    pub analysis_type: AtsAnalysisType,
    pub target_job: Option<TargetJob>,
    pub priority: Option<i64>,
}

impl Default for StartAnalysis {
    fn default() -> Self {
        Self {
            analysis_type: AtsAnalysisType::Comprehensive,
            target_job: None,
            priority: None,
        }
    }
}

#[derive(Clone)]
pub struct AtsService {
    store: CoreStore,
    engine: Arc<JobEngine>,
}

impl AtsService {
    pub fn new(store: CoreStore, engine: Arc<JobEngine>) -> Self {
        Self { store, engine }
    }

    pub fn start(&self, user_id: &str, cv_id: &str, opts: StartAnalysis) -> CoreResult<String> {
        super::check_user_can_start(&self.store, user_id, Some(UsageKind::Analysis))?;

        let cv = self
            .store
            .get_cv(cv_id)?
            .filter(|cv| cv.is_owned_by(user_id))
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
        if cv.content.is_empty() {
            return Err(CoreError::new(
                ErrorCode::AtsAnalysisFailed,
                "cv has no content to analyze",
            ));
        }

        let job = self.engine.create_with_setup(
            JobType::Ats,
            user_id,
            json!({"cv_id": cv_id, "analysis_type": opts.analysis_type}),
            CreateJobOptions {
                priority: opts.priority,
                total_steps: Some(opts.analysis_type.total_steps()),
                ..Default::default()
            },
            |job| {
                self.store.put_analysis(&AtsAnalysis::new(
                    &job.id,
                    user_id,
                    cv_id,
                    opts.analysis_type,
                    opts.target_job.clone(),
                    cv.content.clone(),
                ))?;
                Ok(())
            },
        )?;

        // Analyses meter on start, not completion
        self.store.update_user_with(user_id, |user| {
            user.usage.roll_over_if_stale();
            UsageKind::Analysis.increment(&mut user.usage);
        })?;

        Ok(job.id)
    }

    pub fn result(&self, user_id: &str, job_id: &str) -> CoreResult<AtsReport> {
        let job = self.engine.get_owned(job_id, user_id)?;
        match job.status {
            JobStatus::Completed => {
                let companion = self
                    .store
                    .get_analysis(job_id)?
                    .ok_or_else(|| CoreError::new(ErrorCode::NotFound, "analysis not found"))?;
                companion
                    .results
                    .ok_or_else(|| CoreError::new(ErrorCode::NotFound, "no analysis results"))
            }
            JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled => {
                let info = job.error.map(|e| e.message).unwrap_or_default();
                Err(CoreError::new(ErrorCode::AtsAnalysisFailed, info))
            }
            _ => Err(CoreError::new(
                ErrorCode::JobInvalidState,
                "analysis has not finished",
            )),
        }
    }
}
