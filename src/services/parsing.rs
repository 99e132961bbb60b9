//! Parsing service
//!
//! `start` creates the job + companion pair and flips the CV to `pending`;
//! `status` and `result` read back what the processor recorded.

use std::sync::Arc;

use serde_json::json;

use crate::domain::{CvContent, CvParsingJob, JobStatus, JobType, ParsingStatus};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{CreateJobOptions, JobEngine};
use crate::store::CoreStore;

#[derive(Debug, Clone, Default)]
pub struct StartParsing {
    pub priority: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ParsingStatusView {
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
}

#[derive(Clone)]
pub struct ParsingService {
    store: CoreStore,
    engine: Arc<JobEngine>,
}

impl ParsingService {
    pub fn new(store: CoreStore, engine: Arc<JobEngine>) -> Self {
        Self { store, engine }
    }

    /// Queue a parse of the CV's uploaded document.
    pub fn start(&self, user_id: &str, cv_id: &str, opts: StartParsing) -> CoreResult<String> {
        super::check_user_can_start(&self.store, user_id, None)?;

        let cv = self
            .store
            .get_cv(cv_id)?
            .filter(|cv| cv.is_owned_by(user_id))
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
        let file_ref = cv.file_ref.clone().ok_or_else(|| {
            CoreError::new(ErrorCode::CvNoFileToParse, "cv has no uploaded file")
        })?;
        if cv.parsing_status == ParsingStatus::Processing {
            return Err(CoreError::new(
                ErrorCode::Conflict,
                "a parse is already running for this cv",
            ));
        }

        // Pending before the enqueue, so a fast worker's `processing` stamp
        // is never overwritten
        self.store.update_cv_with(cv_id, |cv| {
            cv.parsing_status = ParsingStatus::Pending;
        })?;

        let job = self.engine.create_with_setup(
            JobType::Parsing,
            user_id,
            json!({"cv_id": cv_id}),
            CreateJobOptions {
                priority: opts.priority,
                total_steps: Some(6),
                ..Default::default()
            },
            |job| {
                self.store.put_parsing_job(&CvParsingJob::new(
                    &job.id,
                    user_id,
                    cv_id,
                    &file_ref.key,
                    &file_ref.mime_type,
                ))?;
                Ok(())
            },
        )?;

        Ok(job.id)
    }

    pub fn status(&self, user_id: &str, job_id: &str) -> CoreResult<ParsingStatusView> {
        let job = self.engine.get_owned(job_id, user_id)?;
        Ok(ParsingStatusView {
            status: job.status,
            progress: job.progress,
            current_step: job.current_step,
        })
    }

    /// Parsed content once the job completed; the job's error otherwise.
    pub fn result(&self, user_id: &str, job_id: &str) -> CoreResult<CvContent> {
        let job = self.engine.get_owned(job_id, user_id)?;
        match job.status {
            JobStatus::Completed => {
                let companion = self.store.get_parsing_job(job_id)?.ok_or_else(|| {
                    CoreError::new(ErrorCode::NotFound, "parsing record not found")
                })?;
                companion.parsed_content.ok_or_else(|| {
                    CoreError::new(ErrorCode::NotFound, "no parsed content recorded")
                })
            }
            JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled => {
                let info = job.error.map(|e| e.message).unwrap_or_default();
                Err(CoreError::new(ErrorCode::CvParsingFailed, info))
            }
            _ => Err(CoreError::new(
                ErrorCode::JobInvalidState,
                "parse has not finished",
            )),
        }
    }
}
