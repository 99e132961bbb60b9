//! Parsing pipeline
//!
//! `load-file -> extract-text -> normalize-text -> llm-parse ->
//! structural-validate -> persist-content`. The companion row tracks the
//! pipeline; the CV's `parsing_status` mirrors the terminal outcome.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::ai::AiClient;
use crate::domain::{CompanionStatus, CvContent, ExtractionInfo, JobErrorInfo, JobType, ParsingStatus};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::extract;
use crate::queue::{JobContext, JobProcessor, ProcessorOutcome};
use crate::storage::BlobStore;
use crate::store::CoreStore;
use crate::versions::VersionService;

const STEPS: u32 = 6;

pub struct ParsingProcessor {
    store: CoreStore,
    blobs: BlobStore,
    ai: AiClient,
    versions: VersionService,
}

impl ParsingProcessor {
    pub fn new(store: CoreStore, blobs: BlobStore, ai: AiClient, versions: VersionService) -> Self {
        Self {
            store,
            blobs,
            ai,
            versions,
        }
    }

    async fn run_pipeline(&self, ctx: &JobContext, cv_id: &str) -> CoreResult<ProcessorOutcome> {
        let job_id = ctx.job_id();

        // load-file
        ctx.checkpoint(0, "load-file")?;
        let cv = self
            .store
            .get_cv(cv_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
        let file_ref = cv.file_ref.clone().ok_or_else(|| {
            CoreError::new(ErrorCode::CvNoFileToParse, "cv has no uploaded file")
        })?;
        let bytes = self.blobs.download(&file_ref.key).await?;

        // extract-text
        ctx.checkpoint(1, "extract-text")?;
        let extracted = extract::extract(&bytes, &file_ref.mime_type)?;

        // normalize-text
        ctx.checkpoint(2, "normalize-text")?;
        let normalized = extract::normalize::normalize(&extracted.text);
        let extraction = ExtractionInfo {
            page_count: extracted.page_count,
            character_count: normalized.text.chars().count() as u32,
            detected_sections: normalized.sections.clone(),
        };
        self.store.update_parsing_job_with(job_id, |companion| {
            companion.extraction = Some(extraction.clone());
        })?;

        // llm-parse
        ctx.checkpoint(3, "llm-parse")?;
        let content = self
            .ai
            .parse_cv(&normalized.text, &normalized.sections)
            .await?;

        // structural-validate
        ctx.checkpoint(4, "structural-validate")?;
        validate_structure(&content)?;
        let confidence = content.completeness();

        // persist-content
        ctx.checkpoint(5, "persist-content")?;
        let version = self
            .versions
            .record_parse_result(cv_id, content.clone(), confidence)?;

        self.store.update_parsing_job_with(job_id, |companion| {
            companion.status = CompanionStatus::Completed;
            companion.parsed_content = Some(content.clone());
            companion.confidence = Some(confidence);
            companion.completed_at = Some(chrono::Utc::now());
        })?;

        info!(
            cv_id,
            job_id,
            confidence,
            new_version = version.is_some(),
            "CV parsed"
        );

        Ok(ProcessorOutcome {
            result: json!({
                "confidence": confidence,
                "pageCount": extraction.page_count,
                "detectedSections": extraction.detected_sections,
                "versionId": version.as_ref().map(|v| v.id.clone()),
                "versionNumber": version.as_ref().map(|v| v.version_number),
                "noChange": version.is_none(),
            }),
            cv_id: Some(cv_id.to_string()),
            score: None,
        })
    }
}

/// Reject a parse that produced nothing usable: no name, or all of
/// experience, education, and skills empty.
fn validate_structure(content: &CvContent) -> CoreResult<()> {
    let has_name = content
        .personal
        .name
        .as_deref()
        .is_some_and(|name| !name.trim().is_empty());
    let has_body = !content.experience.is_empty()
        || !content.education.is_empty()
        || !content.skills.is_empty();

    if !has_name || !has_body {
        return Err(CoreError::new(
            ErrorCode::CvParsingFailed,
            "parsed content lacks a name or any substantive section",
        ));
    }
    Ok(())
}

#[async_trait]
impl JobProcessor for ParsingProcessor {
    fn job_type(&self) -> JobType {
        JobType::Parsing
    }

    fn total_steps(&self, _data: &Value) -> u32 {
        STEPS
    }

    async fn run(&self, ctx: &JobContext, data: Value) -> CoreResult<ProcessorOutcome> {
        let cv_id = data
            .get("cv_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("missing cv_id"))?
            .to_string();
        let job_id = ctx.job_id();

        // Idempotency: terminal companions are never overwritten
        let companion = self
            .store
            .get_parsing_job(job_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::JobInvalidState, "parsing companion missing"))?;
        if companion.status.is_terminal() {
            return Ok(ProcessorOutcome {
                result: json!({
                    "alreadyDone": true,
                    "confidence": companion.confidence,
                }),
                cv_id: Some(cv_id),
                score: None,
            });
        }

        self.store.update_parsing_job_with(job_id, |companion| {
            companion.status = CompanionStatus::Processing;
        })?;
        self.store.update_cv_with(&cv_id, |cv| {
            cv.parsing_status = ParsingStatus::Processing;
        })?;

        match self.run_pipeline(ctx, &cv_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.code == ErrorCode::JobCancelled => {
                // Not a failure: leave the companion pending and the CV
                // where a later retry can pick it up
                self.store.update_parsing_job_with(job_id, |companion| {
                    companion.status = CompanionStatus::Pending;
                })?;
                self.store.update_cv_with(&cv_id, |cv| {
                    cv.parsing_status = ParsingStatus::Pending;
                })?;
                Err(err)
            }
            Err(err) => {
                // Companion and CV fail together; retryable errors keep the
                // companion open for the next delivery
                if !err.retryable {
                    self.store.update_parsing_job_with(job_id, |companion| {
                        companion.status = CompanionStatus::Failed;
                        companion.error = Some(JobErrorInfo::from(&err));
                        companion.completed_at = Some(chrono::Utc::now());
                    })?;
                    self.store.update_cv_with(&cv_id, |cv| {
                        cv.parsing_status = ParsingStatus::Failed;
                    })?;
                } else {
                    self.store.update_parsing_job_with(job_id, |companion| {
                        companion.status = CompanionStatus::Pending;
                    })?;
                }
                Err(err)
            }
        }
    }
}
