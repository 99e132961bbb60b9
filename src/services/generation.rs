//! Generation service
//!
//! The input is either a `(cv_id, version_id?)` pair or raw content; either
//! way it is snapshotted into the companion's `input_data` before the job is
//! queued. `download` hands back eager bytes from blob storage.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::domain::{CvContent, Generation, JobStatus, JobType, UsageKind};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{CreateJobOptions, JobEngine};
use crate::render::{Customization, OutputFormat, TemplateId};
use crate::storage::BlobStore;
use crate::store::CoreStore;

#[derive(Debug, Clone)]
pub struct StartGeneration {
    pub cv_id: Option<String>,
    pub version_id: Option<String>,
    /// Raw content, for callers generating without a stored CV.
    pub input_content: Option<CvContent>,
    pub output_format: String,
    pub template_id: String,
    pub customization: Option<Customization>,
    pub priority: Option<i64>,
}

impl Default for StartGeneration {
    fn default() -> Self {
        Self {
            cv_id: None,
            version_id: None,
            input_content: None,
            output_format: "pdf".to_string(),
            template_id: "modern".to_string(),
            customization: None,
            priority: None,
        }
    }
}

#[derive(Debug)]
pub struct DownloadedDocument {
    pub bytes: bytes::Bytes,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Clone)]
pub struct GenerationService {
    store: CoreStore,
    blobs: BlobStore,
    engine: Arc<JobEngine>,
}

impl GenerationService {
    pub fn new(store: CoreStore, blobs: BlobStore, engine: Arc<JobEngine>) -> Self {
        Self {
            store,
            blobs,
            engine,
        }
    }

    pub fn start(&self, user_id: &str, opts: StartGeneration) -> CoreResult<String> {
        super::check_user_can_start(&self.store, user_id, Some(UsageKind::Generation))?;

        // Validate early so a bad request never reaches the queue
        let format = OutputFormat::parse(&opts.output_format)?;
        TemplateId::parse(&opts.template_id)?;

        let content = self.resolve_content(user_id, &opts)?;
        if content.is_empty() {
            return Err(CoreError::new(
                ErrorCode::GenerationFailed,
                "nothing to generate: content is empty",
            ));
        }

        let input_data: Value = json!({
            "content": content,
            "output_format": format.extension(),
            "template_id": opts.template_id,
            "customization": opts.customization.clone().unwrap_or_default(),
        });

        let cv_id = opts.cv_id.clone();
        let job = self.engine.create_with_setup(
            JobType::Generation,
            user_id,
            json!({"cv_id": cv_id, "output_format": format.extension()}),
            CreateJobOptions {
                priority: opts.priority,
                total_steps: Some(4),
                ..Default::default()
            },
            |job| {
                self.store.put_generation(&Generation::new(
                    &job.id,
                    user_id,
                    cv_id.clone(),
                    input_data.clone(),
                ))?;
                Ok(())
            },
        )?;

        Ok(job.id)
    }

    fn resolve_content(&self, user_id: &str, opts: &StartGeneration) -> CoreResult<CvContent> {
        if let Some(content) = &opts.input_content {
            return Ok(content.clone());
        }

        let cv_id = opts
            .cv_id
            .as_deref()
            .ok_or_else(|| CoreError::validation("either cv_id or input_content is required"))?;
        let cv = self
            .store
            .get_cv(cv_id)?
            .filter(|cv| cv.is_owned_by(user_id))
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;

        match &opts.version_id {
            Some(version_id) => {
                let version = self
                    .store
                    .get_version_by_id(version_id)?
                    .filter(|v| v.cv_id == cv.id)
                    .ok_or_else(|| {
                        CoreError::new(ErrorCode::VersionNotFound, "version not found")
                    })?;
                Ok(version.content)
            }
            None => Ok(cv.content),
        }
    }

    pub async fn download(&self, user_id: &str, job_id: &str) -> CoreResult<DownloadedDocument> {
        let job = self.engine.get_owned(job_id, user_id)?;
        if job.status != JobStatus::Completed {
            return Err(CoreError::new(
                ErrorCode::GenerationNotReady,
                "generation has not completed",
            ));
        }

        let companion = self
            .store
            .get_generation(job_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::GenerationNotFound, "generation not found"))?;
        let output_file = companion.output_file.ok_or_else(|| {
            CoreError::new(ErrorCode::GenerationNotFound, "no artifact recorded")
        })?;

        let bytes = self.blobs.download(&output_file.file_path).await?;
        Ok(DownloadedDocument {
            bytes,
            content_type: output_file.mime_type,
            file_name: output_file.file_name,
        })
    }
}
