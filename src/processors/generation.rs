//! Generation pipeline
//!
//! `resolve-input -> render-template -> rasterize -> persist-artifact`.
//! The companion's `input_data` snapshot is authoritative: content, template,
//! customization, and output format were frozen at submission. The artifact
//! lands in blob storage under `generated/<job_id>.<ext>`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::{CompanionStatus, CvContent, GenerationStats, JobErrorInfo, JobType, OutputFile, UsageKind};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{JobContext, JobProcessor, ProcessorOutcome};
use crate::render::{Customization, DocumentRenderer, OutputFormat, TemplateId};
use crate::storage::{BlobStore, UploadOptions};
use crate::store::CoreStore;

const STEPS: u32 = 4;

pub struct GenerationProcessor {
    store: CoreStore,
    blobs: BlobStore,
    renderer: DocumentRenderer,
}

impl GenerationProcessor {
    pub fn new(store: CoreStore, blobs: BlobStore, renderer: DocumentRenderer) -> Self {
        Self {
            store,
            blobs,
            renderer,
        }
    }

    async fn run_pipeline(
        &self,
        ctx: &JobContext,
        input_data: &Value,
        cv_id: Option<&String>,
    ) -> CoreResult<ProcessorOutcome> {
        let job_id = ctx.job_id();
        let started = std::time::Instant::now();

        // resolve-input: everything was snapshotted at submission
        ctx.checkpoint(0, "resolve-input")?;
        let content: CvContent = input_data
            .get("content")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::validation(format!("input content: {e}")))?
            .ok_or_else(|| CoreError::validation("input snapshot missing content"))?;
        let format = OutputFormat::parse(
            input_data
                .get("output_format")
                .and_then(Value::as_str)
                .unwrap_or("pdf"),
        )?;
        let template = TemplateId::parse(
            input_data
                .get("template_id")
                .and_then(Value::as_str)
                .unwrap_or("modern"),
        )?;
        let customization: Customization = input_data
            .get("customization")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::validation(format!("customization: {e}")))?
            .unwrap_or_default();

        // render-template / rasterize
        ctx.checkpoint(1, "render-template")?;
        ctx.checkpoint(2, "rasterize")?;
        let bytes = self
            .renderer
            .render(&content, template, &customization, format)
            .await?;
        if bytes.is_empty() {
            return Err(CoreError::new(
                ErrorCode::GenerationFailed,
                "renderer produced an empty document",
            ));
        }

        // persist-artifact
        ctx.checkpoint(3, "persist-artifact")?;
        let key = format!("generated/{}.{}", job_id, format.extension());
        let uploaded = self
            .blobs
            .upload(
                bytes.clone(),
                &key,
                &UploadOptions {
                    content_type: Some(format.mime_type().to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let output_file = OutputFile {
            file_name: format!("cv.{}", format.extension()),
            file_path: key,
            file_size: uploaded.size,
            mime_type: format.mime_type().to_string(),
        };
        let stats = GenerationStats {
            page_count: page_count_of(&bytes, format),
            word_count: content.word_count(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        self.store.update_generation_with(job_id, |companion| {
            companion.status = CompanionStatus::Completed;
            companion.output_file = Some(output_file.clone());
            companion.stats = Some(stats.clone());
            companion.completed_at = Some(chrono::Utc::now());
        })?;

        self.store.update_user_with(ctx.user_id(), |user| {
            user.usage.roll_over_if_stale();
            UsageKind::Generation.increment(&mut user.usage);
        })?;

        info!(
            job_id,
            format = format.extension(),
            size = output_file.file_size,
            pages = stats.page_count,
            "Document generated"
        );

        Ok(ProcessorOutcome {
            result: json!({
                "fileName": output_file.file_name,
                "filePath": output_file.file_path,
                "fileSize": output_file.file_size,
                "mimeType": output_file.mime_type,
                "pageCount": stats.page_count,
            }),
            cv_id: cv_id.cloned(),
            score: None,
        })
    }
}

fn page_count_of(bytes: &[u8], format: OutputFormat) -> u32 {
    match format {
        OutputFormat::Pdf => lopdf::Document::load_mem(bytes)
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(1),
        OutputFormat::Docx => 1,
    }
}

#[async_trait]
impl JobProcessor for GenerationProcessor {
    fn job_type(&self) -> JobType {
        JobType::Generation
    }

    fn total_steps(&self, _data: &Value) -> u32 {
        STEPS
    }

    async fn run(&self, ctx: &JobContext, _data: Value) -> CoreResult<ProcessorOutcome> {
        let job_id = ctx.job_id();

        let companion = self
            .store
            .get_generation(job_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::JobInvalidState, "generation companion missing"))?;

        if companion.status.is_terminal() {
            let file = companion.output_file.clone();
            return Ok(ProcessorOutcome {
                result: json!({
                    "alreadyDone": true,
                    "filePath": file.map(|f| f.file_path),
                }),
                cv_id: companion.cv_id,
                score: None,
            });
        }

        self.store.update_generation_with(job_id, |companion| {
            companion.status = CompanionStatus::Processing;
        })?;

        match self
            .run_pipeline(ctx, &companion.input_data, companion.cv_id.as_ref())
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.code == ErrorCode::JobCancelled => {
                self.store.update_generation_with(job_id, |companion| {
                    companion.status = CompanionStatus::Pending;
                })?;
                Err(err)
            }
            Err(err) => {
                if !err.retryable {
                    self.store.update_generation_with(job_id, |companion| {
                        companion.status = CompanionStatus::Failed;
                        companion.error = Some(JobErrorInfo::from(&err));
                        companion.completed_at = Some(chrono::Utc::now());
                    })?;
                } else {
                    self.store.update_generation_with(job_id, |companion| {
                        companion.status = CompanionStatus::Pending;
                    })?;
                }
                Err(err)
            }
        }
    }
}
