//! Optimization pipeline
//!
//! `load-source-version -> build-prompt -> llm-optimize -> diff-check ->
//! persist-version`. Works on the active version snapshot, never the mutable
//! CV content; an unchanged result completes with `noChange` and creates no
//! version. New versions are not auto-activated.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::ai::AiClient;
use crate::domain::{ChangeType, CvContent, JobType, UsageKind};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{JobContext, JobProcessor, ProcessorOutcome};
use crate::store::CoreStore;
use crate::versions::{self, NewVersionOptions, VersionService};

const STEPS: u32 = 5;

pub struct OptimizationProcessor {
    store: CoreStore,
    ai: AiClient,
    versions: VersionService,
}

impl OptimizationProcessor {
    pub fn new(store: CoreStore, ai: AiClient, versions: VersionService) -> Self {
        Self { store, ai, versions }
    }
}

#[async_trait]
impl JobProcessor for OptimizationProcessor {
    fn job_type(&self) -> JobType {
        JobType::Optimization
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
        let target_role = data
            .get("target_role")
            .and_then(Value::as_str)
            .unwrap_or("the same role, strengthened")
            .to_string();
        let job_description = data
            .get("job_description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let sections: Vec<String> = data
            .get("sections")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // load-source-version
        ctx.checkpoint(0, "load-source-version")?;
        let cv = self
            .store
            .get_cv(&cv_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::CvNotFound, "cv not found"))?;
        let source: CvContent = match &cv.active_version_id {
            Some(version_id) => self
                .store
                .get_version_by_id(version_id)?
                .map(|version| version.content)
                .unwrap_or(cv.content),
            None => cv.content,
        };
        if source.is_empty() {
            return Err(CoreError::new(
                ErrorCode::OptimizationFailed,
                "cv has no content to optimize",
            ));
        }

        // build-prompt
        ctx.checkpoint(1, "build-prompt")?;

        // llm-optimize
        ctx.checkpoint(2, "llm-optimize")?;
        let optimized = self
            .ai
            .optimize_cv(&source, &target_role, job_description.as_deref(), &sections)
            .await?;

        // diff-check
        ctx.checkpoint(3, "diff-check")?;
        if versions::is_content_equal(&source, &optimized) {
            info!(cv_id, job_id = ctx.job_id(), "Optimization produced no change");
            return Ok(ProcessorOutcome {
                result: json!({"noChange": true}),
                cv_id: Some(cv_id),
                score: None,
            });
        }

        // persist-version (not activated; the caller opts in explicitly)
        ctx.checkpoint(4, "persist-version")?;
        let version = self.versions.create_version(
            &cv_id,
            optimized,
            ChangeType::Optimization,
            NewVersionOptions {
                name: Some(format!("Optimized for {target_role}")),
                description: job_description.clone(),
                activate: false,
                ..Default::default()
            },
        )?;

        self.store.update_user_with(ctx.user_id(), |user| {
            user.usage.roll_over_if_stale();
            UsageKind::Enhancement.increment(&mut user.usage);
        })?;

        info!(
            cv_id,
            job_id = ctx.job_id(),
            version_number = version.version_number,
            "Optimization persisted"
        );

        Ok(ProcessorOutcome {
            result: json!({
                "noChange": false,
                "versionId": version.id,
                "versionNumber": version.version_number,
            }),
            cv_id: Some(cv_id),
            score: None,
        })
    }
}
