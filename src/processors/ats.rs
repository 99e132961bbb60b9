//! ATS analysis pipeline
//!
//! Step count depends on the analysis type (`comprehensive` walks all five,
//! `format_check` a single one). The companion snapshot of CV content is the
//! input; the normalized report (breakdown caps enforced, overall score
//! recomputed) is the output.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::ai::AiClient;
use crate::domain::{AtsAnalysisType, CompanionStatus, JobErrorInfo, JobType};
use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::queue::{JobContext, JobProcessor, ProcessorOutcome};
use crate::store::CoreStore;

pub struct AtsProcessor {
    store: CoreStore,
    ai: AiClient,
}

impl AtsProcessor {
    pub fn new(store: CoreStore, ai: AiClient) -> Self {
        Self { store, ai }
    }

    fn steps_for(analysis_type: AtsAnalysisType) -> &'static [&'static str] {
        match analysis_type {
            AtsAnalysisType::Compatibility => &["load-input", "llm-score", "persist-results"],
            AtsAnalysisType::KeywordAnalysis => &["llm-score", "persist-results"],
            AtsAnalysisType::FormatCheck => &["analyze"],
            AtsAnalysisType::Comprehensive => &[
                "load-input",
                "keyword-scan",
                "llm-score",
                "validate",
                "persist-results",
            ],
        }
    }
}

fn analysis_type_from(data: &Value) -> AtsAnalysisType {
    data.get("analysis_type")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(AtsAnalysisType::Comprehensive)
}

#[async_trait]
impl JobProcessor for AtsProcessor {
    fn job_type(&self) -> JobType {
        JobType::Ats
    }

    fn total_steps(&self, data: &Value) -> u32 {
        analysis_type_from(data).total_steps()
    }

    async fn run(&self, ctx: &JobContext, data: Value) -> CoreResult<ProcessorOutcome> {
        let job_id = ctx.job_id();
        let analysis_type = analysis_type_from(&data);
        let steps = Self::steps_for(analysis_type);
        let started = std::time::Instant::now();

        let companion = self
            .store
            .get_analysis(job_id)?
            .ok_or_else(|| CoreError::new(ErrorCode::JobInvalidState, "analysis companion missing"))?;

        if companion.status.is_terminal() {
            let score = companion.results.as_ref().map(|r| r.overall_score);
            return Ok(ProcessorOutcome {
                result: json!({"alreadyDone": true, "overallScore": score}),
                cv_id: Some(companion.cv_id),
                score: score.map(f64::from),
            });
        }

        self.store.update_analysis_with(job_id, |companion| {
            companion.status = CompanionStatus::Processing;
        })?;

        // Pre-scoring steps are checkpoints over the snapshot already on the
        // companion; the provider call happens at the llm step
        let llm_step = steps
            .iter()
            .position(|s| *s == "llm-score" || *s == "analyze")
            .unwrap_or(0);
        for (index, step) in steps.iter().take(llm_step + 1).enumerate() {
            ctx.checkpoint(index as u32, step)?;
        }

        let report = match self
            .ai
            .analyze_ats(&companion.input_content, companion.target_job.as_ref())
            .await
        {
            Ok(report) => report,
            Err(err) => {
                let core: CoreError = err.into();
                if !core.retryable {
                    self.store.update_analysis_with(job_id, |companion| {
                        companion.status = CompanionStatus::Failed;
                        companion.error = Some(JobErrorInfo::from(&core));
                        companion.completed_at = Some(chrono::Utc::now());
                    })?;
                }
                return Err(core);
            }
        };

        for (index, step) in steps.iter().enumerate().skip(llm_step + 1) {
            ctx.checkpoint(index as u32, step)?;
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let score = report.overall_score;
        self.store.update_analysis_with(job_id, |companion| {
            companion.status = CompanionStatus::Completed;
            companion.results = Some(report.clone());
            companion.processing_time_ms = Some(processing_time_ms);
            companion.completed_at = Some(chrono::Utc::now());
        })?;

        info!(
            job_id,
            cv_id = %companion.cv_id,
            analysis_type = ?analysis_type,
            score,
            "ATS analysis completed"
        );

        Ok(ProcessorOutcome {
            result: serde_json::to_value(&report)
                .map_err(|e| CoreError::new(ErrorCode::UnknownError, e.to_string()))?,
            cv_id: Some(companion.cv_id),
            score: Some(f64::from(score)),
        })
    }
}
