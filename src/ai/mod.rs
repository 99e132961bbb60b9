//! LLM adapter
//!
//! Task-routed dispatch to a pluggable provider. Each logical task (`parse`,
//! `optimize`, `ats`) resolves its own host/model tuning from configuration;
//! JSON-mode calls run through the repair pass and one stricter re-prompt
//! before giving up. Providers are wired in at construction, never looked up
//! ambiently.

pub mod error;
pub mod prompts;
pub mod providers;
pub mod repair;

pub use error::{AiError, Result};
pub use prompts::{ChatMessage, PromptTemplates};
pub use providers::{CallOptions, MockProvider, Provider, ResponseFormat};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AiConfig, AiProvider, TaskTuning};
use crate::domain::{AtsReport, CvContent, TargetJob};

/// Logical tasks routed to per-task host/model tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiTask {
    Parse,
    Optimize,
    Ats,
}

impl AiTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiTask::Parse => "parse",
            AiTask::Optimize => "optimize",
            AiTask::Ats => "ats",
        }
    }
}

#[derive(Clone)]
pub struct AiClient {
    provider: Arc<dyn Provider>,
    templates: Arc<PromptTemplates>,
    config: AiConfig,
}

impl AiClient {
    /// Build the provider selected by configuration.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let timeout = config.timeout_secs;
        let provider: Arc<dyn Provider> = match config.provider {
            AiProvider::OpenAi => Arc::new(providers::OpenAiProvider::new(
                config.openai_api_key.clone().unwrap_or_default(),
                timeout,
            )?),
            AiProvider::Anthropic => Arc::new(providers::AnthropicProvider::new(
                config.anthropic_api_key.clone().unwrap_or_default(),
                timeout,
            )?),
            AiProvider::Gemini => Arc::new(providers::GeminiProvider::new(
                config.gemini_api_key.clone().unwrap_or_default(),
                timeout,
            )?),
            AiProvider::HuggingFace => Arc::new(providers::HuggingFaceProvider::new(
                config.hf_api_key.clone().unwrap_or_default(),
                timeout,
            )?),
            AiProvider::Ollama => Arc::new(providers::OllamaProvider::new(timeout)?),
            AiProvider::Mock => Arc::new(MockProvider::new()),
        };
        Ok(Self::with_provider(config.clone(), provider))
    }

    /// Inject a provider directly (tests, custom deployments).
    pub fn with_provider(config: AiConfig, provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            templates: Arc::new(PromptTemplates::default()),
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    fn tuning(&self, task: AiTask) -> &TaskTuning {
        match task {
            AiTask::Parse => &self.config.tasks.parse,
            AiTask::Optimize => &self.config.tasks.optimize,
            AiTask::Ats => &self.config.tasks.ats,
        }
    }

    fn call_options(&self, task: AiTask, format: ResponseFormat) -> CallOptions {
        let tuning = self.tuning(task);
        CallOptions {
            format,
            model: tuning.model.clone(),
            host: tuning.host.clone(),
            temperature: tuning.temperature,
            max_tokens: tuning.max_tokens,
            top_p: tuning.top_p,
            top_k: tuning.top_k,
            num_ctx: tuning.num_ctx,
            repeat_penalty: tuning.repeat_penalty,
        }
    }

    /// One provider call with transport-level retries: quota errors wait the
    /// provider's hint, timeouts back off exponentially with jitter.
    pub async fn call(
        &self,
        task: AiTask,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<String> {
        let opts = self.call_options(task, format);
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.provider.call(messages, &opts).await {
                Ok(raw) => {
                    debug!(
                        task = task.as_str(),
                        provider = self.provider.name(),
                        attempt,
                        chars = raw.len(),
                        "AI call succeeded"
                    );
                    return Ok(raw);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = match &err {
                        AiError::QuotaExceeded { retry_after_ms: Some(ms) } => *ms,
                        _ => jittered_backoff_ms(attempt),
                    };
                    warn!(
                        task = task.as_str(),
                        attempt,
                        wait_ms = wait,
                        error = %err,
                        "AI call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// JSON-mode call: repair the response, and re-issue once with a
    /// stricter instruction per remaining retry before failing as
    /// unrepairable.
    pub async fn call_json(&self, task: AiTask, messages: &[ChatMessage]) -> Result<Value> {
        let mut messages = messages.to_vec();
        let mut reprompts = 0;

        loop {
            let raw = self.call(task, &messages, ResponseFormat::Json).await?;
            if let Some(value) = repair::repair_to_value(&raw) {
                return Ok(value);
            }

            reprompts += 1;
            if reprompts > self.config.max_retries {
                return Err(AiError::InvalidResponse(format!(
                    "no parseable JSON after {reprompts} attempts"
                )));
            }
            warn!(task = task.as_str(), reprompts, "Unparseable JSON, re-prompting strictly");
            if let Some(system) = messages.iter_mut().find(|m| m.role == prompts::Role::System) {
                if !system.content.ends_with(prompts::STRICT_JSON_SUFFIX) {
                    system.content.push_str(prompts::STRICT_JSON_SUFFIX);
                }
            }
        }
    }

    /// `parse` task: normalized CV text (plus section hints) to structured
    /// content.
    pub async fn parse_cv(&self, text: &str, section_hints: &[String]) -> Result<CvContent> {
        let messages = self.templates.parse_messages(text, section_hints);
        let value = self.call_json(AiTask::Parse, &messages).await?;
        serde_json::from_value(value)
            .map_err(|e| AiError::InvalidResponse(format!("parse result: {e}")))
    }

    /// `optimize` task: rewritten content conforming to the same schema.
    pub async fn optimize_cv(
        &self,
        content: &CvContent,
        target_role: &str,
        job_description: Option<&str>,
        sections: &[String],
    ) -> Result<CvContent> {
        let messages =
            self.templates
                .optimize_messages(content, target_role, job_description, sections);
        let value = self.call_json(AiTask::Optimize, &messages).await?;
        serde_json::from_value(value)
            .map_err(|e| AiError::InvalidResponse(format!("optimize result: {e}")))
    }

    /// `ats` task: scored report, validated against the mandated shape and
    /// normalized so the score contract holds.
    pub async fn analyze_ats(
        &self,
        content: &CvContent,
        target_job: Option<&TargetJob>,
    ) -> Result<AtsReport> {
        let messages = self.templates.ats_messages(content, target_job);
        let value = self.call_json(AiTask::Ats, &messages).await?;
        validate_ats_shape(&value)?;
        let report: AtsReport = serde_json::from_value(value)
            .map_err(|e| AiError::InvalidResponse(format!("ats result: {e}")))?;
        Ok(report.normalized())
    }
}

/// Required keys the ATS prompt mandates. Anything missing rejects the
/// response before deserialization papers over it with defaults.
fn validate_ats_shape(value: &Value) -> Result<()> {
    const REQUIRED: &[&str] = &[
        "overallScore",
        "keywordMatch",
        "experienceMatch",
        "skillsMatch",
        "breakdown",
        "strengths",
        "weaknesses",
        "recommendations",
        "missingKeywords",
        "jobCompatibility",
    ];
    const BREAKDOWN: &[&str] = &["structure", "skills", "experience", "formatting"];

    let object = value
        .as_object()
        .ok_or_else(|| AiError::InvalidResponse("ats result is not an object".to_string()))?;
    for key in REQUIRED {
        if !object.contains_key(*key) {
            return Err(AiError::InvalidResponse(format!("ats result missing key: {key}")));
        }
    }
    let breakdown = object["breakdown"]
        .as_object()
        .ok_or_else(|| AiError::InvalidResponse("ats breakdown is not an object".to_string()))?;
    for key in BREAKDOWN {
        if !breakdown.contains_key(*key) {
            return Err(AiError::InvalidResponse(format!("ats breakdown missing key: {key}")));
        }
    }
    Ok(())
}

/// Exponential backoff with ±20% jitter: 500ms, 1s, 2s, ... capped at 30s.
fn jittered_backoff_ms(attempt: u32) -> u64 {
    let base = 500u64.saturating_mul(1 << attempt.saturating_sub(1).min(10));
    let capped = base.min(30_000);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    (capped as f64 * jitter) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mock_client() -> AiClient {
        AiClient::with_provider(AiConfig::default(), Arc::new(MockProvider::new()))
    }

    fn scripted_client(responses: Vec<String>) -> AiClient {
        AiClient::with_provider(
            AiConfig::default(),
            Arc::new(MockProvider::with_responses(responses)),
        )
    }

    #[tokio::test]
    async fn test_parse_cv_round_trip() {
        let client = mock_client();
        let content = client.parse_cv("Jane Doe\nEngineer", &[]).await.unwrap();
        assert_eq!(content.personal.name.as_deref(), Some("Jane Doe"));
        assert!(!content.skills.is_empty());
    }

    #[tokio::test]
    async fn test_call_json_repairs_fenced_output() {
        let client = scripted_client(vec![
            "```json\n{\"overallScore\": 50}\n```".to_string(),
        ]);
        let value = client
            .call_json(AiTask::Ats, &[ChatMessage::user("score this")])
            .await
            .unwrap();
        assert_eq!(value["overallScore"], 50);
    }

    #[tokio::test]
    async fn test_call_json_reprompts_then_fails() {
        // Three garbage responses: initial + two re-prompts (max_retries = 2)
        let client = scripted_client(vec![
            "not json".to_string(),
            "still not json".to_string(),
            "nope".to_string(),
        ]);
        let result = client
            .call_json(
                AiTask::Parse,
                &[ChatMessage::system("sys"), ChatMessage::user("parse")],
            )
            .await;
        assert!(matches!(result, Err(AiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_call_json_recovers_on_reprompt() {
        let client = scripted_client(vec![
            "garbage".to_string(),
            "{\"ok\": true}".to_string(),
        ]);
        let value = client
            .call_json(
                AiTask::Parse,
                &[ChatMessage::system("sys"), ChatMessage::user("parse")],
            )
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_ats_shape_validation_rejects_missing_keys() {
        let client = scripted_client(vec![json!({"overallScore": 10}).to_string()]);
        let result = client.analyze_ats(&CvContent::default(), None).await;
        assert!(matches!(result, Err(AiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_ats_report_normalized() {
        let client = mock_client();
        let report = client.analyze_ats(&CvContent::default(), None).await.unwrap();
        assert!(report.overall_score <= 100);
        assert!(report.breakdown.structure <= 40.0);
        assert!(report.breakdown.skills <= 25.0);
        assert!(report.breakdown.experience <= 25.0);
        assert!(report.breakdown.formatting <= 10.0);
        // Overall equals the rounded breakdown sum
        assert_eq!(report.overall_score, report.breakdown.overall_score());
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let first = jittered_backoff_ms(1);
        let third = jittered_backoff_ms(3);
        assert!(first >= 400 && first <= 600);
        assert!(third >= 1_600 && third <= 2_400);
    }
}
