//! Provider implementations
//!
//! One [`Provider`] per upstream service, each speaking its published wire
//! format over a shared reqwest client. Rate limits surface as
//! [`AiError::QuotaExceeded`] with the `Retry-After` hint when the provider
//! sends one; deadline overruns surface as [`AiError::Timeout`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use super::error::{AiError, Result};
use super::prompts::{ChatMessage, Role};

/// Output mode requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// Fully resolved call parameters (task tuning + per-call overrides).
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub format: ResponseFormat,
    pub model: String,
    pub host: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
    pub num_ctx: u32,
    pub repeat_penalty: f32,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Issue one completion call and return the raw text response.
    async fn call(&self, messages: &[ChatMessage], opts: &CallOptions) -> Result<String>;

    fn name(&self) -> &'static str;
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AiError::Provider(e.to_string()))
}

/// Map a non-success HTTP status into the error taxonomy.
async fn status_error(response: Response) -> AiError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        return AiError::QuotaExceeded { retry_after_ms };
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return AiError::Timeout;
    }
    let body = response.text().await.unwrap_or_default();
    AiError::Provider(format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn openai_style_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role { Role::System => "system", Role::User => "user" },
                "content": m.content,
            })
        })
        .collect()
}

/// Concatenate system + user content for single-prompt providers.
fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn extract_text(value: &Value, pointer: &str, provider: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AiError::Provider(format!("{provider}: unexpected response shape")))
}

// OpenAI

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
}

impl OpenAiProvider {
    const ENDPOINT: &'static str = "https://api.openai.com/v1/chat/completions";

    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self { client: http_client(timeout_secs)?, api_key })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn call(&self, messages: &[ChatMessage], opts: &CallOptions) -> Result<String> {
        let mut body = json!({
            "model": opts.model,
            "messages": openai_style_messages(messages),
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
            "top_p": opts.top_p,
        });
        if opts.format == ResponseFormat::Json {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(Self::ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let value: Value = response.json().await?;
        extract_text(&value, "/choices/0/message/content", self.name())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// Anthropic

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
}

impl AnthropicProvider {
    const ENDPOINT: &'static str = "https://api.anthropic.com/v1/messages";
    const VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self { client: http_client(timeout_secs)?, api_key })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn call(&self, messages: &[ChatMessage], opts: &CallOptions) -> Result<String> {
        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let user_messages: Vec<Value> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| json!({"role": "user", "content": m.content}))
            .collect();

        let body = json!({
            "model": opts.model,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "system": system,
            "messages": user_messages,
        });

        let response = self
            .client
            .post(Self::ENDPOINT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", Self::VERSION)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let value: Value = response.json().await?;
        extract_text(&value, "/content/0/text", self.name())
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

// Gemini

pub struct GeminiProvider {
    client: Client,
    api_key: String,
}

impl GeminiProvider {
    const BASE: &'static str = "https://generativelanguage.googleapis.com/v1beta/models";

    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self { client: http_client(timeout_secs)?, api_key })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn call(&self, messages: &[ChatMessage], opts: &CallOptions) -> Result<String> {
        let url = format!("{}/{}:generateContent?key={}", Self::BASE, opts.model, self.api_key);

        let mut generation_config = json!({
            "temperature": opts.temperature,
            "maxOutputTokens": opts.max_tokens,
            "topP": opts.top_p,
            "topK": opts.top_k,
        });
        if opts.format == ResponseFormat::Json {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let body = json!({
            "contents": [{"parts": [{"text": flatten_messages(messages)}]}],
            "generationConfig": generation_config,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let value: Value = response.json().await?;
        extract_text(&value, "/candidates/0/content/parts/0/text", self.name())
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// Hugging Face inference

pub struct HuggingFaceProvider {
    client: Client,
    api_key: String,
}

impl HuggingFaceProvider {
    const DEFAULT_HOST: &'static str = "https://api-inference.huggingface.co";

    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self { client: http_client(timeout_secs)?, api_key })
    }
}

#[async_trait]
impl Provider for HuggingFaceProvider {
    async fn call(&self, messages: &[ChatMessage], opts: &CallOptions) -> Result<String> {
        let host = opts.host.as_deref().unwrap_or(Self::DEFAULT_HOST);
        let url = format!("{}/models/{}", host.trim_end_matches('/'), opts.model);

        let body = json!({
            "inputs": flatten_messages(messages),
            "parameters": {
                "temperature": opts.temperature,
                "max_new_tokens": opts.max_tokens,
                "top_p": opts.top_p,
                "top_k": opts.top_k,
                "repetition_penalty": opts.repeat_penalty,
                "return_full_text": false,
            },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let value: Value = response.json().await?;
        extract_text(&value, "/0/generated_text", self.name())
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

// Ollama (self-hosted, per-task host)

pub struct OllamaProvider {
    client: Client,
}

impl OllamaProvider {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self { client: http_client(timeout_secs)? })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn call(&self, messages: &[ChatMessage], opts: &CallOptions) -> Result<String> {
        let host = opts
            .host
            .as_deref()
            .ok_or_else(|| AiError::Provider("ollama: no host configured for task".to_string()))?;
        let url = format!("{}/api/chat", host.trim_end_matches('/'));

        let mut body = json!({
            "model": opts.model,
            "messages": openai_style_messages(messages),
            "stream": false,
            "options": {
                "temperature": opts.temperature,
                "num_predict": opts.max_tokens,
                "top_p": opts.top_p,
                "top_k": opts.top_k,
                "num_ctx": opts.num_ctx,
                "repeat_penalty": opts.repeat_penalty,
            },
        });
        if opts.format == ResponseFormat::Json {
            body["format"] = json!("json");
        }

        debug!(url, model = %opts.model, "Ollama call");
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let value: Value = response.json().await?;
        extract_text(&value, "/message/content", self.name())
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

// Mock (tests and development)

/// Deterministic offline provider. Scripted responses pop first; otherwise
/// the reply is derived from the system prompt: parse requests get a minimal
/// parsed CV, optimize requests echo their input content, ATS requests get a
/// fixed mid-range report.
#[derive(Default)]
pub struct MockProvider {
    scripted: Mutex<VecDeque<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            scripted: Mutex::new(responses.into_iter().collect()),
        }
    }

    pub fn push_response(&self, response: String) {
        self.scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(response);
    }

    fn mock_parse(user_content: &str) -> String {
        let name = user_content
            .lines()
            .skip_while(|line| !line.contains("CV text:"))
            .skip(1)
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("Unknown Candidate");

        json!({
            "personal": {"name": name, "email": "candidate@example.com"},
            "summary": "Experienced professional.",
            "experience": [{
                "title": "Engineer",
                "company": "Example Corp",
                "current": true,
                "highlights": ["Delivered projects on time"],
            }],
            "education": [],
            "skills": {"technical": ["communication"], "soft": [], "tools": []},
        })
        .to_string()
    }

    fn mock_optimize(user_content: &str) -> String {
        // Echo the input snapshot untouched
        user_content
            .split_once("CV content:\n")
            .map(|(_, json)| json.trim().to_string())
            .unwrap_or_else(|| "{}".to_string())
    }

    fn mock_ats() -> String {
        json!({
            "overallScore": 68,
            "keywordMatch": 60.0,
            "experienceMatch": 70.0,
            "skillsMatch": 65.0,
            "breakdown": {"structure": 30.0, "skills": 17.0, "experience": 15.0, "formatting": 6.0},
            "strengths": ["Clear chronology"],
            "weaknesses": ["Sparse keywords"],
            "recommendations": ["Mirror terminology from the job description"],
            "missingKeywords": ["kubernetes"],
            "jobCompatibility": {"score": 62.0, "matchingSkills": ["rust"], "missingRequirements": ["on-call experience"]},
        })
        .to_string()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn call(&self, messages: &[ChatMessage], _opts: &CallOptions) -> Result<String> {
        if let Some(scripted) = self
            .scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
        {
            return Ok(scripted);
        }

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let user = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if system.contains("resume parser") {
            Ok(Self::mock_parse(user))
        } else if system.contains("CV editor") {
            Ok(Self::mock_optimize(user))
        } else if system.contains("applicant-tracking-system") {
            Ok(Self::mock_ats())
        } else {
            Ok("{}".to_string())
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
