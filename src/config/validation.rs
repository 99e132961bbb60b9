use super::models::{AiProvider, BrowserStrategy, Config, StorageProvider};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("AI provider '{provider}' requires {variable} to be set")]
    MissingProviderKey { provider: String, variable: String },

    #[error("AI provider '{provider}' requires a host for task '{task}'")]
    MissingTaskHost { provider: String, task: String },

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("Storage provider is S3 but no bucket configured")]
    MissingS3Bucket,

    #[error("Remote browser strategy requires render.browser_endpoint")]
    MissingBrowserEndpoint,

    #[error("Queue '{queue}' must have concurrency >= 1")]
    ZeroConcurrency { queue: String },

    #[error("Queue '{queue}' default priority {priority} is outside 0..=10")]
    PriorityOutOfRange { queue: String, priority: u8 },

    #[error("Retention must be positive: {field}")]
    InvalidRetention { field: String },
}

/// Validate the entire configuration.
///
/// Strict only for the selected provider and storage backend: a missing key
/// for an inactive provider is a warning, not an error.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_ai(config)?;
    validate_storage(config)?;
    validate_render(config)?;
    validate_queues(config)?;
    validate_retention(config)?;
    Ok(())
}

fn validate_ai(config: &Config) -> Result<(), ValidationError> {
    let ai = &config.ai;

    let required: Option<(&Option<String>, &str)> = match ai.provider {
        AiProvider::OpenAi => Some((&ai.openai_api_key, "OPENAI_API_KEY")),
        AiProvider::Anthropic => Some((&ai.anthropic_api_key, "ANTHROPIC_API_KEY")),
        AiProvider::Gemini => Some((&ai.gemini_api_key, "GEMINI_API_KEY")),
        AiProvider::HuggingFace => Some((&ai.hf_api_key, "HF_API_KEY")),
        AiProvider::Ollama | AiProvider::Mock => None,
    };

    if let Some((key, variable)) = required {
        if key.is_none() {
            return Err(ValidationError::MissingProviderKey {
                provider: provider_name(ai.provider).to_string(),
                variable: variable.to_string(),
            });
        }
    }

    if ai.provider.is_self_hosted() {
        for (task, tuning) in [
            ("parse", &ai.tasks.parse),
            ("optimize", &ai.tasks.optimize),
            ("ats", &ai.tasks.ats),
        ] {
            if tuning.host.is_none() {
                return Err(ValidationError::MissingTaskHost {
                    provider: provider_name(ai.provider).to_string(),
                    task: task.to_string(),
                });
            }
        }
    }

    // Keys for inactive providers are informational only
    for (present, variable, provider) in [
        (ai.openai_api_key.is_some(), "OPENAI_API_KEY", AiProvider::OpenAi),
        (ai.anthropic_api_key.is_some(), "ANTHROPIC_API_KEY", AiProvider::Anthropic),
        (ai.gemini_api_key.is_some(), "GEMINI_API_KEY", AiProvider::Gemini),
        (ai.hf_api_key.is_some(), "HF_API_KEY", AiProvider::HuggingFace),
    ] {
        if !present && provider != ai.provider {
            warn!(variable, "API key for inactive provider not set");
        }
    }

    Ok(())
}

fn provider_name(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::OpenAi => "openai",
        AiProvider::Anthropic => "anthropic",
        AiProvider::Gemini => "gemini",
        AiProvider::HuggingFace => "huggingface",
        AiProvider::Ollama => "ollama",
        AiProvider::Mock => "mock",
    }
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::S3 {
        if config.storage.access_key.is_none() || config.storage.secret_key.is_none() {
            return Err(ValidationError::MissingS3Credentials);
        }
        if config.storage.bucket.is_empty() {
            return Err(ValidationError::MissingS3Bucket);
        }
    }
    Ok(())
}

fn validate_render(config: &Config) -> Result<(), ValidationError> {
    if config.render.browser == BrowserStrategy::Remote
        && config.render.browser_endpoint.is_none()
    {
        return Err(ValidationError::MissingBrowserEndpoint);
    }
    Ok(())
}

fn validate_queues(config: &Config) -> Result<(), ValidationError> {
    for (name, queue) in [
        ("parsing", &config.queues.parsing),
        ("optimization", &config.queues.optimization),
        ("generation", &config.queues.generation),
        ("ats", &config.queues.ats),
        ("webhook_delivery", &config.queues.webhook_delivery),
    ] {
        if queue.concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency {
                queue: name.to_string(),
            });
        }
        if queue.priority > 10 {
            return Err(ValidationError::PriorityOutOfRange {
                queue: name.to_string(),
                priority: queue.priority,
            });
        }
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.completed_jobs_days == 0 {
        return Err(ValidationError::InvalidRetention {
            field: "completed_jobs_days".to_string(),
        });
    }
    if config.retention.failed_jobs_days == 0 {
        return Err(ValidationError::InvalidRetention {
            field: "failed_jobs_days".to_string(),
        });
    }
    if config.retention.deliveries_days == 0 {
        return Err(ValidationError::InvalidRetention {
            field: "deliveries_days".to_string(),
        });
    }
    Ok(())
}
