pub mod models;
pub mod sources;
pub mod validation;

pub use models::{
    AiConfig, AiProvider, BackoffConfig, BrowserStrategy, Config, QueueConfig, QueuesConfig,
    RateLimit, RenderConfig, RetentionConfig, StorageConfig, StorageProvider, TaskTuning,
};
pub use validation::{validate, ValidationError};

impl Config {
    /// Load and validate from all sources.
    pub fn load() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }
}
