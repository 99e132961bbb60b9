use thiserror::Error;

use crate::error::{CoreError, ErrorCode};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("provider rate limit exceeded")]
    QuotaExceeded {
        /// Provider-suggested wait, from a `Retry-After` header when present.
        retry_after_ms: Option<u64>,
    },

    #[error("provider call timed out")]
    Timeout,

    #[error("unrepairable model response: {0}")]
    InvalidResponse(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::QuotaExceeded { .. } | AiError::Timeout)
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else {
            AiError::Provider(err.to_string())
        }
    }
}

impl From<AiError> for CoreError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::QuotaExceeded { retry_after_ms } => {
                let mut core = CoreError::new(ErrorCode::AiQuotaExceeded, "provider rate limit exceeded");
                if let Some(ms) = retry_after_ms {
                    core = core.with_retry_after(ms);
                }
                core
            }
            AiError::Timeout => CoreError::new(ErrorCode::AiTimeout, "provider call timed out"),
            AiError::InvalidResponse(msg) => CoreError::new(ErrorCode::AiInvalidResponse, msg),
            AiError::Provider(msg) => CoreError::new(ErrorCode::AiError, msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AiError>;
