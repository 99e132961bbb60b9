//! Core error taxonomy
//!
//! Every failure that crosses an area boundary is folded into a [`CoreError`]:
//! a stable machine code, a human message, the HTTP-class status the upstream
//! layer should map it to, and retry metadata the job engine consults.
//! Area-local errors (`StorageError`, `AiError`, `QueueError`, ...) convert
//! into this type at the seam via `From` impls next to their definitions.

use serde_json::Value;
use thiserror::Error;

/// Stable error codes, grouped by domain.
///
/// Numeric ranges: generic 1xxx, jobs 2xxx, files 3xxx, CV 4xxx, generation
/// 41xx, database 5xxx, external services 6xxx, auth 7xxx, user 8xxx,
/// webhooks 9xxx, ATS 10xxx, optimization 11xxx, parsing 12xxx, versions
/// 13xxx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Generic
    UnknownError,
    ValidationError,
    NotFound,
    Conflict,
    // Jobs
    JobNotFound,
    JobQueueError,
    JobMaxRetriesExceeded,
    JobCancelled,
    JobTimeout,
    JobInvalidState,
    // Files
    FileNotFound,
    FileInvalid,
    ProviderError,
    // CV
    CvNotFound,
    CvNoFileToParse,
    // Generation
    GenerationNotFound,
    GenerationFailed,
    GenerationNotReady,
    // Database
    DatabaseError,
    // External services
    AiQuotaExceeded,
    AiTimeout,
    AiInvalidResponse,
    AiError,
    // Auth
    Forbidden,
    // User
    UserNotFound,
    UserInactive,
    UserLocked,
    UsageLimitExceeded,
    // Webhooks
    WebhookNotFound,
    WebhookSuspended,
    WebhookDeliveryFailed,
    // ATS
    AtsAnalysisFailed,
    // Optimization
    OptimizationFailed,
    // Parsing
    CvParsingFailed,
    UnsupportedFileType,
    // Versions
    VersionNotFound,
    VersionActive,
    VersionConflict,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::JobQueueError => "JOB_QUEUE_ERROR",
            ErrorCode::JobMaxRetriesExceeded => "JOB_MAX_RETRIES_EXCEEDED",
            ErrorCode::JobCancelled => "JOB_CANCELLED",
            ErrorCode::JobTimeout => "JOB_TIMEOUT",
            ErrorCode::JobInvalidState => "JOB_INVALID_STATE",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FileInvalid => "FILE_INVALID",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::CvNotFound => "CV_NOT_FOUND",
            ErrorCode::CvNoFileToParse => "CV_NO_FILE_TO_PARSE",
            ErrorCode::GenerationNotFound => "GENERATION_NOT_FOUND",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::GenerationNotReady => "GENERATION_NOT_READY",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::AiQuotaExceeded => "AI_QUOTA_EXCEEDED",
            ErrorCode::AiTimeout => "AI_TIMEOUT",
            ErrorCode::AiInvalidResponse => "AI_INVALID_RESPONSE",
            ErrorCode::AiError => "AI_ERROR",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::UserInactive => "USER_INACTIVE",
            ErrorCode::UserLocked => "USER_LOCKED",
            ErrorCode::UsageLimitExceeded => "USAGE_LIMIT_EXCEEDED",
            ErrorCode::WebhookNotFound => "WEBHOOK_NOT_FOUND",
            ErrorCode::WebhookSuspended => "WEBHOOK_SUSPENDED",
            ErrorCode::WebhookDeliveryFailed => "WEBHOOK_DELIVERY_FAILED",
            ErrorCode::AtsAnalysisFailed => "ATS_ANALYSIS_FAILED",
            ErrorCode::OptimizationFailed => "OPTIMIZATION_FAILED",
            ErrorCode::CvParsingFailed => "CV_PARSING_FAILED",
            ErrorCode::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            ErrorCode::VersionNotFound => "VERSION_NOT_FOUND",
            ErrorCode::VersionActive => "VERSION_ACTIVE",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
        }
    }

    /// Numeric identifier within the domain grouping.
    pub fn numeric(&self) -> u16 {
        match self {
            ErrorCode::UnknownError => 1000,
            ErrorCode::ValidationError => 1001,
            ErrorCode::NotFound => 1002,
            ErrorCode::Conflict => 1003,
            ErrorCode::JobNotFound => 2000,
            ErrorCode::JobQueueError => 2001,
            ErrorCode::JobMaxRetriesExceeded => 2002,
            ErrorCode::JobCancelled => 2003,
            ErrorCode::JobTimeout => 2004,
            ErrorCode::JobInvalidState => 2005,
            ErrorCode::FileNotFound => 3000,
            ErrorCode::FileInvalid => 3001,
            ErrorCode::ProviderError => 3002,
            ErrorCode::CvNotFound => 4000,
            ErrorCode::CvNoFileToParse => 4001,
            ErrorCode::GenerationNotFound => 4100,
            ErrorCode::GenerationFailed => 4101,
            ErrorCode::GenerationNotReady => 4102,
            ErrorCode::DatabaseError => 5000,
            ErrorCode::AiQuotaExceeded => 6000,
            ErrorCode::AiTimeout => 6001,
            ErrorCode::AiInvalidResponse => 6002,
            ErrorCode::AiError => 6003,
            ErrorCode::Forbidden => 7000,
            ErrorCode::UserNotFound => 8000,
            ErrorCode::UserInactive => 8001,
            ErrorCode::UserLocked => 8002,
            ErrorCode::UsageLimitExceeded => 8003,
            ErrorCode::WebhookNotFound => 9000,
            ErrorCode::WebhookSuspended => 9001,
            ErrorCode::WebhookDeliveryFailed => 9002,
            ErrorCode::AtsAnalysisFailed => 10000,
            ErrorCode::OptimizationFailed => 11000,
            ErrorCode::CvParsingFailed => 12000,
            ErrorCode::UnsupportedFileType => 12001,
            ErrorCode::VersionNotFound => 13000,
            ErrorCode::VersionActive => 13001,
            ErrorCode::VersionConflict => 13002,
        }
    }

    /// HTTP-class status the upstream surface maps this code to.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError
            | ErrorCode::FileInvalid
            | ErrorCode::CvNoFileToParse
            | ErrorCode::UnsupportedFileType
            | ErrorCode::JobInvalidState
            | ErrorCode::VersionActive => 400,
            ErrorCode::Forbidden | ErrorCode::UserInactive | ErrorCode::UserLocked => 403,
            ErrorCode::NotFound
            | ErrorCode::JobNotFound
            | ErrorCode::FileNotFound
            | ErrorCode::CvNotFound
            | ErrorCode::GenerationNotFound
            | ErrorCode::UserNotFound
            | ErrorCode::WebhookNotFound
            | ErrorCode::VersionNotFound => 404,
            ErrorCode::Conflict
            | ErrorCode::VersionConflict
            | ErrorCode::GenerationNotReady
            | ErrorCode::WebhookSuspended => 409,
            ErrorCode::UsageLimitExceeded | ErrorCode::AiQuotaExceeded => 429,
            ErrorCode::AiTimeout | ErrorCode::JobTimeout => 504,
            _ => 500,
        }
    }

    /// Whether the job engine may retry a failure carrying this code.
    /// `UNKNOWN_ERROR` is retryable as a safety net, but the engine caps it
    /// at a single retry.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::AiQuotaExceeded
                | ErrorCode::AiTimeout
                | ErrorCode::ProviderError
                | ErrorCode::JobTimeout
                | ErrorCode::DatabaseError
                | ErrorCode::UnknownError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error value every service method and processor surfaces.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    /// Suggested wait before retrying, in milliseconds.
    pub retry_after: Option<u64>,
    pub context: Option<Value>,
}

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.default_retryable(),
            retry_after: None,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_retry_after(mut self, millis: u64) -> Self {
        self.retry_after = Some(millis);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_groups() {
        assert_eq!(ErrorCode::JobQueueError.numeric() / 1000, 2);
        assert_eq!(ErrorCode::FileInvalid.numeric() / 1000, 3);
        assert_eq!(ErrorCode::WebhookSuspended.numeric() / 1000, 9);
        assert_eq!(ErrorCode::VersionConflict.numeric(), 13002);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::ValidationError.status_code(), 400);
        assert_eq!(ErrorCode::Forbidden.status_code(), 403);
        assert_eq!(ErrorCode::CvNotFound.status_code(), 404);
        assert_eq!(ErrorCode::AiQuotaExceeded.status_code(), 429);
        assert_eq!(ErrorCode::UnknownError.status_code(), 500);
    }

    #[test]
    fn test_default_retryability() {
        assert!(ErrorCode::AiQuotaExceeded.default_retryable());
        assert!(ErrorCode::AiTimeout.default_retryable());
        assert!(!ErrorCode::AiInvalidResponse.default_retryable());
        assert!(!ErrorCode::ValidationError.default_retryable());
    }

    #[test]
    fn test_builder() {
        let err = CoreError::new(ErrorCode::AiQuotaExceeded, "rate limited")
            .with_retry_after(30_000);
        assert!(err.retryable);
        assert_eq!(err.retry_after, Some(30_000));
        assert_eq!(err.to_string(), "AI_QUOTA_EXCEEDED: rate limited");
    }
}
