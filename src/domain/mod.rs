//! Domain entities
//!
//! The persistent documents the pipelines operate on. All ids are opaque,
//! globally unique (UUIDv7), and immutable; cross-user access is checked at
//! the service surface via the `is_owned_by` helpers.

pub mod ats;
pub mod companion;
pub mod content;
pub mod cv;
pub mod job;
pub mod user;
pub mod version;
pub mod webhook;

pub use ats::{AtsAnalysisType, AtsBreakdown, AtsReport, JobCompatibility, TargetJob};
pub use companion::{
    AtsAnalysis, CompanionStatus, CvParsingJob, ExtractionInfo, Generation, GenerationStats,
    OutputFile,
};
pub use content::CvContent;
pub use cv::{Cv, CvStatus, FileRef, ParsingStatus};
pub use job::{Job, JobAttempt, JobErrorInfo, JobStatus, JobType};
pub use user::{UsageKind, UsageLimits, UsageStats, User, UserStatus};
pub use version::{ChangeType, CvVersion, VersionMetadata};
pub use webhook::{
    DeliveryAttempt, DeliveryStats, DeliveryStatus, DomainEvent, EventType, RetryPolicy, Webhook,
    WebhookDelivery, WebhookFilters, WebhookStatus,
};
