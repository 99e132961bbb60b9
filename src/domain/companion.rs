//! Companion rows
//!
//! Domain-specific documents joined 1:1 with a [`Job`](super::job::Job) via
//! `job_id`. Each stores snapshotted input (never a pointer to the mutable
//! `Cv.content`) and the pipeline's domain result. Completing a companion
//! must precede marking its job completed; failures update both atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ats::{AtsAnalysisType, AtsReport, TargetJob};
use super::content::CvContent;
use super::job::JobErrorInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CompanionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompanionStatus::Completed | CompanionStatus::Failed)
    }
}

/// Artifact metadata for a generated document in blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub file_name: String,
    /// Relative blob key, e.g. `generated/<job_id>.pdf`.
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationStats {
    pub page_count: u32,
    pub word_count: u32,
    pub processing_time_ms: u64,
}

/// Companion of a `generation` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub cv_id: Option<String>,
    pub status: CompanionStatus,
    /// Snapshot of everything the render needs: content, template,
    /// customization, output format.
    pub input_data: Value,
    pub output_file: Option<OutputFile>,
    pub stats: Option<GenerationStats>,
    pub error: Option<JobErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Generation {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        cv_id: Option<String>,
        input_data: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.into(),
            user_id: user_id.into(),
            cv_id,
            status: CompanionStatus::Pending,
            input_data,
            output_file: None,
            stats: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Companion of an `ats` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtsAnalysis {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub cv_id: String,
    pub analysis_type: AtsAnalysisType,
    pub target_job: Option<TargetJob>,
    /// Content snapshot taken at submission time.
    pub input_content: CvContent,
    pub status: CompanionStatus,
    pub results: Option<AtsReport>,
    pub processing_time_ms: Option<u64>,
    pub error: Option<JobErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AtsAnalysis {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        cv_id: impl Into<String>,
        analysis_type: AtsAnalysisType,
        target_job: Option<TargetJob>,
        input_content: CvContent,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.into(),
            user_id: user_id.into(),
            cv_id: cv_id.into(),
            analysis_type,
            target_job,
            input_content,
            status: CompanionStatus::Pending,
            results: None,
            processing_time_ms: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Extraction detail recorded while parsing an uploaded document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionInfo {
    pub page_count: u32,
    pub character_count: u32,
    pub detected_sections: Vec<String>,
}

/// Companion of a `parsing` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvParsingJob {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub cv_id: String,
    pub status: CompanionStatus,
    pub file_key: String,
    pub mime_type: String,
    pub extraction: Option<ExtractionInfo>,
    pub parsed_content: Option<CvContent>,
    /// Fraction of required sections the parse populated.
    pub confidence: Option<f64>,
    pub error: Option<JobErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CvParsingJob {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        cv_id: impl Into<String>,
        file_key: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.into(),
            user_id: user_id.into(),
            cv_id: cv_id.into(),
            status: CompanionStatus::Pending,
            file_key: file_key.into(),
            mime_type: mime_type.into(),
            extraction: None,
            parsed_content: None,
            confidence: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
