use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::CvContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvStatus {
    Draft,
    Archived,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingStatus {
    None,
    Pending,
    Processing,
    Parsed,
    Failed,
}

/// Pointer to the originally uploaded document in blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub key: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// The root of user content. `content` mirrors the active version whenever
/// one exists; the version service is the only writer that may change both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cv {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: CvStatus,
    pub parsing_status: ParsingStatus,
    pub file_ref: Option<FileRef>,
    #[serde(default)]
    pub content: CvContent,
    pub active_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Cv {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            status: CvStatus::Draft,
            parsing_status: ParsingStatus::None,
            file_ref: None,
            content: CvContent::default(),
            active_version_id: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn with_file(mut self, file_ref: FileRef) -> Self {
        self.file_ref = Some(file_ref);
        self.parsing_status = ParsingStatus::Pending;
        self
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cv_defaults() {
        let cv = Cv::new("user-1", "Backend Engineer CV");
        assert_eq!(cv.status, CvStatus::Draft);
        assert_eq!(cv.parsing_status, ParsingStatus::None);
        assert!(cv.file_ref.is_none());
        assert!(cv.active_version_id.is_none());
        assert!(cv.content.is_empty());
    }

    #[test]
    fn test_with_file_marks_pending() {
        let cv = Cv::new("user-1", "Uploaded CV").with_file(FileRef {
            key: "uploads/user-1/cv.pdf".to_string(),
            file_name: "cv.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 52_000,
        });
        assert_eq!(cv.parsing_status, ParsingStatus::Pending);
    }

    #[test]
    fn test_ownership() {
        let cv = Cv::new("user-1", "CV");
        assert!(cv.is_owned_by("user-1"));
        assert!(!cv.is_owned_by("user-2"));
    }
}
