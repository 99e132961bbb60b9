use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::CvContent;

/// What produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Manual,
    Optimization,
    Parsing,
    Import,
    AutoSave,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionMetadata {
    pub word_count: u32,
    pub section_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<f64>,
}

/// Immutable snapshot of a CV's content. Only `is_active` ever flips after
/// creation; an active version cannot be modified or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvVersion {
    pub id: String,
    pub cv_id: String,
    pub user_id: String,
    /// Strictly increasing per CV; uniqueness enforced by the store key.
    pub version_number: u32,
    pub name: Option<String>,
    pub description: Option<String>,
    pub change_type: ChangeType,
    pub content: CvContent,
    /// Canonical content digest; `None` for semantically empty content.
    pub content_hash: Option<String>,
    #[serde(default)]
    pub metadata: VersionMetadata,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CvVersion {
    pub fn new(
        cv_id: impl Into<String>,
        user_id: impl Into<String>,
        version_number: u32,
        content: CvContent,
        change_type: ChangeType,
    ) -> Self {
        let metadata = VersionMetadata {
            word_count: content.word_count(),
            section_count: content.section_count(),
            ai_confidence: None,
        };
        Self {
            id: Uuid::now_v7().to_string(),
            cv_id: cv_id.into(),
            user_id: user_id.into(),
            version_number,
            name: None,
            description: None,
            change_type,
            content,
            content_hash: None,
            metadata,
            is_active: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::PersonalInfo;

    #[test]
    fn test_new_version_collects_metadata() {
        let content = CvContent {
            personal: PersonalInfo {
                name: Some("Ada Lovelace".to_string()),
                ..Default::default()
            },
            summary: Some("Systems engineer".to_string()),
            ..Default::default()
        };

        let version = CvVersion::new("cv-1", "user-1", 1, content, ChangeType::Parsing);
        assert_eq!(version.version_number, 1);
        assert_eq!(version.metadata.section_count, 2);
        assert!(version.metadata.word_count >= 4);
        assert!(!version.is_active);
    }
}
