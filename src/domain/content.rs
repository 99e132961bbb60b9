//! Structured CV content
//!
//! The document shape shared by CVs, versions, parse results, and the
//! optimization/generation pipelines. Every field is optional or defaults to
//! empty so partially-populated model output still deserializes; emptiness
//! checks live here so callers never reimplement them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvContent {
    pub personal: PersonalInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub experience: Vec<ExperienceEntry>,
    pub education: Vec<EducationEntry>,
    pub skills: Skills,
    pub projects: Vec<ProjectEntry>,
    pub certifications: Vec<CertificationEntry>,
    pub languages: Vec<LanguageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EducationEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpa: Option<String>,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skills {
    pub technical: Vec<String>,
    pub soft: Vec<String>,
    pub tools: Vec<String>,
}

impl Skills {
    pub fn is_empty(&self) -> bool {
        self.technical.is_empty() && self.soft.is_empty() && self.tools.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.technical.iter().chain(&self.soft).chain(&self.tools)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub technologies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificationEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proficiency: Option<String>,
}

impl CvContent {
    /// True when no section carries meaningful text.
    pub fn is_empty(&self) -> bool {
        self.personal.name.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.summary.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.experience.is_empty()
            && self.education.is_empty()
            && self.skills.is_empty()
            && self.projects.is_empty()
            && self.certifications.is_empty()
            && self.languages.is_empty()
    }

    /// Number of top-level sections with content, out of eight.
    pub fn section_count(&self) -> u32 {
        let mut count = 0;
        if self.personal.name.is_some() || self.personal.email.is_some() {
            count += 1;
        }
        if self.summary.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            count += 1;
        }
        if !self.experience.is_empty() {
            count += 1;
        }
        if !self.education.is_empty() {
            count += 1;
        }
        if !self.skills.is_empty() {
            count += 1;
        }
        if !self.projects.is_empty() {
            count += 1;
        }
        if !self.certifications.is_empty() {
            count += 1;
        }
        if !self.languages.is_empty() {
            count += 1;
        }
        count
    }

    /// Whitespace-separated word count over all free-text fields.
    pub fn word_count(&self) -> u32 {
        let mut words = 0usize;

        fn count_opt(value: &Option<String>) -> usize {
            value.as_deref().map(|text| text.split_whitespace().count()).unwrap_or(0)
        }

        words += count_opt(&self.personal.name);
        words += count_opt(&self.summary);
        for entry in &self.experience {
            words += count_opt(&entry.title);
            words += count_opt(&entry.company);
            words += count_opt(&entry.description);
            words += entry
                .highlights
                .iter()
                .map(|h| h.split_whitespace().count())
                .sum::<usize>();
        }
        for entry in &self.education {
            words += count_opt(&entry.degree);
            words += count_opt(&entry.institution);
            words += entry
                .details
                .iter()
                .map(|d| d.split_whitespace().count())
                .sum::<usize>();
        }
        for project in &self.projects {
            words += count_opt(&project.name);
            words += count_opt(&project.description);
        }
        words += self.skills.all().map(|s| s.split_whitespace().count()).sum::<usize>();

        words as u32
    }

    /// Fraction of the required sections (name, summary, experience,
    /// education, skills) that are populated. Used as parse confidence.
    pub fn completeness(&self) -> f64 {
        let populated = [
            self.personal.name.as_deref().is_some_and(|s| !s.trim().is_empty()),
            self.summary.as_deref().is_some_and(|s| !s.trim().is_empty()),
            !self.experience.is_empty(),
            !self.education.is_empty(),
            !self.skills.is_empty(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        (populated as f64 / 5.0 * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_content() -> CvContent {
        CvContent {
            personal: PersonalInfo {
                name: Some("Ada Lovelace".to_string()),
                email: Some("ada@example.com".to_string()),
                ..Default::default()
            },
            summary: Some("Engineer with a decade of systems experience".to_string()),
            experience: vec![ExperienceEntry {
                title: Some("Principal Engineer".to_string()),
                company: Some("Analytical Engines Ltd".to_string()),
                highlights: vec!["Shipped the difference engine".to_string()],
                ..Default::default()
            }],
            education: vec![EducationEntry {
                degree: Some("BSc Mathematics".to_string()),
                institution: Some("University of London".to_string()),
                ..Default::default()
            }],
            skills: Skills {
                technical: vec!["Rust".to_string(), "Distributed systems".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_content() {
        assert!(CvContent::default().is_empty());
        assert!(!sample_content().is_empty());
    }

    #[test]
    fn test_section_count() {
        assert_eq!(CvContent::default().section_count(), 0);
        assert_eq!(sample_content().section_count(), 5);
    }

    #[test]
    fn test_completeness() {
        assert_eq!(CvContent::default().completeness(), 0.0);
        assert_eq!(sample_content().completeness(), 1.0);

        let mut partial = sample_content();
        partial.summary = None;
        partial.education.clear();
        assert_eq!(partial.completeness(), 0.6);
    }

    #[test]
    fn test_word_count_counts_highlights() {
        let content = sample_content();
        assert!(content.word_count() > 10);
    }

    #[test]
    fn test_partial_json_deserializes() {
        let content: CvContent =
            serde_json::from_str(r#"{"personal": {"name": "Grace"}}"#).unwrap();
        assert_eq!(content.personal.name.as_deref(), Some("Grace"));
        assert!(content.experience.is_empty());
    }
}
