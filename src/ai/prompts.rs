//! Prompt templates
//!
//! One versioned template per task, loaded once at startup into an immutable
//! cache. Builders interpolate the per-call inputs; the system messages carry
//! the schema contracts the JSON repair pass and validators rely on.

use serde_json::json;

use crate::domain::{CvContent, TargetJob};

/// Chat role for provider messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

const PARSE_SYSTEM_V2: &str = "\
You are a resume parser. Convert the raw text of a CV into JSON matching \
this schema exactly, with snake_case keys: {\"personal\": {\"name\", \
\"email\", \"phone\", \"location\", \"website\", \"linkedin\"}, \"summary\", \
\"experience\": [{\"title\", \"company\", \"location\", \"start_date\", \
\"end_date\", \"current\", \"description\", \"highlights\": []}], \
\"education\": [{\"degree\", \"institution\", \"location\", \"start_date\", \
\"end_date\", \"gpa\", \"details\": []}], \"skills\": {\"technical\": [], \
\"soft\": [], \"tools\": []}, \"projects\": [{\"name\", \"description\", \
\"technologies\": [], \"url\"}], \"certifications\": [{\"name\", \"issuer\", \
\"date\"}], \"languages\": [{\"language\", \"proficiency\"}]}. \
Omit fields you cannot find. Never invent information that is not present \
in the text. Respond with JSON only.";

const OPTIMIZE_SYSTEM_V2: &str = "\
You are a professional CV editor. Improve the provided CV content for the \
target role: strengthen impact verbs, quantify achievements where the source \
supports it, and align wording with the job description. Keep every fact \
truthful to the source; never fabricate employers, dates, degrees, or \
metrics. Preserve the JSON schema of the input exactly and respond with \
JSON only.";

const ATS_SYSTEM_V2: &str = "\
You are an applicant-tracking-system evaluator. Score the CV against the \
target job and respond with JSON only, using exactly these keys: \
{\"overallScore\": 0-100, \"keywordMatch\": 0-100, \"experienceMatch\": \
0-100, \"skillsMatch\": 0-100, \"breakdown\": {\"structure\": 0-40, \
\"skills\": 0-25, \"experience\": 0-25, \"formatting\": 0-10}, \
\"strengths\": [], \"weaknesses\": [], \"recommendations\": [], \
\"missingKeywords\": [], \"jobCompatibility\": {\"score\": 0-100, \
\"matchingSkills\": [], \"missingRequirements\": []}}. \
overallScore must equal the sum of the breakdown components.";

/// Appended on the re-prompt after an unrepairable JSON response.
pub const STRICT_JSON_SUFFIX: &str = "\
 Your previous response was not valid JSON. Respond with a single JSON \
object and nothing else: no markdown fences, no commentary, no trailing \
commas.";

/// Immutable template cache, built once at startup.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub parse_system: &'static str,
    pub optimize_system: &'static str,
    pub ats_system: &'static str,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            parse_system: PARSE_SYSTEM_V2,
            optimize_system: OPTIMIZE_SYSTEM_V2,
            ats_system: ATS_SYSTEM_V2,
        }
    }
}

impl PromptTemplates {
    /// Parse prompt: normalized text plus detected section headers as hints.
    pub fn parse_messages(&self, text: &str, section_hints: &[String]) -> Vec<ChatMessage> {
        let mut user = String::new();
        if !section_hints.is_empty() {
            user.push_str(&format!(
                "Detected section headers: {}.\n\n",
                section_hints.join(", ")
            ));
        }
        user.push_str("CV text:\n\n");
        user.push_str(text);

        vec![ChatMessage::system(self.parse_system), ChatMessage::user(user)]
    }

    /// Optimize prompt: source snapshot, target role, job description and
    /// an optional section filter.
    pub fn optimize_messages(
        &self,
        content: &CvContent,
        target_role: &str,
        job_description: Option<&str>,
        sections: &[String],
    ) -> Vec<ChatMessage> {
        let mut user = format!("Target role: {target_role}\n");
        if let Some(description) = job_description {
            if !description.trim().is_empty() {
                user.push_str(&format!("Job description:\n{description}\n"));
            }
        }
        if !sections.is_empty() {
            user.push_str(&format!(
                "Only rewrite these sections, return all others unchanged: {}.\n",
                sections.join(", ")
            ));
        }
        user.push_str("\nCV content:\n");
        user.push_str(&json!(content).to_string());

        vec![
            ChatMessage::system(self.optimize_system),
            ChatMessage::user(user),
        ]
    }

    /// ATS prompt: content snapshot plus the target job, if any.
    pub fn ats_messages(&self, content: &CvContent, target_job: Option<&TargetJob>) -> Vec<ChatMessage> {
        let mut user = String::new();
        match target_job {
            Some(job) if !job.title.is_empty() || !job.description.is_empty() => {
                user.push_str(&format!(
                    "Target job:\nTitle: {}\nDescription: {}\n",
                    job.title, job.description
                ));
                if !job.requirements.is_empty() {
                    user.push_str(&format!("Requirements: {}\n", job.requirements.join("; ")));
                }
            }
            _ => user.push_str("No target job provided; score general ATS readiness.\n"),
        }
        user.push_str("\nCV content:\n");
        user.push_str(&json!(content).to_string());

        vec![ChatMessage::system(self.ats_system), ChatMessage::user(user)]
    }
}
