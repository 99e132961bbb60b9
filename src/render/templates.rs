//! HTML templates
//!
//! Three built-in layouts producing a self-contained HTML document (inline
//! CSS, no external assets) ready for the rasterizer. Customization covers
//! colors, typography, and section order.

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

use crate::domain::CvContent;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateId {
    Modern,
    Professional,
    Minimal,
}

impl TemplateId {
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "modern" => Ok(TemplateId::Modern),
            "professional" => Ok(TemplateId::Professional),
            "minimal" => Ok(TemplateId::Minimal),
            other => Err(CoreError::validation(format!("unknown template: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::Modern => "modern",
            TemplateId::Professional => "professional",
            TemplateId::Minimal => "minimal",
        }
    }
}

/// Visual overrides applied on top of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Customization {
    pub primary_color: String,
    pub font_family: String,
    pub font_size: String,
    pub line_height: String,
    /// Section keys in render order; unknown keys are skipped, missing ones
    /// appended in default order.
    pub section_order: Vec<String>,
}

impl Default for Customization {
    fn default() -> Self {
        Self {
            primary_color: "#1f4e79".to_string(),
            font_family: "Helvetica, Arial, sans-serif".to_string(),
            font_size: "11pt".to_string(),
            line_height: "1.45".to_string(),
            section_order: Vec::new(),
        }
    }
}

const DEFAULT_SECTION_ORDER: &[&str] = &[
    "summary",
    "experience",
    "education",
    "skills",
    "projects",
    "certifications",
    "languages",
];

/// Render a complete HTML document for the given content.
pub fn render_html(content: &CvContent, template: TemplateId, custom: &Customization) -> String {
    let mut body = String::new();
    render_header(&mut body, content, template, custom);

    for section in ordered_sections(custom) {
        match section.as_str() {
            "summary" => render_summary(&mut body, content),
            "experience" => render_experience(&mut body, content),
            "education" => render_education(&mut body, content),
            "skills" => render_skills(&mut body, content),
            "projects" => render_projects(&mut body, content),
            "certifications" => render_certifications(&mut body, content),
            "languages" => render_languages(&mut body, content),
            _ => {}
        }
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{css}\n</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        title = esc(content.personal.name.as_deref().unwrap_or("Curriculum Vitae")),
        css = stylesheet(template, custom),
        body = body,
    )
}

fn ordered_sections(custom: &Customization) -> Vec<String> {
    let mut ordered: Vec<String> = custom
        .section_order
        .iter()
        .filter(|s| DEFAULT_SECTION_ORDER.contains(&s.as_str()))
        .cloned()
        .collect();
    for section in DEFAULT_SECTION_ORDER {
        if !ordered.iter().any(|s| s == section) {
            ordered.push(section.to_string());
        }
    }
    ordered
}

fn stylesheet(template: TemplateId, custom: &Customization) -> String {
    let base = format!(
        "body {{ font-family: {font}; font-size: {size}; line-height: {line}; color: #222; margin: 2.2em 2.6em; }}\n\
         h1 {{ color: {color}; margin: 0 0 0.1em 0; }}\n\
         h2 {{ color: {color}; text-transform: uppercase; font-size: 0.85em; letter-spacing: 0.08em; margin: 1.4em 0 0.4em 0; }}\n\
         ul {{ margin: 0.2em 0 0.6em 1.2em; padding: 0; }}\n\
         .meta {{ color: #555; }}\n\
         .entry {{ margin-bottom: 0.7em; }}\n\
         .entry-head {{ font-weight: bold; }}",
        font = custom.font_family,
        size = custom.font_size,
        line = custom.line_height,
        color = custom.primary_color,
    );

    let variant = match template {
        TemplateId::Modern => {
            "h1 { font-size: 1.9em; }\n\
             h2 { border-left: 4px solid; padding-left: 0.5em; }"
        }
        TemplateId::Professional => {
            "h1 { font-size: 1.6em; text-align: center; }\n\
             .contact { text-align: center; }\n\
             h2 { border-bottom: 1px solid #999; padding-bottom: 0.15em; }"
        }
        TemplateId::Minimal => {
            "h1 { font-size: 1.4em; font-weight: normal; }\n\
             h2 { font-weight: normal; }"
        }
    };

    format!("{base}\n{variant}")
}

fn render_header(out: &mut String, content: &CvContent, _template: TemplateId, _custom: &Customization) {
    let personal = &content.personal;
    out.push_str(&format!(
        "<h1>{}</h1>\n",
        esc(personal.name.as_deref().unwrap_or(""))
    ));

    let contact: Vec<String> = [
        personal.email.as_deref(),
        personal.phone.as_deref(),
        personal.location.as_deref(),
        personal.website.as_deref(),
        personal.linkedin.as_deref(),
    ]
    .iter()
    .flatten()
    .map(|v| esc(v).into_owned())
    .collect();

    if !contact.is_empty() {
        out.push_str(&format!(
            "<div class=\"contact meta\">{}</div>\n",
            contact.join(" · ")
        ));
    }
}

fn render_summary(out: &mut String, content: &CvContent) {
    if let Some(summary) = content.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str("<h2>Summary</h2>\n");
        out.push_str(&format!("<p>{}</p>\n", esc(summary)));
    }
}

fn render_experience(out: &mut String, content: &CvContent) {
    if content.experience.is_empty() {
        return;
    }
    out.push_str("<h2>Experience</h2>\n");
    for entry in &content.experience {
        out.push_str("<div class=\"entry\">\n");
        let head: Vec<String> = [entry.title.as_deref(), entry.company.as_deref()]
            .iter()
            .flatten()
            .map(|v| esc(v).into_owned())
            .collect();
        out.push_str(&format!(
            "<div class=\"entry-head\">{}</div>\n",
            head.join(" — ")
        ));

        let mut dates = Vec::new();
        if let Some(start) = &entry.start_date {
            dates.push(esc(start).into_owned());
        }
        if entry.current {
            dates.push("present".to_string());
        } else if let Some(end) = &entry.end_date {
            dates.push(esc(end).into_owned());
        }
        if !dates.is_empty() || entry.location.is_some() {
            let mut meta = dates.join(" – ");
            if let Some(location) = &entry.location {
                if !meta.is_empty() {
                    meta.push_str(" · ");
                }
                meta.push_str(&esc(location));
            }
            out.push_str(&format!("<div class=\"meta\">{meta}</div>\n"));
        }

        if let Some(description) = &entry.description {
            out.push_str(&format!("<p>{}</p>\n", esc(description)));
        }
        if !entry.highlights.is_empty() {
            out.push_str("<ul>\n");
            for highlight in &entry.highlights {
                out.push_str(&format!("<li>{}</li>\n", esc(highlight)));
            }
            out.push_str("</ul>\n");
        }
        out.push_str("</div>\n");
    }
}

fn render_education(out: &mut String, content: &CvContent) {
    if content.education.is_empty() {
        return;
    }
    out.push_str("<h2>Education</h2>\n");
    for entry in &content.education {
        out.push_str("<div class=\"entry\">\n");
        let head: Vec<String> = [entry.degree.as_deref(), entry.institution.as_deref()]
            .iter()
            .flatten()
            .map(|v| esc(v).into_owned())
            .collect();
        out.push_str(&format!(
            "<div class=\"entry-head\">{}</div>\n",
            head.join(" — ")
        ));
        if let Some(gpa) = &entry.gpa {
            out.push_str(&format!("<div class=\"meta\">GPA: {}</div>\n", esc(gpa)));
        }
        for detail in &entry.details {
            out.push_str(&format!("<div>{}</div>\n", esc(detail)));
        }
        out.push_str("</div>\n");
    }
}

fn render_skills(out: &mut String, content: &CvContent) {
    if content.skills.is_empty() {
        return;
    }
    out.push_str("<h2>Skills</h2>\n");
    for (label, list) in [
        ("Technical", &content.skills.technical),
        ("Tools", &content.skills.tools),
        ("Soft skills", &content.skills.soft),
    ] {
        if !list.is_empty() {
            let joined: Vec<String> = list.iter().map(|s| esc(s).into_owned()).collect();
            out.push_str(&format!(
                "<p><span class=\"entry-head\">{label}:</span> {}</p>\n",
                joined.join(", ")
            ));
        }
    }
}

fn render_projects(out: &mut String, content: &CvContent) {
    if content.projects.is_empty() {
        return;
    }
    out.push_str("<h2>Projects</h2>\n");
    for project in &content.projects {
        out.push_str("<div class=\"entry\">\n");
        if let Some(name) = &project.name {
            out.push_str(&format!("<div class=\"entry-head\">{}</div>\n", esc(name)));
        }
        if let Some(description) = &project.description {
            out.push_str(&format!("<p>{}</p>\n", esc(description)));
        }
        if !project.technologies.is_empty() {
            let tech: Vec<String> = project.technologies.iter().map(|t| esc(t).into_owned()).collect();
            out.push_str(&format!("<div class=\"meta\">{}</div>\n", tech.join(", ")));
        }
        out.push_str("</div>\n");
    }
}

fn render_certifications(out: &mut String, content: &CvContent) {
    if content.certifications.is_empty() {
        return;
    }
    out.push_str("<h2>Certifications</h2>\n<ul>\n");
    for cert in &content.certifications {
        let parts: Vec<String> = [cert.name.as_deref(), cert.issuer.as_deref(), cert.date.as_deref()]
            .iter()
            .flatten()
            .map(|v| esc(v).into_owned())
            .collect();
        out.push_str(&format!("<li>{}</li>\n", parts.join(", ")));
    }
    out.push_str("</ul>\n");
}

fn render_languages(out: &mut String, content: &CvContent) {
    if content.languages.is_empty() {
        return;
    }
    out.push_str("<h2>Languages</h2>\n<ul>\n");
    for lang in &content.languages {
        let mut line = esc(lang.language.as_deref().unwrap_or("")).into_owned();
        if let Some(proficiency) = &lang.proficiency {
            line.push_str(&format!(" ({})", esc(proficiency)));
        }
        out.push_str(&format!("<li>{line}</li>\n"));
    }
    out.push_str("</ul>\n");
}

fn esc(s: &str) -> std::borrow::Cow<'_, str> {
    escape(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::{ExperienceEntry, PersonalInfo, Skills};

    fn sample_content() -> CvContent {
        CvContent {
            personal: PersonalInfo {
                name: Some("Jane Doe".to_string()),
                email: Some("jane@example.com".to_string()),
                ..Default::default()
            },
            summary: Some("Engineer & architect".to_string()),
            experience: vec![ExperienceEntry {
                title: Some("Staff Engineer".to_string()),
                company: Some("Example Corp".to_string()),
                start_date: Some("2019".to_string()),
                current: true,
                highlights: vec!["Led the <platform> team".to_string()],
                ..Default::default()
            }],
            skills: Skills {
                technical: vec!["Rust".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_renders_self_contained_document() {
        let html = render_html(&sample_content(), TemplateId::Modern, &Customization::default());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<style>"));
        assert!(html.contains("Jane Doe"));
        assert!(html.contains("Staff Engineer"));
        assert!(!html.contains("http://"));
    }

    #[test]
    fn test_escapes_user_content() {
        let html = render_html(&sample_content(), TemplateId::Minimal, &Customization::default());
        assert!(html.contains("Led the &lt;platform&gt; team"));
        assert!(html.contains("Engineer &amp; architect"));
    }

    #[test]
    fn test_customization_applied() {
        let custom = Customization {
            primary_color: "#aa0000".to_string(),
            font_family: "Georgia, serif".to_string(),
            ..Default::default()
        };
        let html = render_html(&sample_content(), TemplateId::Professional, &custom);
        assert!(html.contains("#aa0000"));
        assert!(html.contains("Georgia, serif"));
    }

    #[test]
    fn test_section_order_respected() {
        let custom = Customization {
            section_order: vec!["skills".to_string(), "experience".to_string()],
            ..Default::default()
        };
        let html = render_html(&sample_content(), TemplateId::Modern, &custom);
        let skills_at = html.find("<h2>Skills</h2>").unwrap();
        let experience_at = html.find("<h2>Experience</h2>").unwrap();
        assert!(skills_at < experience_at);
    }

    #[test]
    fn test_empty_sections_omitted() {
        let html = render_html(&sample_content(), TemplateId::Modern, &Customization::default());
        assert!(!html.contains("<h2>Projects</h2>"));
        assert!(!html.contains("<h2>Languages</h2>"));
    }

    #[test]
    fn test_template_ids_parse() {
        assert_eq!(TemplateId::parse("modern").unwrap(), TemplateId::Modern);
        assert_eq!(TemplateId::parse("professional").unwrap(), TemplateId::Professional);
        assert_eq!(TemplateId::parse("minimal").unwrap(), TemplateId::Minimal);
        assert!(TemplateId::parse("baroque").is_err());
    }
}
