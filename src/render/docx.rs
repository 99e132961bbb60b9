//! DOCX writer
//!
//! Emits a word-processing document directly: a minimal OPC package with
//! the main document part. Paragph styling is limited to headings and bold
//! runs; colors come from the customization's primary color.

use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;

use super::RenderError;
use super::templates::Customization;
use crate::domain::CvContent;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

/// Build a .docx byte buffer for the content.
pub fn build_docx(content: &CvContent, custom: &Customization) -> Result<Vec<u8>, RenderError> {
    let document = document_xml(content, custom);

    let docx_err = |e: &dyn std::fmt::Display| RenderError::Docx(e.to_string());

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();

        for (name, part) in [
            ("[Content_Types].xml", CONTENT_TYPES),
            ("_rels/.rels", ROOT_RELS),
            ("word/document.xml", document.as_str()),
        ] {
            writer.start_file(name, options).map_err(|e| docx_err(&e))?;
            writer.write_all(part.as_bytes()).map_err(|e| docx_err(&e))?;
        }

        writer.finish().map_err(|e| docx_err(&e))?;
    }

    Ok(cursor.into_inner())
}

fn document_xml(content: &CvContent, custom: &Customization) -> String {
    let color = custom.primary_color.trim_start_matches('#');
    let mut body = String::new();

    if let Some(name) = &content.personal.name {
        body.push_str(&heading(name, color, 36));
    }

    let contact: Vec<String> = [
        content.personal.email.as_deref(),
        content.personal.phone.as_deref(),
        content.personal.location.as_deref(),
    ]
    .iter()
    .flatten()
    .map(|v| v.to_string())
    .collect();
    if !contact.is_empty() {
        body.push_str(&paragraph(&contact.join(" | "), false));
    }

    if let Some(summary) = content.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        body.push_str(&heading("Summary", color, 26));
        body.push_str(&paragraph(summary, false));
    }

    if !content.experience.is_empty() {
        body.push_str(&heading("Experience", color, 26));
        for entry in &content.experience {
            let head: Vec<&str> = [entry.title.as_deref(), entry.company.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            body.push_str(&paragraph(&head.join(" — "), true));
            if let Some(description) = &entry.description {
                body.push_str(&paragraph(description, false));
            }
            for highlight in &entry.highlights {
                body.push_str(&paragraph(&format!("• {highlight}"), false));
            }
        }
    }

    if !content.education.is_empty() {
        body.push_str(&heading("Education", color, 26));
        for entry in &content.education {
            let head: Vec<&str> = [entry.degree.as_deref(), entry.institution.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            body.push_str(&paragraph(&head.join(" — "), true));
        }
    }

    if !content.skills.is_empty() {
        body.push_str(&heading("Skills", color, 26));
        let all: Vec<String> = content.skills.all().cloned().collect();
        body.push_str(&paragraph(&all.join(", "), false));
    }

    if !content.languages.is_empty() {
        body.push_str(&heading("Languages", color, 26));
        for lang in &content.languages {
            let mut line = lang.language.clone().unwrap_or_default();
            if let Some(proficiency) = &lang.proficiency {
                line.push_str(&format!(" ({proficiency})"));
            }
            body.push_str(&paragraph(&line, false));
        }
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    )
}

fn heading(text: &str, color: &str, half_points: u32) -> String {
    format!(
        "<w:p><w:r><w:rPr><w:b/><w:color w:val=\"{color}\"/><w:sz w:val=\"{half_points}\"/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        escape(text)
    )
}

fn paragraph(text: &str, bold: bool) -> String {
    let props = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        "<w:p><w:r>{props}<w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        escape(text)
    )
}
