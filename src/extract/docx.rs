//! DOCX text extraction
//!
//! A .docx file is a zip archive; the body lives in `word/document.xml`.
//! Text runs (`w:t`) concatenate within a paragraph (`w:p`), paragraphs
//! become lines.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{ExtractError, ExtractedText, Result};

pub fn extract_docx(bytes: &[u8]) -> Result<ExtractedText> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Decode(format!("docx zip: {e}")))?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Decode(format!("docx body: {e}")))?
        .read_to_string(&mut document_xml)
        .map_err(|e| ExtractError::Decode(format!("docx body: {e}")))?;

    let text = text_from_document_xml(&document_xml)?;

    Ok(ExtractedText {
        text,
        // Word does not persist page breaks in the body; pagination is a
        // render-time concern. One logical page.
        page_count: 1,
    })
}

fn text_from_document_xml(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map_err(|e| ExtractError::Decode(format!("docx xml: {e}")))?;
                text.push_str(&chunk);
            }
            Ok(Event::End(end)) if end.name().as_ref() == b"w:p" => text.push('\n'),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Decode(format!("docx xml: {e}"))),
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Minimal docx: enough OPC structure for the reader.
    pub(crate) fn build_test_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();

            writer
                .start_file("[Content_Types].xml", options)
                .unwrap();
            writer
                .write_all(br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#)
                .unwrap();

            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
                .collect();
            let document = format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
            );

            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(document.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_extract_paragraphs_as_lines() {
        let bytes = build_test_docx(&["Jane Doe", "EXPERIENCE", "Engineer at Example"]);
        let extracted = extract_docx(&bytes).unwrap();

        let lines: Vec<&str> = extracted.text.lines().collect();
        assert_eq!(lines, vec!["Jane Doe", "EXPERIENCE", "Engineer at Example"]);
    }

    #[test]
    fn test_entities_unescaped() {
        let bytes = build_test_docx(&["R&amp;D lead"]);
        let extracted = extract_docx(&bytes).unwrap();
        assert!(extracted.text.contains("R&D lead"));
    }

    #[test]
    fn test_invalid_zip_rejected() {
        let result = extract_docx(b"not a zip archive");
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }
}
