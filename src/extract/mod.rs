//! Document text extraction
//!
//! MIME-dispatched strategies turning an uploaded CV blob into raw text for
//! the parse pipeline. PDF goes through `pdf-extract` (page count via
//! `lopdf`), DOCX through a zip + `word/document.xml` reader, and plain text
//! passes straight through.

pub mod docx;
pub mod normalize;
pub mod pdf;

use thiserror::Error;

use crate::error::{CoreError, ErrorCode};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("document decode failed: {0}")]
    Decode(String),

    #[error("document contains no extractable text")]
    NoText,
}

impl From<ExtractError> for CoreError {
    fn from(err: ExtractError) -> Self {
        let code = match err {
            ExtractError::UnsupportedType(_) => ErrorCode::UnsupportedFileType,
            ExtractError::Decode(_) | ExtractError::NoText => ErrorCode::CvParsingFailed,
        };
        CoreError::new(code, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Raw extraction output, before normalization.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: u32,
}

/// Dispatch on MIME type. The essence parameter form (`; charset=...`) is
/// tolerated.
pub fn extract(bytes: &[u8], mime_type: &str) -> Result<ExtractedText> {
    let essence = mime_type
        .parse::<mime::Mime>()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|_| mime_type.to_string());

    let extracted = match essence.as_str() {
        MIME_PDF => pdf::extract_pdf(bytes)?,
        MIME_DOCX => docx::extract_docx(bytes)?,
        MIME_TEXT => ExtractedText {
            text: String::from_utf8_lossy(bytes).into_owned(),
            page_count: 1,
        },
        other => return Err(ExtractError::UnsupportedType(other.to_string())),
    };

    if extracted.text.trim().is_empty() {
        return Err(ExtractError::NoText);
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        let out = extract(b"Jane Doe\nEngineer", "text/plain").unwrap();
        assert_eq!(out.text, "Jane Doe\nEngineer");
        assert_eq!(out.page_count, 1);
    }

    #[test]
    fn test_charset_parameter_tolerated() {
        let out = extract(b"Jane Doe", "text/plain; charset=utf-8").unwrap();
        assert_eq!(out.text, "Jane Doe");
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let err = extract(b"GIF89a", "image/gif").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = extract(b"   \n  ", "text/plain").unwrap_err();
        assert!(matches!(err, ExtractError::NoText));
    }
}
