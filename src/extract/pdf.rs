//! PDF text extraction

use super::{ExtractError, ExtractedText, Result};

/// Extract text and page count from PDF bytes.
pub fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractError::Decode(format!("pdf: {e}")))?;

    let page_count = lopdf::Document::load_mem(bytes)
        .map(|doc| doc.get_pages().len() as u32)
        .unwrap_or(1);

    Ok(ExtractedText { text, page_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let result = extract_pdf(b"this is not a pdf at all");
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }
}
