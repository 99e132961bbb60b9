//! Document rendering
//!
//! Template application and rasterization for the generation pipeline.
//! Output is always an eager byte buffer: PDF via the headless-browser
//! adapter, DOCX emitted directly.

pub mod browser;
pub mod docx;
pub mod templates;

pub use browser::BrowserRasterizer;
pub use templates::{Customization, TemplateId, render_html};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::CvContent;
use crate::error::{CoreError, ErrorCode};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("browser error: {0}")]
    Browser(String),

    #[error("docx build error: {0}")]
    Docx(String),

    #[error("renderer produced an empty document")]
    EmptyOutput,
}

impl From<RenderError> for CoreError {
    fn from(err: RenderError) -> Self {
        // A dead browser endpoint is transient; a bad document is not
        let retryable = matches!(err, RenderError::Browser(_));
        CoreError::new(ErrorCode::GenerationFailed, err.to_string()).retryable(retryable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Docx,
}

impl OutputFormat {
    pub fn parse(s: &str) -> crate::error::CoreResult<Self> {
        match s {
            "pdf" => Ok(OutputFormat::Pdf),
            "docx" => Ok(OutputFormat::Docx),
            other => Err(CoreError::validation(format!(
                "unsupported output format: {other}"
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => crate::extract::MIME_DOCX,
        }
    }
}

/// Template application + rasterization behind one call.
#[derive(Clone)]
pub struct DocumentRenderer {
    rasterizer: BrowserRasterizer,
}

impl DocumentRenderer {
    pub fn new(rasterizer: BrowserRasterizer) -> Self {
        Self { rasterizer }
    }

    pub async fn render(
        &self,
        content: &CvContent,
        template: TemplateId,
        custom: &Customization,
        format: OutputFormat,
    ) -> Result<Vec<u8>, RenderError> {
        let bytes = match format {
            OutputFormat::Pdf => {
                self.rasterizer.health_check().await?;
                let html = render_html(content, template, custom);
                self.rasterizer.print_to_pdf(&html).await?
            }
            OutputFormat::Docx => docx::build_docx(content, custom)?,
        };

        if bytes.is_empty() {
            return Err(RenderError::EmptyOutput);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("pdf").unwrap(), OutputFormat::Pdf);
        assert_eq!(OutputFormat::parse("docx").unwrap(), OutputFormat::Docx);
        assert!(OutputFormat::parse("odt").is_err());
    }

    #[test]
    fn test_mime_and_extension() {
        assert_eq!(OutputFormat::Pdf.extension(), "pdf");
        assert_eq!(OutputFormat::Pdf.mime_type(), "application/pdf");
        assert_eq!(OutputFormat::Docx.extension(), "docx");
    }
}
