pub mod pdftotext;

use crate::error::EmiError;

/// Content extracted from a single page of a PDF.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub page_number: usize,
    pub lines: Vec<String>,
}

impl PageContent {
    pub fn from_text(page_number: usize, text: &str) -> Self {
        PageContent {
            page_number,
            lines: text.lines().map(|l| l.to_string()).collect(),
        }
    }
}

/// Trait for PDF text extraction backends.
pub trait PdfExtractor: Send + Sync {
    /// Extract text content from PDF bytes, returning one PageContent per page.
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<PageContent>, EmiError>;

    /// Name of this extraction backend (for diagnostics).
    fn backend_name(&self) -> &str;
}
