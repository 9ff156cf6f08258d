use crate::error::EmiError;
use crate::extraction::{PageContent, PdfExtractor};
use std::io::Write;
use std::process::Command;

/// PDF extraction backend using pdftotext (from poppler-utils).
///
/// Reading-order output is the default: measurement reports put each
/// labelled header field and each table row on its own line that way.
/// `-layout` can be switched on for reports whose columns only line up
/// when whitespace alignment is preserved.
pub struct PdftotextExtractor {
    layout: bool,
}

impl PdftotextExtractor {
    pub fn new() -> Self {
        PdftotextExtractor { layout: false }
    }

    pub fn with_layout(mut self, layout: bool) -> Self {
        self.layout = layout;
        self
    }

    /// Check if pdftotext is available on the system.
    pub fn is_available() -> bool {
        Command::new("pdftotext")
            .arg("-v")
            .output()
            .map(|o| o.status.success() || !o.stderr.is_empty())
            .unwrap_or(false)
    }
}

impl Default for PdftotextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfExtractor for PdftotextExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<PageContent>, EmiError> {
        let mut tmpfile =
            tempfile::NamedTempFile::new().map_err(|e| EmiError::Extraction(e.to_string()))?;
        tmpfile
            .write_all(pdf_bytes)
            .map_err(|e| EmiError::Extraction(e.to_string()))?;

        let mut command = Command::new("pdftotext");
        if self.layout {
            command.arg("-layout");
        }
        let output = command
            .arg(tmpfile.path())
            .arg("-") // output to stdout
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EmiError::PdftotextNotFound
                } else {
                    EmiError::Extraction(format!("pdftotext failed: {}", e))
                }
            })?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(EmiError::PdftotextFailed { code, stderr });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(split_pages(&text))
    }

    fn backend_name(&self) -> &str {
        "pdftotext"
    }
}

/// Split pdftotext output into pages (form feed `\x0c` separates pages).
///
/// pdftotext terminates the last page with a form feed too, so a trailing
/// empty chunk is dropped. The first page is always kept.
fn split_pages(text: &str) -> Vec<PageContent> {
    text.split('\x0c')
        .enumerate()
        .map(|(i, page_text)| PageContent::from_text(i + 1, page_text))
        .filter(|p| !p.lines.is_empty() || p.page_number == 1)
        .collect()
}
