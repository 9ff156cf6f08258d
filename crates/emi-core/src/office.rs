use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::error::EmiError;
use crate::sheet::CellRef;
use crate::template::TemplateLayout;

/// Request to embed a file as an object into a saved workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedRequest {
    pub workbook: PathBuf,
    pub sheet: String,
    /// Cell the embedded object is anchored at.
    pub anchor: CellRef,
    pub file: PathBuf,
    /// Row that gets a bottom border once the object is placed.
    pub border_row: u32,
    /// Inclusive column span of that border.
    pub border_cols: (u32, u32),
    /// Close the spreadsheet application when done.
    pub close_after: bool,
}

impl EmbedRequest {
    /// Anchor at `(first_row, last_col - 2)`, border along `last_row` from
    /// column 2 to `last_col - 1`.
    pub fn for_layout(
        workbook: &Path,
        sheet: &str,
        file: &Path,
        layout: &TemplateLayout,
        last_row: u32,
        close_after: bool,
    ) -> EmbedRequest {
        EmbedRequest {
            workbook: workbook.to_path_buf(),
            sheet: sheet.to_string(),
            anchor: CellRef::new(layout.first_row, layout.last_col.saturating_sub(2).max(1)),
            file: file.to_path_buf(),
            border_row: last_row,
            border_cols: (2, layout.last_col.saturating_sub(1).max(2)),
            close_after,
        }
    }
}

/// Desktop office automation used around the core pipeline.
pub trait OfficeBridge: Send + Sync {
    /// Convert a word-processor document to PDF at `pdf`.
    fn convert_to_pdf(&self, docx: &Path, pdf: &Path) -> Result<(), EmiError>;

    /// Embed a file into a workbook as described by the request.
    fn embed_file(&self, request: &EmbedRequest) -> Result<(), EmiError>;

    fn backend_name(&self) -> &str;
}

/// Bridge over a headless LibreOffice (`soffice`).
pub struct SofficeBridge {
    program: String,
}

impl SofficeBridge {
    pub fn new() -> Self {
        SofficeBridge {
            program: "soffice".into(),
        }
    }

    /// Use a specific executable, e.g. `libreoffice` or a full path.
    pub fn with_program(program: impl Into<String>) -> Self {
        SofficeBridge {
            program: program.into(),
        }
    }
}

impl Default for SofficeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl OfficeBridge for SofficeBridge {
    fn convert_to_pdf(&self, docx: &Path, pdf: &Path) -> Result<(), EmiError> {
        let out_dir = tempfile::tempdir()?;
        let output = Command::new(&self.program)
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir.path())
            .arg(docx)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EmiError::Automation(format!("{} not found; install LibreOffice", self.program))
                } else {
                    EmiError::Automation(format!("{} failed to start: {e}", self.program))
                }
            })?;

        if !output.status.success() {
            return Err(EmiError::Automation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stem = docx
            .file_stem()
            .ok_or_else(|| EmiError::Automation(format!("no file name in {}", docx.display())))?;
        let produced = out_dir
            .path()
            .join(format!("{}.pdf", stem.to_string_lossy()));
        if !produced.exists() {
            return Err(EmiError::Automation(format!(
                "{} produced no PDF for {}",
                self.program,
                docx.display()
            )));
        }
        std::fs::copy(&produced, pdf)?;
        Ok(())
    }

    fn embed_file(&self, request: &EmbedRequest) -> Result<(), EmiError> {
        Err(EmiError::Automation(format!(
            "embedding {} needs OLE automation, which {} does not provide",
            request.file.display(),
            self.program
        )))
    }

    fn backend_name(&self) -> &str {
        "soffice"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MODEL_CELL;

    #[test]
    fn test_embed_request_geometry() {
        let layout = TemplateLayout {
            first_row: 44,
            serial_col: 4,
            voltage_col: 11,
            line_col: 13,
            load_col: 14,
            last_row: 107,
            last_col: 27,
            model_cell: MODEL_CELL,
        };
        let req = EmbedRequest::for_layout(
            Path::new("out.xlsx"),
            "Conducted EMI",
            Path::new("U.zip"),
            &layout,
            59,
            false,
        );
        assert_eq!(req.anchor, CellRef::new(44, 25));
        assert_eq!(req.border_row, 59);
        assert_eq!(req.border_cols, (2, 26));
    }

    #[test]
    fn test_soffice_cannot_embed() {
        let bridge = SofficeBridge::new();
        let req = EmbedRequest {
            workbook: "a.xlsx".into(),
            sheet: "S".into(),
            anchor: CellRef::new(1, 1),
            file: "a.zip".into(),
            border_row: 1,
            border_cols: (2, 3),
            close_after: true,
        };
        assert!(matches!(bridge.embed_file(&req), Err(EmiError::Automation(_))));
    }

    #[test]
    fn test_missing_program_is_automation_error() {
        let bridge = SofficeBridge::with_program("emi-report-no-such-office-binary");
        let err = bridge
            .convert_to_pdf(Path::new("in.docx"), Path::new("out.pdf"))
            .unwrap_err();
        assert!(matches!(err, EmiError::Automation(_)));
    }
}
