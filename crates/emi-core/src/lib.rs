pub mod archive;
pub mod batch;
pub mod config;
pub mod docx;
pub mod error;
pub mod extraction;
pub mod model;
pub mod office;
pub mod parsing;
pub mod placement;
pub mod sheet;
pub mod template;
pub mod xlsx;

use std::path::{Path, PathBuf};

use batch::{CancelToken, ProgressSink};
use config::ReportOptions;
use error::EmiError;
use extraction::PdfExtractor;
use model::{MeasurementReport, ReportOutcome};
use office::{EmbedRequest, OfficeBridge};
use sheet::{CellValue, Worksheet};
use template::naming::{output_file_name, uut_name};
use template::{default_template_path, LoadQty, TemplateLayout, DATA_SHEET, SETUP_SHEET};
use xlsx::XlsxWorkbook;

/// One report run: a directory of measurement PDFs for one UUT model.
#[derive(Debug, Clone)]
pub struct ReportJob {
    pub source_dir: PathBuf,
    /// Explicit template; the default for `load_qty` under
    /// `options.template_dir` otherwise.
    pub template: Option<PathBuf>,
    pub load_qty: LoadQty,
    /// Where the workbook and archive go; the source directory's parent
    /// otherwise.
    pub out_dir: Option<PathBuf>,
    pub options: ReportOptions,
}

impl ReportJob {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        ReportJob {
            source_dir: source_dir.into(),
            template: None,
            load_qty: LoadQty::default(),
            out_dir: None,
            options: ReportOptions::default(),
        }
    }

    pub fn template_path(&self) -> PathBuf {
        self.template
            .clone()
            .unwrap_or_else(|| default_template_path(&self.options.template_dir, self.load_qty))
    }

    pub fn output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.out_dir {
            return dir.clone();
        }
        self.source_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Extract and parse a single measurement report PDF.
pub fn parse_pdf(
    pdf_bytes: &[u8],
    extractor: &dyn PdfExtractor,
) -> Result<MeasurementReport, EmiError> {
    let pages = extractor.extract_pages(pdf_bytes)?;
    parsing::parse_pages(&pages)
}

/// Main API entry point: build the EMI workbook for a directory of reports.
///
/// Template, extraction and placement failures abort the run before
/// anything is saved. Archiving and embedding happen after the save; their
/// failures are logged and returned as warnings.
pub fn generate_report(
    job: &ReportJob,
    extractor: &dyn PdfExtractor,
    bridge: &dyn OfficeBridge,
    sink: &ProgressSink,
    cancel: &CancelToken,
) -> Result<ReportOutcome, EmiError> {
    if !job.source_dir.is_dir() {
        log::warn!("No such directory: {}", job.source_dir.display());
        return Err(EmiError::DirectoryNotFound(job.source_dir.clone()));
    }

    let template_path = job.template_path();
    if !template_path.is_file() {
        log::warn!("No template file found: {}", template_path.display());
        return Err(EmiError::TemplateNotFound(template_path));
    }
    let template_bytes = std::fs::read(&template_path)?;
    let layout = TemplateLayout::from_xlsx_bytes(&template_bytes)?;
    let mut workbook = XlsxWorkbook::from_bytes(&template_bytes)?;

    let read = batch::read_reports(&job.source_dir, extractor, sink, cancel)?;
    if read.cancelled {
        return Err(EmiError::Cancelled);
    }

    let uut = uut_name(&job.source_dir);
    let sheet = workbook.worksheet_mut(DATA_SHEET)?;
    sheet.set_cell(layout.model_cell, CellValue::Text(uut.clone()))?;
    let (prepared, placements) =
        placement::place_all(&read.reports, sheet, &layout, job.load_qty)?;

    workbook.remove_sheet(SETUP_SHEET)?;
    let out_dir = job.output_dir();
    std::fs::create_dir_all(&out_dir)?;
    let workbook_path = out_dir.join(output_file_name(&template_path, &uut));
    workbook.save(&workbook_path)?;
    log::info!("Saved {}", workbook_path.display());

    let mut outcome = ReportOutcome {
        uut_name: uut.clone(),
        workbook: workbook_path.clone(),
        archive: None,
        reports_placed: placements.len(),
        uut_count: prepared.num_uut,
        rows_deleted: prepared.rows_deleted,
        skipped: read.skipped,
        warnings: Vec::new(),
    };

    if job.options.archive_sources {
        let zip_path = out_dir.join(format!("{uut}.zip"));
        match archive::archive_pdfs(&job.source_dir, &zip_path) {
            Ok(_) => {
                outcome.archive = Some(zip_path.clone());
                if job.options.embed_archive {
                    let request = EmbedRequest::for_layout(
                        &workbook_path,
                        DATA_SHEET,
                        &zip_path,
                        &layout,
                        prepared.last_row,
                        job.options.close_spreadsheet,
                    );
                    if let Err(e) = bridge.embed_file(&request) {
                        log::error!("Embedding {} failed: {e}", zip_path.display());
                        outcome.warnings.push(format!("embedding archive failed: {e}"));
                    }
                }
            }
            Err(e) => {
                log::error!("Archiving PDFs failed: {e}");
                outcome.warnings.push(format!("archiving PDFs failed: {e}"));
            }
        }
    }

    Ok(outcome)
}
