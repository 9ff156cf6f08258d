use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EmiError {
    #[error("PDF extraction failed: {0}")]
    Extraction(String),

    #[error("pdftotext not found. Install poppler: brew install poppler (macOS) or apt install poppler-utils (Linux)")]
    PdftotextNotFound,

    #[error("pdftotext failed with exit code {code}: {stderr}")]
    PdftotextFailed { code: i32, stderr: String },

    #[error("failed to parse report: {0}")]
    ParseError(String),

    #[error("no measurement rows found in report")]
    NoMeasurementRows,

    #[error("no template file found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("invalid template: {0}")]
    TemplateInvalid(String),

    #[error("template layout does not fit the worksheet: {0}")]
    Layout(String),

    #[error("no such directory: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("failed to load configuration from {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("number of UUTs is too many: {found} (at most {max} supported)")]
    CapacityExceeded { found: usize, max: usize },

    #[error("no measurement reports could be extracted")]
    NoReports,

    #[error("placement failed: {0}")]
    Placement(String),

    #[error("report '{file}' is missing the '{field}' field")]
    MissingField { file: String, field: &'static str },

    #[error("no load slot for {load}% found for serial '{serial}'")]
    LoadSlotNotFound { serial: String, load: u32 },

    #[error("serial '{serial}' does not fit in the {blocks} UUT block(s) kept in the template")]
    BlockOverflow { serial: String, blocks: usize },

    #[error("xlsx error: {0}")]
    Xlsx(String),

    #[error("docx error: {0}")]
    Docx(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("office automation failed: {0}")]
    Automation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("batch worker thread panicked")]
    WorkerPanicked,

    #[error("source and target string sets differ in length ({sources} vs {targets})")]
    StringSetMismatch { sources: usize, targets: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
