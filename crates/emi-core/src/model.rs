use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Token positions within a measurement row.
pub mod fields {
    pub const FREQUENCY: usize = 0;
    pub const READING_A: usize = 1;
    pub const READING_B: usize = 2;
    pub const CORRECTION: usize = 3;
    /// Sort key of the peak detector channel.
    pub const PEAK: usize = 4;
    pub const RESULT_B: usize = 5;
    pub const LIMIT: usize = 6;
    /// Sort key of the average detector channel.
    pub const AVERAGE: usize = 7;
    pub const LINE: usize = 9;
}

/// Detector channel whose ordering was kept for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Average,
    Peak,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Average => write!(f, "Average"),
            Channel::Peak => write!(f, "Peak"),
        }
    }
}

/// Line conductor a measurement was taken on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineId {
    Line,
    Neutral,
    Other(String),
}

impl LineId {
    pub fn from_token(token: &str) -> LineId {
        match token {
            "L1" => LineId::Line,
            "N" => LineId::Neutral,
            other => LineId::Other(other.to_string()),
        }
    }

    /// Label the template uses for this conductor in its line column.
    pub fn label(&self) -> &str {
        match self {
            LineId::Line => "Line",
            LineId::Neutral => "Neutral",
            LineId::Other(_) => "Unknown",
        }
    }
}

/// One row of the measurement table, kept as its whitespace tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub fields: Vec<String>,
    pub average: Decimal,
    pub peak: Decimal,
}

impl MeasurementRow {
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|s| s.as_str())
    }

    pub fn frequency(&self) -> Option<&str> {
        self.field(fields::FREQUENCY)
    }

    pub fn line(&self) -> LineId {
        LineId::from_token(self.field(fields::LINE).unwrap_or_default())
    }
}

/// Parsed content of one PDF test report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub serial: Option<String>,
    pub rated_power: Option<u32>,
    pub load_percent: Option<u32>,
    pub channel: Channel,
    /// Rows ranked by the winning channel, lowest value first. Never empty.
    pub rows: Vec<MeasurementRow>,
}

impl MeasurementReport {
    /// The lowest-ranked row, which is the one transcribed into the sheet.
    pub fn worst_row(&self) -> Option<&MeasurementRow> {
        self.rows.first()
    }
}

/// A report together with the file it was read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcedReport {
    pub file_name: String,
    pub report: MeasurementReport,
}

impl SourcedReport {
    /// UUT prefix of the source file name (text before the first `-`).
    pub fn uut_prefix(&self) -> &str {
        self.file_name.split('-').next().unwrap_or(&self.file_name)
    }
}

/// A source file that was left out of the run, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: String,
}

/// Everything a finished report run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutcome {
    pub uut_name: String,
    pub workbook: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    pub reports_placed: usize,
    pub uut_count: usize,
    pub rows_deleted: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedFile>,
    /// Non-fatal failures after the workbook was saved (archiving, embedding).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
