use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EmiError;

/// Options for one report run, fixed when the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportOptions {
    /// Zip the source PDFs next to the saved workbook.
    pub archive_sources: bool,
    /// Embed the zip into the workbook through the office bridge.
    pub embed_archive: bool,
    /// Close the spreadsheet application after embedding.
    pub close_spreadsheet: bool,
    /// Where default templates are looked up.
    pub template_dir: PathBuf,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            archive_sources: true,
            embed_archive: false,
            close_spreadsheet: false,
            template_dir: PathBuf::from("template"),
        }
    }
}

impl ReportOptions {
    /// Load options from a TOML file. Keys left out keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<ReportOptions, EmiError> {
        let text = std::fs::read_to_string(path).map_err(|e| EmiError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|reason| EmiError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<ReportOptions, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}
