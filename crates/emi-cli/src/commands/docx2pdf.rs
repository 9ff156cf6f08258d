use emi_core::batch;
use emi_core::error::EmiError;
use emi_core::office::SofficeBridge;
use std::path::PathBuf;

use crate::output;

pub fn run(path: PathBuf) -> Result<(), EmiError> {
    let handle = batch::spawn("docx2pdf", move |sink, cancel| {
        let bridge = SofficeBridge::new();
        batch::convert_documents(&path, &bridge, &sink, &cancel)
    })?;
    super::print_progress(handle.events(), "Converting");
    let summary = handle.join()?;
    output::table::print_summary(&summary, "converted");
    Ok(())
}
