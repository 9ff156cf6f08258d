use emi_core::extraction::pdftotext::PdftotextExtractor;
use std::path::PathBuf;

use crate::output;

pub fn run(
    pdf_file: PathBuf,
    layout: bool,
    output_format: &str,
) -> Result<(), emi_core::error::EmiError> {
    super::require_pdftotext()?;
    let pdf_bytes = std::fs::read(&pdf_file)?;
    let extractor = PdftotextExtractor::new().with_layout(layout);
    let report = emi_core::parse_pdf(&pdf_bytes, &extractor)?;

    match output_format {
        "json" => output::json::print(&report)?,
        _ => println!("{}", output::table::format_report(&report)),
    }

    Ok(())
}
