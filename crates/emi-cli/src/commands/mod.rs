pub mod docx2pdf;
pub mod parse;
pub mod replace;
pub mod report;

use emi_core::batch::ProgressEvent;
use emi_core::error::EmiError;
use emi_core::extraction::pdftotext::PdftotextExtractor;
use std::sync::mpsc::Receiver;

/// Fail before any file is read when pdftotext is not installed.
pub(crate) fn require_pdftotext() -> Result<(), EmiError> {
    if PdftotextExtractor::is_available() {
        Ok(())
    } else {
        Err(EmiError::PdftotextNotFound)
    }
}

/// Print progress lines to stderr until the worker drops its sender.
pub(crate) fn print_progress(events: &Receiver<ProgressEvent>, what: &str) {
    for event in events.iter() {
        match event {
            ProgressEvent::Started { total } => eprintln!("{what}: {total} file(s)"),
            ProgressEvent::Advanced { done, total } => eprintln!("  [{done}/{total}]"),
            ProgressEvent::Finished { succeeded, failed } => {
                eprintln!("{what}: {succeeded} done, {failed} failed")
            }
        }
    }
}
