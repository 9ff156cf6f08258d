use emi_core::batch;
use emi_core::config::ReportOptions;
use emi_core::error::EmiError;
use emi_core::extraction::pdftotext::PdftotextExtractor;
use emi_core::office::SofficeBridge;
use emi_core::template::LoadQty;
use emi_core::ReportJob;
use std::path::PathBuf;

use crate::output;

pub struct ReportArgs {
    pub dir: PathBuf,
    pub template: Option<PathBuf>,
    pub load_qty: u32,
    pub out_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub no_archive: bool,
    pub embed: bool,
    pub output: String,
}

pub fn run(args: ReportArgs) -> Result<(), EmiError> {
    super::require_pdftotext()?;
    let mut options = match &args.config {
        Some(path) => ReportOptions::from_toml_file(path)?,
        None => ReportOptions::default(),
    };
    if args.no_archive {
        options.archive_sources = false;
    }
    if args.embed {
        options.embed_archive = true;
    }

    let job = ReportJob {
        source_dir: args.dir,
        template: args.template,
        load_qty: LoadQty::coerce(args.load_qty),
        out_dir: args.out_dir,
        options,
    };
    log::info!("Source directory: {}", job.source_dir.display());
    log::info!("Template: {}", job.template_path().display());

    let handle = batch::spawn("emi-report", move |sink, cancel| {
        let extractor = PdftotextExtractor::new();
        let bridge = SofficeBridge::new();
        emi_core::generate_report(&job, &extractor, &bridge, &sink, &cancel)
    })?;
    super::print_progress(handle.events(), "Reading reports");
    let outcome = handle.join()?;

    match args.output.as_str() {
        "json" => output::json::print(&outcome)?,
        _ => {
            output::table::print_outcome(&outcome);
            output::table::print_checklist();
        }
    }

    Ok(())
}
