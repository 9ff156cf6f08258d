use emi_core::batch::{self, ReplaceJob};
use emi_core::docx::parse_string_set;
use emi_core::error::EmiError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use crate::output;

pub struct ReplaceArgs {
    pub source: PathBuf,
    pub target_dir: PathBuf,
    pub from: String,
    pub to: String,
    pub extra: Option<(String, String)>,
    pub seed: Option<u64>,
}

pub fn run(args: ReplaceArgs) -> Result<(), EmiError> {
    let job = ReplaceJob {
        source: args.source,
        target_dir: args.target_dir,
        sources: parse_string_set(&args.from),
        targets: parse_string_set(&args.to),
        extra: args.extra,
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let handle = batch::spawn("replace", move |sink, cancel| {
        batch::replace_documents(&job, &mut rng, &sink, &cancel)
    })?;
    super::print_progress(handle.events(), "Replacing");
    let summary = handle.join()?;
    output::table::print_summary(&summary, "generated");
    Ok(())
}
