mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "emi-report",
    version,
    about = "Conducted EMI report generator for power supply test reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append log output to a file instead of stderr
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the EMI workbook from a directory of measurement report PDFs
    Report {
        /// Directory holding the PDFs of one UUT model
        dir: PathBuf,

        /// Template workbook (default: template/2.1 Conducted EMI Measurement_<N>.xlsx)
        #[arg(short, long, value_name = "FILE")]
        template: Option<PathBuf>,

        /// Load conditions per rated power in the template (3 or 4)
        #[arg(short = 'n', long, default_value_t = 3)]
        load_qty: u32,

        /// Where the workbook and archive are written (default: parent of DIR)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// TOML file with report options
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Do not zip the source PDFs
        #[arg(long)]
        no_archive: bool,

        /// Embed the zip into the saved workbook
        #[arg(long, conflicts_with = "no_archive")]
        embed: bool,

        /// Output format: table (default) or json
        #[arg(short, long, default_value = "table")]
        output: String,
    },
    /// Parse one measurement report PDF (without touching any workbook)
    Parse {
        /// Path to the PDF
        input_file: PathBuf,

        /// Extract with pdftotext -layout
        #[arg(long)]
        layout: bool,

        /// Output format: table (default) or json
        #[arg(short, long, default_value = "table")]
        output: String,
    },
    /// Convert a .docx file, or every .docx in a directory, to PDF
    Docx2pdf {
        /// A .docx file or a directory
        path: PathBuf,
    },
    /// Derive reports for new serials by string replacement in .docx files
    Replace {
        /// A .docx file or a directory of them
        source: PathBuf,

        /// Directory the rewritten documents go to
        target_dir: PathBuf,

        /// Serials to replace, comma or whitespace separated
        #[arg(long = "from", value_name = "SET")]
        from: String,

        /// Replacement serials, pairwise with --from
        #[arg(long = "to", value_name = "SET")]
        to: String,

        /// One more string replaced in every document body
        #[arg(long, value_name = "TEXT", requires = "extra_to")]
        extra_from: Option<String>,

        #[arg(long, value_name = "TEXT", requires = "extra_from")]
        extra_to: Option<String>,

        /// Seed for the reading offsets (default: random)
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) -> std::io::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_ref()) {
        eprintln!("Error: cannot open log file: {e}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Report {
            dir,
            template,
            load_qty,
            out_dir,
            config,
            no_archive,
            embed,
            output,
        } => commands::report::run(commands::report::ReportArgs {
            dir,
            template,
            load_qty,
            out_dir,
            config,
            no_archive,
            embed,
            output,
        }),
        Commands::Parse {
            input_file,
            layout,
            output,
        } => commands::parse::run(input_file, layout, &output),
        Commands::Docx2pdf { path } => commands::docx2pdf::run(path),
        Commands::Replace {
            source,
            target_dir,
            from,
            to,
            extra_from,
            extra_to,
            seed,
        } => commands::replace::run(commands::replace::ReplaceArgs {
            source,
            target_dir,
            from,
            to,
            extra: extra_from.zip(extra_to),
            seed,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
