use emi_core::batch::BatchSummary;
use emi_core::model::{MeasurementReport, ReportOutcome};

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

pub fn format_report(report: &MeasurementReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("  Serial:       {}\n", or_dash(report.serial.as_ref())));
    out.push_str(&format!(
        "  Rated power:  {}\n",
        or_dash(report.rated_power.map(|p| format!("{p} W")))
    ));
    out.push_str(&format!(
        "  Load:         {}\n",
        or_dash(report.load_percent.map(|l| format!("{l}%")))
    ));
    out.push_str(&format!("  Channel:      {}\n", report.channel));
    out.push_str(&format!("  Rows:         {}\n\n", report.rows.len()));

    // Rows in ranked order; the first one is what goes into the workbook.
    for (i, row) in report.rows.iter().enumerate() {
        let marker = if i == 0 { "*" } else { " " };
        out.push_str(&format!(
            "  {marker} {:<8} {:<8} avg {:<8} peak {:<8} {}\n",
            row.frequency().unwrap_or("-"),
            row.line().label(),
            row.average.to_string(),
            row.peak.to_string(),
            row.fields.join(" ")
        ));
    }

    out
}

pub fn print_outcome(outcome: &ReportOutcome) {
    println!("=== {} ===\n", outcome.uut_name);
    println!("  Workbook:  {}", outcome.workbook.display());
    if let Some(archive) = &outcome.archive {
        println!("  Archive:   {}", archive.display());
    }
    println!(
        "  Placed {} report(s) for {} UUT(s), {} template row(s) removed\n",
        outcome.reports_placed, outcome.uut_count, outcome.rows_deleted
    );

    if !outcome.skipped.is_empty() {
        println!("  Skipped files:");
        let width = outcome
            .skipped
            .iter()
            .map(|s| s.file_name.len())
            .max()
            .unwrap_or(10);
        for s in &outcome.skipped {
            println!("    {:<width$}  {}", s.file_name, s.reason, width = width);
        }
        println!();
    }

    for w in &outcome.warnings {
        println!("  warning: {w}");
    }
}

/// Manual steps left after the workbook is generated.
pub fn print_checklist() {
    println!("To finish the report:");
    println!("  1. Fill in the header (date, tester) and check whether this is MP or MVT.");
    println!("  2. Check that the limit class matches the product (default Class B).");
    println!("  3. Insert the test pictures and the PDF archive.");
    println!("  4. Tidy the table and delete any entries that are not needed.");
}

pub fn print_summary(summary: &BatchSummary, verb: &str) {
    let total = summary.succeeded + summary.failed;
    println!("{} {verb}, {} failed, {total} total", summary.succeeded, summary.failed);
    if summary.cancelled {
        println!("  (cancelled before all files were handled)");
    }
}
