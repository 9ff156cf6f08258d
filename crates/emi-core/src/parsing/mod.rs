pub mod header;
pub mod values;

use crate::error::EmiError;
use crate::extraction::PageContent;
use crate::model::{fields, Channel, MeasurementReport, MeasurementRow};
use header::parse_header;
use values::parse_decimal;

/// Number of leading lines searched for the labelled header fields.
const HEADER_LINES: usize = 20;
/// Index of the first line that may hold a measurement row.
const FIRST_ROW_LINE: usize = 15;
/// A measurement row has strictly more tokens than this.
const MIN_ROW_TOKENS: usize = 10;

/// Parse the first two pages of an extracted PDF into a report.
pub fn parse_pages(pages: &[PageContent]) -> Result<MeasurementReport, EmiError> {
    match pages {
        [first, second, ..] => {
            let lines: Vec<&str> = first
                .lines
                .iter()
                .chain(second.lines.iter())
                .map(|s| s.as_str())
                .collect();
            parse_lines(&lines)
        }
        _ => Err(EmiError::ParseError(format!(
            "expected at least two pages, found {}",
            pages.len()
        ))),
    }
}

/// Parse the text of a report's first two pages into a report.
pub fn parse_report(page_one: &str, page_two: &str) -> Result<MeasurementReport, EmiError> {
    let lines: Vec<&str> = page_one.lines().chain(page_two.lines()).collect();
    parse_lines(&lines)
}

fn parse_lines(raw_lines: &[&str]) -> Result<MeasurementReport, EmiError> {
    let lines: Vec<&str> = raw_lines
        .iter()
        .copied()
        .filter(|l| !l.trim().is_empty())
        .collect();

    if lines.is_empty() {
        return Err(EmiError::ParseError("no text content found in PDF".into()));
    }

    let header_lines: Vec<&str> = lines.iter().take(HEADER_LINES).copied().collect();
    let header = parse_header(&header_lines)?;

    let rows = parse_table_rows(lines.get(FIRST_ROW_LINE..).unwrap_or_default())?;
    if rows.is_empty() {
        return Err(EmiError::NoMeasurementRows);
    }

    let (channel, rows) = select_channel(rows);

    Ok(MeasurementReport {
        serial: header.serial,
        rated_power: header.rated_power,
        load_percent: header.load_percent,
        channel,
        rows,
    })
}

/// Collect every line with more than ten tokens as a measurement row.
fn parse_table_rows(lines: &[&str]) -> Result<Vec<MeasurementRow>, EmiError> {
    let mut rows = Vec::new();

    for line in lines {
        if let Some(row) = try_parse_row(line)? {
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Try to parse a single line as a measurement row.
///
/// Returns Ok(None) if the line is too short to be a data row, and an error
/// if it is long enough but its sort key columns are not numeric.
fn try_parse_row(line: &str) -> Result<Option<MeasurementRow>, EmiError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() <= MIN_ROW_TOKENS {
        return Ok(None);
    }

    let average = parse_decimal(tokens[fields::AVERAGE])
        .map_err(|e| EmiError::ParseError(format!("row '{}': {}", line.trim(), e)))?;
    let peak = parse_decimal(tokens[fields::PEAK])
        .map_err(|e| EmiError::ParseError(format!("row '{}': {}", line.trim(), e)))?;

    Ok(Some(MeasurementRow {
        fields: tokens.iter().map(|s| s.to_string()).collect(),
        average,
        peak,
    }))
}

/// Rank the rows by each detector channel and keep the ranking whose
/// smallest value is lower. Ties go to the average channel.
fn select_channel(rows: Vec<MeasurementRow>) -> (Channel, Vec<MeasurementRow>) {
    let mut by_average = rows.clone();
    by_average.sort_by(|a, b| a.average.cmp(&b.average));

    let mut by_peak = rows;
    by_peak.sort_by(|a, b| a.peak.cmp(&b.peak));

    match (by_average.first(), by_peak.first()) {
        (Some(avg), Some(pk)) if avg.average > pk.peak => (Channel::Peak, by_peak),
        _ => (Channel::Average, by_average),
    }
}
