//! Writes parsed reports into the data sheet of a template.
//!
//! A template is built for five UUTs. Each UUT block spans
//! `load_qty * 4` rows: two rated-power halves, each made of one two-row
//! slot per load condition (Line row, then Neutral row).

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EmiError;
use crate::model::{fields, MeasurementReport, MeasurementRow, SourcedReport};
use crate::sheet::{CellRef, CellValue, Worksheet};
use crate::template::{LoadQty, TemplateLayout, MAX_UUTS, TRAILING_ROWS};

/// Result of the once-per-run pre-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreparedSheet {
    pub num_uut: usize,
    pub rows_deleted: u32,
    /// Last data row once unused blocks are gone (`max_row - 4`).
    pub last_row: u32,
}

/// Where a report's measurement ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub block: usize,
    pub row: u32,
}

/// A report with every field placement needs.
struct Target<'a> {
    serial: &'a str,
    rated_power: u32,
    load_percent: u32,
    row: &'a MeasurementRow,
}

impl<'a> Target<'a> {
    fn from_report(report: &'a MeasurementReport, file: &str) -> Result<Target<'a>, EmiError> {
        let missing = |field| EmiError::MissingField {
            file: file.to_string(),
            field,
        };
        Ok(Target {
            serial: report.serial.as_deref().ok_or_else(|| missing("Serial"))?,
            rated_power: report.rated_power.ok_or_else(|| missing("Power"))?,
            load_percent: report.load_percent.ok_or_else(|| missing("Load"))?,
            row: report.worst_row().ok_or(EmiError::NoMeasurementRows)?,
        })
    }
}

/// Number of distinct UUTs, keyed by the file name text before the first `-`.
pub fn count_uuts<'a>(reports: impl IntoIterator<Item = &'a SourcedReport>) -> usize {
    reports
        .into_iter()
        .map(SourcedReport::uut_prefix)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Shrink the template to the UUTs present.
///
/// Every report is checked for its header fields and the layout is
/// validated before the sheet is touched.
pub fn prepare_sheet(
    sheet: &mut dyn Worksheet,
    layout: &TemplateLayout,
    load_qty: LoadQty,
    reports: &[SourcedReport],
) -> Result<PreparedSheet, EmiError> {
    if reports.is_empty() {
        return Err(EmiError::NoReports);
    }
    for sourced in reports {
        Target::from_report(&sourced.report, &sourced.file_name)?;
    }

    let num_uut = count_uuts(reports);
    if num_uut > MAX_UUTS {
        log::warn!("Number of UUTs is too many! {num_uut}");
        return Err(EmiError::CapacityExceeded {
            found: num_uut,
            max: MAX_UUTS,
        });
    }

    layout.validate(sheet, load_qty)?;

    let block = load_qty.rows_per_block();
    let cut = layout.first_row + block * num_uut as u32;
    for range in sheet.merged_ranges() {
        if range.min_row() == cut {
            log::debug!("Unmerging {range} at deletion boundary");
            sheet.unmerge(&range);
        }
    }

    let rows_deleted = block * (MAX_UUTS - num_uut) as u32;
    sheet.delete_rows(cut, rows_deleted)?;
    let last_row = sheet.max_row().saturating_sub(TRAILING_ROWS);
    log::info!("Deleted {rows_deleted} rows for {num_uut} UUT(s); last data row {last_row}");

    Ok(PreparedSheet {
        num_uut,
        rows_deleted,
        last_row,
    })
}

/// Write one report's worst row into its slot.
pub fn place(
    report: &MeasurementReport,
    sheet: &mut dyn Worksheet,
    layout: &TemplateLayout,
    load_qty: LoadQty,
    prepared: &PreparedSheet,
) -> Result<Placement, EmiError> {
    let label = report.serial.clone().unwrap_or_default();
    let target = Target::from_report(report, &label)?;
    place_target(&target, sheet, layout, load_qty, prepared)
}

/// Pre-pass followed by placement of every report in input order.
///
/// Any failure aborts the run; the sheet is then left as far as it got.
pub fn place_all(
    reports: &[SourcedReport],
    sheet: &mut dyn Worksheet,
    layout: &TemplateLayout,
    load_qty: LoadQty,
) -> Result<(PreparedSheet, Vec<Placement>), EmiError> {
    let prepared = prepare_sheet(sheet, layout, load_qty, reports)?;

    let mut placements = Vec::with_capacity(reports.len());
    for sourced in reports {
        let target = Target::from_report(&sourced.report, &sourced.file_name)?;
        let placement = place_target(&target, sheet, layout, load_qty, &prepared).inspect_err(
            |e| log::error!("Placing {} failed: {e}", sourced.file_name),
        )?;
        log::debug!(
            "{} -> block {}, row {}",
            sourced.file_name,
            placement.block,
            placement.row
        );
        placements.push(placement);
    }
    Ok((prepared, placements))
}

fn place_target(
    target: &Target<'_>,
    sheet: &mut dyn Worksheet,
    layout: &TemplateLayout,
    load_qty: LoadQty,
    prepared: &PreparedSheet,
) -> Result<Placement, EmiError> {
    let (block, serial_row) = claim_block(target.serial, sheet, layout, load_qty, prepared)?;

    let power = sheet.cell(CellRef::new(serial_row, layout.voltage_col));
    let power_row = if power.as_decimal() == Some(Decimal::from(target.rated_power)) {
        serial_row
    } else {
        serial_row + load_qty.rows_per_power()
    };

    let load_row = find_load_slot(target, sheet, layout, load_qty, power_row)?;

    let line = target.row.line();
    let line_cell = sheet.cell(CellRef::new(load_row, layout.line_col));
    let row = if line_cell.as_text().as_deref() == Some(line.label()) {
        load_row
    } else {
        load_row + 1
    };

    write_measurement(sheet, layout, row, target.row)?;
    Ok(Placement { block, row })
}

/// First block whose serial cell is empty (claimed) or already holds `serial`.
fn claim_block(
    serial: &str,
    sheet: &mut dyn Worksheet,
    layout: &TemplateLayout,
    load_qty: LoadQty,
    prepared: &PreparedSheet,
) -> Result<(usize, u32), EmiError> {
    for block in 0..prepared.num_uut {
        let row = layout.first_row + load_qty.rows_per_block() * block as u32;
        let at = CellRef::new(row, layout.serial_col);
        let current = sheet.cell(at);
        if current.is_empty() {
            sheet.set_cell(at, CellValue::Text(serial.to_string()))?;
            return Ok((block, row));
        }
        if current.as_text().as_deref() == Some(serial) {
            return Ok((block, row));
        }
    }
    Err(EmiError::BlockOverflow {
        serial: serial.to_string(),
        blocks: prepared.num_uut,
    })
}

/// Step through the two-row load slots of a power half until the template
/// load fraction, scaled by 100 and truncated, equals the report load.
fn find_load_slot(
    target: &Target<'_>,
    sheet: &dyn Worksheet,
    layout: &TemplateLayout,
    load_qty: LoadQty,
    power_row: u32,
) -> Result<u32, EmiError> {
    let wanted = Decimal::from(target.load_percent);
    let end = power_row + load_qty.rows_per_power();
    (power_row..end)
        .step_by(2)
        .find(|row| {
            sheet
                .cell(CellRef::new(*row, layout.load_col))
                .as_decimal()
                .map(|fraction| (fraction * Decimal::ONE_HUNDRED).trunc() == wanted)
                .unwrap_or(false)
        })
        .ok_or_else(|| EmiError::LoadSlotNotFound {
            serial: target.serial.to_string(),
            load: target.load_percent,
        })
}

fn write_measurement(
    sheet: &mut dyn Worksheet,
    layout: &TemplateLayout,
    row: u32,
    measurement: &MeasurementRow,
) -> Result<(), EmiError> {
    let token = |index: usize| CellValue::from_token(measurement.field(index).unwrap_or_default());
    let values = [
        token(fields::FREQUENCY),
        token(fields::READING_A),
        token(fields::CORRECTION),
        token(fields::LIMIT),
        CellValue::Text("-".into()),
        token(fields::READING_B),
        token(fields::RESULT_B),
    ];
    for (col, value) in layout.value_columns().zip(values) {
        sheet.set_cell(CellRef::new(row, col), value)?;
    }
    Ok(())
}
