pub mod naming;

use std::io::Cursor;
use std::path::{Path, PathBuf};

use calamine::{Reader, Xlsx};
use serde::{Deserialize, Serialize};

use crate::error::EmiError;
use crate::sheet::{CellRef, Worksheet};

/// Sheet holding the layout offsets; removed before the report is saved.
pub const SETUP_SHEET: &str = "Setup";
/// Sheet the measurements are written into.
pub const DATA_SHEET: &str = "Conducted EMI";
/// Number of UUT blocks a template is built with.
pub const MAX_UUTS: usize = 5;
/// Fixed rows below the last data block (signature area).
pub const TRAILING_ROWS: u32 = 4;
/// Cell that receives the UUT model name.
pub const MODEL_CELL: CellRef = CellRef { row: 5, col: 6 };
/// Number of columns written per measurement, starting right of the load column.
pub const WRITTEN_COLUMNS: u32 = 7;

/// Number of load conditions per rated power in a template variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadQty(u32);

impl LoadQty {
    pub const THREE: LoadQty = LoadQty(3);
    pub const FOUR: LoadQty = LoadQty(4);

    /// Accept 3 or 4; anything else falls back to 3.
    pub fn coerce(n: u32) -> LoadQty {
        match n {
            3 | 4 => LoadQty(n),
            other => {
                log::warn!("Unexpected load quantity: {other}, defaulting to 3.");
                LoadQty::THREE
            }
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Rows per UUT block: two power halves of two rows per load slot.
    pub fn rows_per_block(self) -> u32 {
        self.0 * 4
    }

    /// Rows per rated-power half of a block.
    pub fn rows_per_power(self) -> u32 {
        self.0 * 2
    }
}

impl Default for LoadQty {
    fn default() -> Self {
        LoadQty::THREE
    }
}

/// Positional configuration of a template, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLayout {
    /// Row of the first UUT block; its serial anchor row.
    pub first_row: u32,
    pub serial_col: u32,
    pub voltage_col: u32,
    pub line_col: u32,
    pub load_col: u32,
    pub last_row: u32,
    pub last_col: u32,
    pub model_cell: CellRef,
}

/// Setup sheet rows (column B) holding each layout value, in field order.
const SETUP_ROWS: [(u32, &str); 7] = [
    (1, "first row"),
    (2, "serial column"),
    (3, "voltage column"),
    (4, "line column"),
    (5, "load column"),
    (7, "last row"),
    (8, "last column"),
];

impl TemplateLayout {
    /// Read the layout from the Setup sheet of a template package.
    pub fn from_xlsx_bytes(bytes: &[u8]) -> Result<TemplateLayout, EmiError> {
        let cursor = Cursor::new(bytes);
        let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(cursor)
            .map_err(|e| EmiError::TemplateInvalid(format!("failed to open xlsx: {e}")))?;

        let sheet = workbook.worksheet_range(SETUP_SHEET).map_err(|e| {
            EmiError::TemplateInvalid(format!("sheet '{SETUP_SHEET}' not found: {e}"))
        })?;

        let mut values = [0u32; 7];
        for (slot, (row, what)) in values.iter_mut().zip(SETUP_ROWS) {
            let cell = sheet.get_value((row - 1, 1));
            *slot = cell_as_u32(cell).ok_or_else(|| {
                EmiError::TemplateInvalid(format!(
                    "{SETUP_SHEET}!B{row} ({what}) must be a positive integer, found {}",
                    cell.map(|c| format!("'{c}'")).unwrap_or_else(|| "nothing".into())
                ))
            })?;
        }

        let [first_row, serial_col, voltage_col, line_col, load_col, last_row, last_col] = values;
        let layout = TemplateLayout {
            first_row,
            serial_col,
            voltage_col,
            line_col,
            load_col,
            last_row,
            last_col,
            model_cell: MODEL_CELL,
        };
        log::debug!("Template layout: {layout:?}");
        Ok(layout)
    }

    /// Columns written for a measurement, in order.
    pub fn value_columns(&self) -> impl Iterator<Item = u32> {
        let start = self.load_col + 1;
        start..start + WRITTEN_COLUMNS
    }

    /// Check that every coordinate placement can produce lies inside the
    /// sheet before anything is written.
    pub fn validate(&self, sheet: &dyn Worksheet, load_qty: LoadQty) -> Result<(), EmiError> {
        for (name, col) in [
            ("serial column", self.serial_col),
            ("voltage column", self.voltage_col),
            ("line column", self.line_col),
            ("load column", self.load_col),
        ] {
            if col == 0 || col > self.last_col {
                return Err(EmiError::Layout(format!(
                    "{name} {col} is outside columns 1..={}",
                    self.last_col
                )));
            }
        }

        let last_written = self.load_col + WRITTEN_COLUMNS;
        if last_written > self.last_col {
            return Err(EmiError::Layout(format!(
                "measurement columns end at {last_written}, past the last column {}",
                self.last_col
            )));
        }

        if self.first_row == 0 {
            return Err(EmiError::Layout("first row must be at least 1".into()));
        }

        let capacity_end = self.first_row + load_qty.rows_per_block() * MAX_UUTS as u32 - 1;
        if capacity_end > sheet.max_row() {
            return Err(EmiError::Layout(format!(
                "{MAX_UUTS} UUT blocks of {} rows from row {} need {capacity_end} rows, sheet has {}",
                load_qty.rows_per_block(),
                self.first_row,
                sheet.max_row()
            )));
        }

        Ok(())
    }
}

/// Default template for a load quantity inside a template directory.
pub fn default_template_path(template_dir: &Path, load_qty: LoadQty) -> PathBuf {
    template_dir.join(format!(
        "2.1 Conducted EMI Measurement_{}.xlsx",
        load_qty.get()
    ))
}

fn cell_as_u32(cell: Option<&calamine::Data>) -> Option<u32> {
    let value = match cell? {
        calamine::Data::Float(f) => *f,
        calamine::Data::Int(i) => *i as f64,
        calamine::Data::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if value >= 1.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Some(value as u32)
    } else {
        None
    }
}
