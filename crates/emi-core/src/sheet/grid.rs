use std::collections::BTreeMap;

use crate::error::EmiError;
use crate::sheet::{shift_ranges, shift_rows, CellRange, CellRef, CellValue, Worksheet};

/// In-memory worksheet.
///
/// Rows are tracked even when all their cells are empty, so a template
/// rebuilt here keeps its row count through deletions the way a package
/// sheet does.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    rows: BTreeMap<u32, BTreeMap<u32, CellValue>>,
    merges: Vec<CellRange>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// A grid whose rows `1..=rows` exist but hold no values.
    pub fn with_rows(rows: u32) -> Self {
        Grid {
            rows: (1..=rows).map(|r| (r, BTreeMap::new())).collect(),
            merges: Vec::new(),
        }
    }

    pub fn merge(&mut self, range: CellRange) {
        if !self.merges.contains(&range) {
            self.merges.push(range);
        }
    }

    /// Number of non-empty cells, for assertions on what was written.
    pub fn filled_cells(&self) -> usize {
        self.rows
            .values()
            .flat_map(|cells| cells.values())
            .filter(|v| !v.is_empty())
            .count()
    }
}

impl Worksheet for Grid {
    fn cell(&self, at: CellRef) -> CellValue {
        self.rows
            .get(&at.row)
            .and_then(|cells| cells.get(&at.col))
            .cloned()
            .unwrap_or_default()
    }

    fn set_cell(&mut self, at: CellRef, value: CellValue) -> Result<(), EmiError> {
        if at.row == 0 || at.col == 0 {
            return Err(EmiError::Placement(format!(
                "cell coordinates are 1-based, got row {} column {}",
                at.row, at.col
            )));
        }
        self.rows.entry(at.row).or_default().insert(at.col, value);
        Ok(())
    }

    fn delete_rows(&mut self, first: u32, count: u32) -> Result<(), EmiError> {
        if first == 0 {
            return Err(EmiError::Placement("row numbers are 1-based".into()));
        }
        if count == 0 {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.rows);
        self.rows = shift_rows(rows, first, count);
        self.merges = shift_ranges(&self.merges, first, count);
        Ok(())
    }

    fn merged_ranges(&self) -> Vec<CellRange> {
        self.merges.clone()
    }

    fn unmerge(&mut self, range: &CellRange) -> bool {
        let before = self.merges.len();
        self.merges.retain(|r| r != range);
        self.merges.len() != before
    }

    fn max_row(&self) -> u32 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    fn max_column(&self) -> u32 {
        self.rows
            .values()
            .filter_map(|cells| cells.keys().next_back().copied())
            .max()
            .unwrap_or(0)
    }
}
