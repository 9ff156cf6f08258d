//! Cell-grid abstraction over an output worksheet.
//!
//! Placement only needs cell get/set by 1-based row and column, row
//! deletion and merged-range bookkeeping. `Grid` is an in-memory sheet;
//! `crate::xlsx::XlsxSheet` is the same surface over a template package.

pub mod grid;

pub use grid::Grid;

use crate::error::EmiError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 1-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        CellRef { row, col }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row)
    }
}

impl FromStr for CellRef {
    type Err = EmiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('$');
        let split = s
            .find(|c: char| c.is_ascii_digit() || c == '$')
            .ok_or_else(|| EmiError::Xlsx(format!("invalid cell reference '{s}'")))?;
        let (letters, digits) = s.split_at(split);
        let col = column_index(letters)
            .ok_or_else(|| EmiError::Xlsx(format!("invalid column in '{s}'")))?;
        let row: u32 = digits
            .trim_start_matches('$')
            .parse()
            .map_err(|_| EmiError::Xlsx(format!("invalid row in '{s}'")))?;
        if row == 0 {
            return Err(EmiError::Xlsx(format!("invalid row in '{s}'")));
        }
        Ok(CellRef { row, col })
    }
}

/// Column letters for a 1-based column index (1 -> "A", 27 -> "AA").
pub fn column_name(mut col: u32) -> String {
    let mut name = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        name.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

/// 1-based column index from letters ("A" -> 1, "aa" -> 27).
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let v = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        acc.checked_mul(26)?.checked_add(v)
    })
}

/// Rectangular range such as a merged region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub first: CellRef,
    pub last: CellRef,
}

impl CellRange {
    pub fn new(first: CellRef, last: CellRef) -> Self {
        CellRange {
            first: CellRef::new(first.row.min(last.row), first.col.min(last.col)),
            last: CellRef::new(first.row.max(last.row), first.col.max(last.col)),
        }
    }

    pub fn min_row(&self) -> u32 {
        self.first.row
    }

    pub fn max_row(&self) -> u32 {
        self.last.row
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

impl FromStr for CellRange {
    type Err = EmiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((a, b)) => Ok(CellRange::new(a.parse()?, b.parse()?)),
            None => {
                let cell: CellRef = s.parse()?;
                Ok(CellRange::new(cell, cell))
            }
        }
    }
}

/// Value held by a worksheet cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    #[default]
    Empty,
    Number(Decimal),
    Text(String),
    Bool(bool),
    Error(String),
}

impl CellValue {
    /// Numeric token goes in as a number, anything else as text.
    pub fn from_token(token: &str) -> CellValue {
        match crate::parsing::values::parse_decimal(token) {
            Ok(d) => CellValue::Number(d),
            Err(_) => CellValue::Text(token.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text rendering used for label and serial comparisons.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(d) => Some(d.normalize().to_string()),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Bool(b) => Some(if *b { "TRUE".into() } else { "FALSE".into() }),
            CellValue::Error(e) => Some(e.clone()),
        }
    }

    /// Numeric value of the cell; text cells are parsed when they hold a number.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            CellValue::Number(d) => Some(*d),
            CellValue::Text(s) => crate::parsing::values::parse_decimal(s).ok(),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<Decimal> for CellValue {
    fn from(d: Decimal) -> Self {
        CellValue::Number(d)
    }
}

/// Mutable cell grid that placement writes into.
pub trait Worksheet {
    /// Value at a cell; cells never written read as `CellValue::Empty`.
    fn cell(&self, at: CellRef) -> CellValue;

    fn set_cell(&mut self, at: CellRef, value: CellValue) -> Result<(), EmiError>;

    /// Remove `count` rows starting at `first`, moving later rows up.
    fn delete_rows(&mut self, first: u32, count: u32) -> Result<(), EmiError>;

    fn merged_ranges(&self) -> Vec<CellRange>;

    /// Remove a merged range. Returns false if it was not merged.
    fn unmerge(&mut self, range: &CellRange) -> bool;

    /// Highest row index holding a row record, 0 for an empty sheet.
    fn max_row(&self) -> u32;

    fn max_column(&self) -> u32;
}

/// Renumber row-keyed entries after deleting `[first, first + count)`.
pub(crate) fn shift_rows<T>(rows: BTreeMap<u32, T>, first: u32, count: u32) -> BTreeMap<u32, T> {
    let end = first.saturating_add(count);
    rows.into_iter()
        .filter_map(|(row, value)| {
            if row < first {
                Some((row, value))
            } else if row >= end {
                Some((row - count, value))
            } else {
                None
            }
        })
        .collect()
}

/// Adjust merged ranges for a deletion of `[first, first + count)`.
///
/// Ranges fully inside the band disappear, ranges below it move up, and
/// ranges straddling it lose the deleted rows. Ranges reduced to a single
/// cell are dropped.
pub(crate) fn shift_ranges(ranges: &[CellRange], first: u32, count: u32) -> Vec<CellRange> {
    if count == 0 {
        return ranges.to_vec();
    }
    let end = first + count; // exclusive
    let map_row = |row: u32| if row >= end { row - count } else { row };

    ranges
        .iter()
        .filter_map(|r| {
            let (top, bottom) = (r.min_row(), r.max_row());
            if top >= first && bottom < end {
                return None;
            }
            let new_top = if top >= first && top < end {
                first
            } else {
                map_row(top)
            };
            let new_bottom = if bottom >= first && bottom < end {
                first - 1
            } else {
                map_row(bottom)
            };
            let shifted = CellRange::new(
                CellRef::new(new_top, r.first.col),
                CellRef::new(new_bottom, r.last.col),
            );
            if shifted.first == shifted.last {
                None
            } else {
                Some(shifted)
            }
        })
        .collect()
}
