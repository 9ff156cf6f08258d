use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Range;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::EmiError;
use crate::parsing::values::parse_decimal;
use crate::sheet::{
    column_name, shift_ranges, shift_rows, CellRange, CellRef, CellValue, Worksheet,
};
use crate::xlsx::{attr_local, local_name, xml_err};

/// How a cell is stored in the sheet XML.
#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Value(CellValue),
    /// Index into the shared string table, with its resolved text.
    Shared { index: String, text: String },
    Formula {
        formula: String,
        attrs: Vec<(String, String)>,
        kind: Option<String>,
        cached: Option<String>,
    },
    /// A typed value this backend does not interpret (e.g. `t="d"`).
    Raw { kind: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
struct XmlCell {
    style: Option<String>,
    stored: Stored,
}

impl XmlCell {
    fn value(&self) -> CellValue {
        match &self.stored {
            Stored::Value(v) => v.clone(),
            Stored::Shared { text, .. } => CellValue::Text(text.clone()),
            Stored::Formula { kind, cached, .. } => match cached {
                Some(v) => typed_value(kind.as_deref(), v),
                None => CellValue::Empty,
            },
            Stored::Raw { value, .. } => CellValue::Text(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct XmlRow {
    attrs: Vec<(String, String)>,
    cells: BTreeMap<u32, XmlCell>,
}

/// One worksheet part of an xlsx package, editable through `Worksheet`.
///
/// Only `sheetData`, `mergeCells` and `dimension` are interpreted; every
/// other part of the XML is written back byte for byte.
#[derive(Debug, Clone)]
pub struct XlsxSheet {
    head: String,
    dimension: Option<Range<usize>>,
    prefix: String,
    rows: BTreeMap<u32, XmlRow>,
    middle: String,
    merges: Vec<CellRange>,
    tail: String,
}

#[derive(Default)]
struct CellBuilder {
    col: u32,
    style: Option<String>,
    kind: Option<String>,
    value: Option<String>,
    inline: Option<String>,
    formula: Option<(Vec<(String, String)>, String)>,
}

#[derive(Clone, Copy, PartialEq)]
enum TextTarget {
    None,
    Value,
    Formula,
    Inline,
}

impl XlsxSheet {
    /// Parse a worksheet part. `shared` resolves `t="s"` cells.
    pub fn parse(xml: &str, shared: &[String]) -> Result<XlsxSheet, EmiError> {
        let mut reader = Reader::from_reader(xml.as_bytes());
        let mut buf = Vec::new();

        let mut head_end: Option<usize> = None;
        let mut data_end: Option<usize> = None;
        let mut merge_span: Option<(usize, usize)> = None;
        let mut dimension = None;
        let mut prefix = String::new();
        let mut merges = Vec::new();
        let mut rows: BTreeMap<u32, XmlRow> = BTreeMap::new();

        let mut in_sheet_data = false;
        let mut current_row: Option<(u32, XmlRow)> = None;
        let mut current_cell: Option<CellBuilder> = None;
        let mut text_target = TextTarget::None;
        let mut merge_start = None;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event_into(&mut buf).map_err(xml_err)?;
            let end = reader.buffer_position() as usize;

            match event {
                Event::Eof => break,
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let name = local_name(e);
                    match name.as_str() {
                        "dimension" if !in_sheet_data => dimension = Some(start..end),
                        "sheetData" => {
                            head_end = Some(start);
                            prefix = qualified_prefix(e);
                            if is_empty {
                                data_end = Some(end);
                            } else {
                                in_sheet_data = true;
                            }
                        }
                        "row" if in_sheet_data => {
                            let next = rows.keys().next_back().map(|r| r + 1).unwrap_or(1);
                            let row = parse_row_start(e, next)?;
                            if is_empty {
                                rows.insert(row.0, row.1);
                            } else {
                                current_row = Some(row);
                            }
                        }
                        "c" if in_sheet_data => {
                            let (row_index, row) = current_row.as_ref().ok_or_else(|| {
                                EmiError::Xlsx("cell outside of a row".into())
                            })?;
                            let next_col = row.cells.keys().next_back().map(|c| c + 1).unwrap_or(1);
                            let cell = parse_cell_start(e, *row_index, next_col)?;
                            if is_empty {
                                let (idx, row) = current_row
                                    .as_mut()
                                    .ok_or_else(|| EmiError::Xlsx("cell outside of a row".into()))?;
                                let col = cell.col;
                                row.cells.insert(col, finish_cell(cell, shared, *idx)?);
                            } else {
                                current_cell = Some(cell);
                            }
                        }
                        "v" if current_cell.is_some() && !is_empty => text_target = TextTarget::Value,
                        "f" if current_cell.is_some() => {
                            if let Some(cell) = current_cell.as_mut() {
                                cell.formula = Some((attr_pairs(e, &[]), String::new()));
                            }
                            if !is_empty {
                                text_target = TextTarget::Formula;
                            }
                        }
                        "t" if current_cell.is_some() && !is_empty => {
                            text_target = TextTarget::Inline;
                            if let Some(cell) = current_cell.as_mut() {
                                cell.inline.get_or_insert_with(String::new);
                            }
                        }
                        "mergeCells" if !in_sheet_data => {
                            merge_start = Some(start);
                            if is_empty {
                                merge_span = Some((start, end));
                            }
                        }
                        "mergeCell" if merge_start.is_some() => {
                            if let Some(r) = attr_local(e, b"ref") {
                                let range: CellRange = r.parse()?;
                                if range.first != range.last {
                                    merges.push(range);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(ref t) => {
                    if text_target != TextTarget::None {
                        let text = t.unescape().map_err(xml_err)?;
                        push_text(current_cell.as_mut(), text_target, &text);
                    }
                }
                Event::CData(ref t) => {
                    if text_target != TextTarget::None {
                        let text = String::from_utf8_lossy(t).to_string();
                        push_text(current_cell.as_mut(), text_target, &text);
                    }
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    match name.as_str() {
                        "v" | "f" | "t" => text_target = TextTarget::None,
                        "c" if in_sheet_data => {
                            if let (Some(cell), Some((idx, row))) =
                                (current_cell.take(), current_row.as_mut())
                            {
                                let col = cell.col;
                                row.cells.insert(col, finish_cell(cell, shared, *idx)?);
                            }
                        }
                        "row" if in_sheet_data => {
                            if let Some((idx, row)) = current_row.take() {
                                rows.insert(idx, row);
                            }
                        }
                        "sheetData" => {
                            in_sheet_data = false;
                            data_end = Some(end);
                        }
                        "mergeCells" => {
                            if let Some(s) = merge_start {
                                merge_span = Some((s, end));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            buf.clear();
        }

        let (head_end, data_end) = match (head_end, data_end) {
            (Some(h), Some(d)) => (h, d),
            _ => return Err(EmiError::Xlsx("worksheet has no sheetData".into())),
        };

        let (middle, tail) = match merge_span {
            Some((s, e)) if s >= data_end => (xml[data_end..s].to_string(), xml[e..].to_string()),
            _ => (xml[data_end..].to_string(), String::new()),
        };

        Ok(XlsxSheet {
            head: xml[..head_end].to_string(),
            dimension: dimension.filter(|d| d.end <= head_end),
            prefix,
            rows,
            middle,
            merges,
            tail,
        })
    }

    /// Serialize the sheet back to XML.
    pub fn to_xml(&self) -> String {
        let p = &self.prefix;
        let mut out = String::with_capacity(self.head.len() + self.rows.len() * 256);

        match &self.dimension {
            Some(range) => {
                out.push_str(&self.head[..range.start]);
                let _ = write!(out, "<{p}dimension ref=\"{}\"/>", self.used_range());
                out.push_str(&self.head[range.end..]);
            }
            None => out.push_str(&self.head),
        }

        let _ = write!(out, "<{p}sheetData>");
        for (row_index, row) in &self.rows {
            let _ = write!(out, "<{p}row r=\"{row_index}\"");
            write_attrs(&mut out, &row.attrs);
            if row.cells.is_empty() {
                out.push_str("/>");
                continue;
            }
            out.push('>');
            for (col, cell) in &row.cells {
                write_cell(&mut out, p, CellRef::new(*row_index, *col), cell);
            }
            let _ = write!(out, "</{p}row>");
        }
        let _ = write!(out, "</{p}sheetData>");

        out.push_str(&self.middle);
        if !self.merges.is_empty() {
            let _ = write!(out, "<{p}mergeCells count=\"{}\">", self.merges.len());
            for range in &self.merges {
                let _ = write!(out, "<{p}mergeCell ref=\"{range}\"/>");
            }
            let _ = write!(out, "</{p}mergeCells>");
        }
        out.push_str(&self.tail);
        out
    }

    fn used_range(&self) -> String {
        let min_row = self.rows.keys().next().copied().unwrap_or(1);
        let max_row = self.rows.keys().next_back().copied().unwrap_or(1);
        let min_col = self
            .rows
            .values()
            .filter_map(|r| r.cells.keys().next().copied())
            .min()
            .unwrap_or(1);
        let max_col = self.max_column().max(1);
        let first = CellRef::new(min_row, min_col);
        let last = CellRef::new(max_row, max_col);
        if first == last {
            first.to_string()
        } else {
            format!("{first}:{last}")
        }
    }
}

impl Worksheet for XlsxSheet {
    fn cell(&self, at: CellRef) -> CellValue {
        self.rows
            .get(&at.row)
            .and_then(|r| r.cells.get(&at.col))
            .map(|c| c.value())
            .unwrap_or_default()
    }

    fn set_cell(&mut self, at: CellRef, value: CellValue) -> Result<(), EmiError> {
        if at.row == 0 || at.col == 0 {
            return Err(EmiError::Placement(format!(
                "cell coordinates are 1-based, got row {} column {}",
                at.row, at.col
            )));
        }
        let row = self.rows.entry(at.row).or_default();
        match row.cells.get_mut(&at.col) {
            Some(cell) => cell.stored = Stored::Value(value),
            None => {
                // New cells inherit the row style when the row has one.
                let style = row
                    .attrs
                    .iter()
                    .find(|(k, _)| k == "s")
                    .map(|(_, v)| v.clone())
                    .filter(|_| row.attrs.iter().any(|(k, v)| k == "customFormat" && v == "1"));
                row.cells.insert(
                    at.col,
                    XmlCell {
                        style,
                        stored: Stored::Value(value),
                    },
                );
            }
        }
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
            .filter_map(|r| r.cells.keys().next_back().copied())
            .max()
            .unwrap_or(0)
    }
}

fn qualified_prefix(e: &BytesStart) -> String {
    let name = e.name();
    match name.prefix() {
        Some(p) => format!("{}:", String::from_utf8_lossy(p.as_ref())),
        None => String::new(),
    }
}

/// Attributes as owned pairs, leaving out the keys in `skip`.
fn attr_pairs(e: &BytesStart, skip: &[&str]) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .filter_map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
            if skip.contains(&key.as_str()) {
                return None;
            }
            let value = a.unescape_value().ok()?.to_string();
            Some((key, value))
        })
        .collect()
}

fn parse_row_start(e: &BytesStart, next: u32) -> Result<(u32, XmlRow), EmiError> {
    let index = match attr_local(e, b"r") {
        Some(r) => r
            .parse()
            .map_err(|_| EmiError::Xlsx(format!("invalid row number '{r}'")))?,
        None => next,
    };
    Ok((
        index,
        XmlRow {
            attrs: attr_pairs(e, &["r", "spans"]),
            cells: BTreeMap::new(),
        },
    ))
}

fn parse_cell_start(e: &BytesStart, row: u32, next_col: u32) -> Result<CellBuilder, EmiError> {
    let col = match attr_local(e, b"r") {
        Some(r) => {
            let at: CellRef = r.parse()?;
            if at.row != row {
                return Err(EmiError::Xlsx(format!("cell {r} is not in row {row}")));
            }
            at.col
        }
        None => next_col,
    };
    Ok(CellBuilder {
        col,
        style: attr_local(e, b"s"),
        kind: attr_local(e, b"t"),
        ..Default::default()
    })
}

fn push_text(cell: Option<&mut CellBuilder>, target: TextTarget, text: &str) {
    let Some(cell) = cell else { return };
    match target {
        TextTarget::Value => cell.value.get_or_insert_with(String::new).push_str(text),
        TextTarget::Formula => {
            if let Some((_, f)) = cell.formula.as_mut() {
                f.push_str(text);
            }
        }
        TextTarget::Inline => cell.inline.get_or_insert_with(String::new).push_str(text),
        TextTarget::None => {}
    }
}

fn finish_cell(cell: CellBuilder, shared: &[String], row: u32) -> Result<XmlCell, EmiError> {
    let stored = if let Some((attrs, formula)) = cell.formula {
        Stored::Formula {
            formula,
            attrs,
            kind: cell.kind,
            cached: cell.value,
        }
    } else {
        match (cell.kind.as_deref(), cell.value) {
            (Some("s"), Some(v)) => {
                let idx: usize = v.trim().parse().map_err(|_| {
                    EmiError::Xlsx(format!("invalid shared string index '{v}'"))
                })?;
                let text = shared.get(idx).cloned().ok_or_else(|| {
                    EmiError::Xlsx(format!(
                        "shared string {idx} missing (cell {})",
                        CellRef::new(row, cell.col)
                    ))
                })?;
                Stored::Shared { index: v, text }
            }
            (Some("inlineStr"), _) => {
                Stored::Value(CellValue::Text(cell.inline.unwrap_or_default()))
            }
            (Some(kind @ ("str" | "b" | "e" | "n")), Some(v)) => {
                Stored::Value(typed_value(Some(kind), &v))
            }
            (None, Some(v)) => match parse_decimal(&v) {
                Ok(d) => Stored::Value(CellValue::Number(d)),
                Err(_) => Stored::Raw {
                    kind: "n".into(),
                    value: v,
                },
            },
            (Some(kind), Some(v)) => Stored::Raw {
                kind: kind.to_string(),
                value: v,
            },
            (_, None) => Stored::Value(CellValue::Empty),
        }
    };
    Ok(XmlCell {
        style: cell.style,
        stored,
    })
}

fn typed_value(kind: Option<&str>, v: &str) -> CellValue {
    match kind {
        Some("str") | Some("inlineStr") => CellValue::Text(v.to_string()),
        Some("b") => CellValue::Bool(v.trim() == "1"),
        Some("e") => CellValue::Error(v.to_string()),
        _ => parse_decimal(v)
            .map(CellValue::Number)
            .unwrap_or_else(|_| CellValue::Text(v.to_string())),
    }
}

fn write_attrs(out: &mut String, attrs: &[(String, String)]) {
    for (k, v) in attrs {
        let _ = write!(out, " {k}=\"{}\"", escape(v.as_str()));
    }
}

fn write_cell(out: &mut String, p: &str, at: CellRef, cell: &XmlCell) {
    let _ = write!(out, "<{p}c r=\"{}{}\"", column_name(at.col), at.row);
    if let Some(s) = &cell.style {
        let _ = write!(out, " s=\"{}\"", escape(s.as_str()));
    }

    match &cell.stored {
        Stored::Value(CellValue::Empty) => out.push_str("/>"),
        Stored::Value(CellValue::Number(d)) => {
            let _ = write!(out, "><{p}v>{}</{p}v></{p}c>", d.normalize());
        }
        Stored::Value(CellValue::Text(s)) => {
            let _ = write!(
                out,
                " t=\"inlineStr\"><{p}is><{p}t xml:space=\"preserve\">{}</{p}t></{p}is></{p}c>",
                escape(s.as_str())
            );
        }
        Stored::Value(CellValue::Bool(b)) => {
            let _ = write!(out, " t=\"b\"><{p}v>{}</{p}v></{p}c>", u8::from(*b));
        }
        Stored::Value(CellValue::Error(e)) => {
            let _ = write!(out, " t=\"e\"><{p}v>{}</{p}v></{p}c>", escape(e.as_str()));
        }
        Stored::Shared { index, .. } => {
            let _ = write!(out, " t=\"s\"><{p}v>{index}</{p}v></{p}c>");
        }
        Stored::Formula {
            formula,
            attrs,
            kind,
            cached,
        } => {
            if let Some(k) = kind {
                let _ = write!(out, " t=\"{}\"", escape(k.as_str()));
            }
            let _ = write!(out, "><{p}f");
            write_attrs(out, attrs);
            if formula.is_empty() {
                out.push_str("/>");
            } else {
                let _ = write!(out, ">{}</{p}f>", escape(formula.as_str()));
            }
            if let Some(v) = cached {
                let _ = write!(out, "<{p}v>{}</{p}v>", escape(v.as_str()));
            }
            let _ = write!(out, "</{p}c>");
        }
        Stored::Raw { kind, value } => {
            let _ = write!(
                out,
                " t=\"{}\"><{p}v>{}</{p}v></{p}c>",
                escape(kind.as_str()),
                escape(value.as_str())
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:D6"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetData><row r="1" spans="1:4"><c r="A1" s="2" t="s"><v>0</v></c><c r="B1"><v>0.75</v></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>Line &amp; Neutral</t></is></c><c r="C2"><f>B1*100</f><v>75</v></c></row><row r="3" ht="20" customHeight="1"/><row r="4"><c r="A4" t="s"><v>1</v></c></row><row r="5"><c r="D5" s="3"/></row><row r="6"><c r="A6" t="b"><v>1</v></c></row></sheetData><mergeCells count="2"><mergeCell ref="A3:D4"/><mergeCell ref="A5:B6"/></mergeCells><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#;

    fn shared() -> Vec<String> {
        vec!["Serial".to_string(), "Neutral".to_string()]
    }

    #[test]
    fn test_parse_values() {
        let sheet = XlsxSheet::parse(SHEET, &shared()).unwrap();
        assert_eq!(sheet.cell(CellRef::new(1, 1)), CellValue::Text("Serial".into()));
        assert_eq!(sheet.cell(CellRef::new(1, 2)), CellValue::Number(dec!(0.75)));
        assert_eq!(
            sheet.cell(CellRef::new(2, 1)),
            CellValue::Text("Line & Neutral".into())
        );
        assert_eq!(sheet.cell(CellRef::new(2, 3)), CellValue::Number(dec!(75)));
        assert_eq!(sheet.cell(CellRef::new(5, 4)), CellValue::Empty);
        assert_eq!(sheet.cell(CellRef::new(6, 1)), CellValue::Bool(true));
        assert_eq!(sheet.max_row(), 6);
        assert_eq!(sheet.max_column(), 4);
        assert_eq!(sheet.merged_ranges().len(), 2);
    }

    #[test]
    fn test_round_trip_preserves_surroundings() {
        let sheet = XlsxSheet::parse(SHEET, &shared()).unwrap();
        let xml = sheet.to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<sheetViews><sheetView workbookViewId=\"0\"/></sheetViews>"));
        assert!(xml.contains("<dimension ref=\"A1:D6\"/>"));
        assert!(xml.contains("<c r=\"A1\" s=\"2\" t=\"s\"><v>0</v></c>"));
        assert!(xml.contains("<row r=\"3\" ht=\"20\" customHeight=\"1\"/>"));
        assert!(xml.contains("<f>B1*100</f><v>75</v>"));
        assert!(xml.ends_with("footer=\"0.3\"/></worksheet>"));

        let reparsed = XlsxSheet::parse(&xml, &shared()).unwrap();
        assert_eq!(reparsed.rows, sheet.rows);
        assert_eq!(reparsed.merges, sheet.merges);
    }

    #[test]
    fn test_set_cell_keeps_style() {
        let mut sheet = XlsxSheet::parse(SHEET, &shared()).unwrap();
        sheet.set_cell(CellRef::new(5, 4), "SN1".into()).unwrap();
        let xml = sheet.to_xml();
        assert!(xml.contains(
            "<c r=\"D5\" s=\"3\" t=\"inlineStr\"><is><t xml:space=\"preserve\">SN1</t></is></c>"
        ));
    }

    #[test]
    fn test_delete_rows_rewrites_refs_and_merges() {
        let mut sheet = XlsxSheet::parse(SHEET, &shared()).unwrap();
        let to_drop = sheet
            .merged_ranges()
            .into_iter()
            .find(|r| r.min_row() == 3)
            .unwrap();
        assert!(sheet.unmerge(&to_drop));
        sheet.delete_rows(3, 2).unwrap();

        assert_eq!(sheet.max_row(), 4);
        assert_eq!(sheet.cell(CellRef::new(4, 1)), CellValue::Bool(true));
        let xml = sheet.to_xml();
        assert!(xml.contains("<dimension ref=\"A1:D4\"/>"));
        assert!(xml.contains("<c r=\"D3\" s=\"3\"/>"));
        assert!(xml.contains("<mergeCells count=\"1\"><mergeCell ref=\"A3:B4\"/></mergeCells>"));
        assert!(!xml.contains("r=\"A6\""));
    }

    #[test]
    fn test_all_merges_removed_drops_element() {
        let mut sheet = XlsxSheet::parse(SHEET, &shared()).unwrap();
        for r in sheet.merged_ranges() {
            sheet.unmerge(&r);
        }
        let xml = sheet.to_xml();
        assert!(!xml.contains("mergeCells"));
        assert!(xml.contains("</sheetData><pageMargins"));
    }

    #[test]
    fn test_missing_sheet_data_is_error() {
        let xml = r#"<worksheet xmlns="x"><sheetViews/></worksheet>"#;
        assert!(XlsxSheet::parse(xml, &[]).is_err());
    }

    #[test]
    fn test_empty_sheet_data() {
        let xml = r#"<worksheet xmlns="x"><sheetData/></worksheet>"#;
        let mut sheet = XlsxSheet::parse(xml, &[]).unwrap();
        assert_eq!(sheet.max_row(), 0);
        sheet.set_cell(CellRef::new(2, 2), CellValue::Number(dec!(1.5))).unwrap();
        let xml = sheet.to_xml();
        assert!(xml.contains("<sheetData><row r=\"2\"><c r=\"B2\"><v>1.5</v></c></row></sheetData>"));
    }
}
