//! Minimal xlsx package editor.
//!
//! The package is kept as a list of zip entries. Worksheets are parsed on
//! demand into `XlsxSheet`; everything else is carried through untouched,
//! apart from the workbook parts edited by `remove_sheet` and the calc
//! chain, which is dropped on save.

pub mod shared;
pub mod sheet;

pub use sheet::XlsxSheet;

use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::EmiError;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES: &str = "[Content_Types].xml";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const CALC_CHAIN: &str = "xl/calcChain.xml";

#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    rel_id: String,
    part: String,
}

/// An xlsx package opened for editing.
pub struct XlsxWorkbook {
    entries: Vec<(String, Vec<u8>)>,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
    open: Vec<(String, XlsxSheet)>,
}

impl XlsxWorkbook {
    pub fn open(path: &Path) -> Result<XlsxWorkbook, EmiError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<XlsxWorkbook, EmiError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push((name, data));
        }

        let mut workbook = XlsxWorkbook {
            entries,
            sheets: Vec::new(),
            shared_strings: Vec::new(),
            open: Vec::new(),
        };

        let workbook_xml = workbook.part_text(WORKBOOK_PART)?.ok_or_else(|| {
            EmiError::Xlsx(format!("package has no {WORKBOOK_PART}"))
        })?;
        let rels_xml = workbook
            .part_text(WORKBOOK_RELS)?
            .ok_or_else(|| EmiError::Xlsx(format!("package has no {WORKBOOK_RELS}")))?;
        workbook.sheets = read_sheet_entries(&workbook_xml, &rels_xml)?;

        if let Some(xml) = workbook.part_text(SHARED_STRINGS)? {
            workbook.shared_strings = shared::parse_shared_strings(&xml)?;
        }

        log::debug!(
            "Opened workbook with sheets {:?}",
            workbook.sheet_names().collect::<Vec<_>>()
        );
        Ok(workbook)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }

    /// Parsed worksheet by name, loaded on first access.
    pub fn worksheet_mut(&mut self, name: &str) -> Result<&mut XlsxSheet, EmiError> {
        let entry = self
            .sheets
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| EmiError::TemplateInvalid(format!("sheet '{name}' not found")))?;

        let pos = match self.open.iter().position(|(part, _)| *part == entry.part) {
            Some(pos) => pos,
            None => {
                let xml = self.part_text(&entry.part)?.ok_or_else(|| {
                    EmiError::Xlsx(format!("sheet part {} is missing", entry.part))
                })?;
                let sheet = XlsxSheet::parse(&xml, &self.shared_strings)?;
                self.open.push((entry.part.clone(), sheet));
                self.open.len() - 1
            }
        };
        Ok(&mut self.open[pos].1)
    }

    /// Remove a sheet and every package reference to it.
    pub fn remove_sheet(&mut self, name: &str) -> Result<(), EmiError> {
        let index = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| EmiError::TemplateInvalid(format!("sheet '{name}' not found")))?;
        let entry = self.sheets.remove(index);

        let workbook_xml = self
            .part_text(WORKBOOK_PART)?
            .ok_or_else(|| EmiError::Xlsx(format!("package has no {WORKBOOK_PART}")))?;
        let workbook_xml = rewrite_workbook(&workbook_xml, &entry.name, index)?;
        self.set_part(WORKBOOK_PART, workbook_xml.into_bytes());

        if let Some(rels) = self.part_text(WORKBOOK_RELS)? {
            let rels = drop_elements(&rels, "Relationship", |e| {
                attr_local(e, b"Id").as_deref() == Some(entry.rel_id.as_str())
            })?;
            self.set_part(WORKBOOK_RELS, rels.into_bytes());
        }

        self.drop_content_type(&entry.part)?;

        let part_rels = part_rels_path(&entry.part);
        self.entries
            .retain(|(n, _)| *n != entry.part && *n != part_rels);
        self.open.retain(|(part, _)| *part != entry.part);

        log::debug!("Removed sheet '{}' ({})", entry.name, entry.part);
        Ok(())
    }

    /// Serialize the package. Open sheets are written from their parsed form.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, EmiError> {
        if self.entries.iter().any(|(n, _)| n == CALC_CHAIN) {
            self.entries.retain(|(n, _)| n != CALC_CHAIN);
            if let Some(rels) = self.part_text(WORKBOOK_RELS)? {
                let rels = drop_elements(&rels, "Relationship", |e| {
                    attr_local(e, b"Type").is_some_and(|t| t.ends_with("/calcChain"))
                })?;
                self.set_part(WORKBOOK_RELS, rels.into_bytes());
            }
            self.drop_content_type(CALC_CHAIN)?;
        }

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, data) in &self.entries {
            zip.start_file(name.as_str(), options)?;
            match self.open.iter().find(|(part, _)| part == name) {
                Some((_, sheet)) => zip.write_all(sheet.to_xml().as_bytes())?,
                None => zip.write_all(data)?,
            }
        }

        Ok(zip.finish()?.into_inner())
    }

    pub fn save(&mut self, path: &Path) -> Result<(), EmiError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn part_text(&self, name: &str) -> Result<Option<String>, EmiError> {
        match self.entries.iter().find(|(n, _)| n == name) {
            Some((_, data)) => String::from_utf8(data.clone())
                .map(Some)
                .map_err(|_| EmiError::Xlsx(format!("{name} is not valid UTF-8"))),
            None => Ok(None),
        }
    }

    fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = data,
            None => self.entries.push((name.to_string(), data)),
        }
    }

    fn drop_content_type(&mut self, part: &str) -> Result<(), EmiError> {
        if let Some(types) = self.part_text(CONTENT_TYPES)? {
            let part_name = format!("/{part}");
            let types = drop_elements(&types, "Override", |e| {
                attr_local(e, b"PartName").as_deref() == Some(part_name.as_str())
            })?;
            self.set_part(CONTENT_TYPES, types.into_bytes());
        }
        Ok(())
    }
}

pub(crate) fn xml_err(e: impl std::fmt::Display) -> EmiError {
    EmiError::Xlsx(format!("malformed XML: {e}"))
}

pub(crate) fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Unescaped value of the attribute whose local name is `key`.
pub(crate) fn attr_local(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn part_rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = vec!["xl"];
    for segment in target.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn read_sheet_entries(workbook_xml: &str, rels_xml: &str) -> Result<Vec<SheetEntry>, EmiError> {
    let mut targets = Vec::new();
    let mut reader = Reader::from_reader(rels_xml.as_bytes());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr_local(&e, b"Id"), attr_local(&e, b"Target"))
                {
                    targets.push((id, resolve_target(&target)));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(workbook_xml.as_bytes());
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr_local(&e, b"name")
                    .ok_or_else(|| EmiError::Xlsx("sheet element without a name".into()))?;
                let rel_id = attr_local(&e, b"id")
                    .ok_or_else(|| EmiError::Xlsx(format!("sheet '{name}' has no r:id")))?;
                let part = targets
                    .iter()
                    .find(|(id, _)| *id == rel_id)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| {
                        EmiError::Xlsx(format!("sheet '{name}' relationship {rel_id} not found"))
                    })?;
                sheets.push(SheetEntry { name, rel_id, part });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Copy `xml`, leaving out every element named `element` (with its
/// children) for which `remove` returns true.
fn drop_elements(
    xml: &str,
    element: &str,
    remove: impl Fn(&BytesStart) -> bool,
) -> Result<String, EmiError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut skip_depth = 0u32;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_err)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }
        match event {
            Event::Eof => break,
            Event::Empty(ref e) if e.local_name().as_ref() == element.as_bytes() && remove(e) => {}
            Event::Start(ref e) if e.local_name().as_ref() == element.as_bytes() && remove(e) => {
                skip_depth = 1;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
        buf.clear();
    }

    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

/// Rewrite `workbook.xml` after removing the sheet at `index`.
fn rewrite_workbook(xml: &str, name: &str, index: usize) -> Result<String, EmiError> {
    let xml = drop_elements(xml, "sheet", |e| attr_local(e, b"name").as_deref() == Some(name))?;

    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut pending: Option<(BytesStart<'static>, String)> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_err)?;

        if let Some((_, text)) = pending.as_mut() {
            match event {
                Event::Text(t) => {
                    let raw = String::from_utf8_lossy(&t).to_string();
                    text.push_str(&raw);
                }
                Event::End(end) if end.local_name().as_ref() == b"definedName" => {
                    let (start, text) = pending.take().ok_or_else(|| xml_err("definedName"))?;
                    let keep = match start_local_sheet(&start) {
                        Some(id) if id as usize == index => false,
                        _ => !refers_to_sheet(&text, name),
                    };
                    if keep {
                        writer
                            .write_event(Event::Start(shift_local_sheet_id(&start, index)))
                            .map_err(xml_err)?;
                        writer
                            .write_event(Event::Text(quick_xml::events::BytesText::from_escaped(
                                text,
                            )))
                            .map_err(xml_err)?;
                        writer.write_event(Event::End(end)).map_err(xml_err)?;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref e) if e.local_name().as_ref() == b"definedName" => {
                pending = Some((e.clone().into_owned(), String::new()));
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"workbookView" => {
                writer
                    .write_event(Event::Empty(shift_view_tabs(e, index)))
                    .map_err(xml_err)?;
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"workbookView" => {
                writer
                    .write_event(Event::Start(shift_view_tabs(e, index)))
                    .map_err(xml_err)?;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
        buf.clear();
    }

    let out = String::from_utf8(writer.into_inner()).map_err(xml_err)?;
    Ok(out.replace("<definedNames></definedNames>", ""))
}

/// Characters that may precede a sheet reference inside a formula.
const REFERENCE_BOUNDARY: &str = ",(=+-*/&^<>:; ";

/// Whether `formula` references `sheet` as a whole `Sheet!` token.
fn refers_to_sheet(formula: &str, sheet: &str) -> bool {
    let quoted = format!("'{}'!", sheet.replace('\'', "''"));
    let plain = format!("{sheet}!");
    [quoted, plain].iter().any(|needle| {
        formula.match_indices(needle.as_str()).any(|(at, _)| {
            formula[..at]
                .chars()
                .next_back()
                .map_or(true, |c| REFERENCE_BOUNDARY.contains(c))
        })
    })
}

fn start_local_sheet(e: &BytesStart) -> Option<u32> {
    attr_local(e, b"localSheetId").and_then(|v| v.parse().ok())
}

/// Re-emit `e` with the numeric attributes named in `keys` mapped through `f`.
fn map_numeric_attrs(
    e: &BytesStart,
    keys: &[&[u8]],
    f: impl Fn(u32) -> u32,
) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut out = BytesStart::new(name);
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref().to_vec();
        if keys.contains(&key.as_slice()) {
            if let Some(n) = attr
                .unescape_value()
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
            {
                let key = String::from_utf8_lossy(&key).to_string();
                let value = f(n).to_string();
                out.push_attribute((key.as_str(), value.as_str()));
                continue;
            }
        }
        out.push_attribute(attr);
    }
    out.into_owned()
}

fn shift_local_sheet_id(e: &BytesStart, removed: usize) -> BytesStart<'static> {
    let removed = removed as u32;
    map_numeric_attrs(e, &[&b"localSheetId"[..]], |id| if id > removed { id - 1 } else { id })
}

fn shift_view_tabs(e: &BytesStart, removed: usize) -> BytesStart<'static> {
    let removed = removed as u32;
    map_numeric_attrs(e, &[&b"activeTab"[..], &b"firstSheet"[..]], |tab| {
        if tab > removed {
            tab - 1
        } else if tab == removed {
            removed.saturating_sub(1)
        } else {
            tab
        }
    })
}
