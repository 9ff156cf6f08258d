//! Integration tests for the generate_report() pipeline.
//!
//! Uses a MockExtractor that reads the "PDF" bytes as plain text pages
//! split on form feeds, so these tests run without poppler-utils. The
//! template is a real xlsx package generated into a temp directory.

use std::io::{Cursor, Read, Write};
use std::path::PathBuf;

use calamine::{open_workbook, Data, Reader, Xlsx};
use emi_core::batch::{CancelToken, ProgressSink};
use emi_core::config::ReportOptions;
use emi_core::error::EmiError;
use emi_core::extraction::{PageContent, PdfExtractor};
use emi_core::model::Channel;
use emi_core::office::SofficeBridge;
use emi_core::sheet::{CellRef, CellValue, Grid, Worksheet};
use emi_core::template::{LoadQty, TemplateLayout, MODEL_CELL};
use emi_core::{generate_report, parsing, placement, ReportJob};

struct MockExtractor;

impl PdfExtractor for MockExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<PageContent>, EmiError> {
        let text = String::from_utf8_lossy(pdf_bytes);
        Ok(text
            .split('\x0c')
            .enumerate()
            .map(|(i, t)| PageContent::from_text(i + 1, t))
            .collect())
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

/// Two-page report text with one measurement row on page two.
fn report_text(serial: &str, power: &str, load: &str, row: &str) -> String {
    let mut text = String::from("Conducted Emission Test Report\n");
    text.push_str(&format!("Serial No. : {serial}\n"));
    text.push_str(&format!("Power Rating {power}\n"));
    text.push_str(&format!("Load Condition {load}\n"));
    for i in 0..12 {
        text.push_str(&format!("Test condition line {i}\n"));
    }
    text.push('\x0c');
    text.push_str("Freq Reading Limit Margin Line\n");
    text.push_str(row);
    text.push('\n');
    text
}

const ROW_L1: &str = "0.15 45.2 38.1 10.1 55.3 48.2 66 12.3 -3.5 L1 QP";
const ROW_N: &str = "0.50 40.1 31.7 10.2 50.3 41.9 56 9.8 -2.1 N QP";

// ---------------------------------------------------------------------------
// Template package
// ---------------------------------------------------------------------------

const FIRST_ROW: u32 = 10;

fn inline(col: &str, row: u32, text: &str) -> String {
    format!("<c r=\"{col}{row}\" t=\"inlineStr\"><is><t>{text}</t></is></c>")
}

fn number(col: &str, row: u32, value: &str) -> String {
    format!("<c r=\"{col}{row}\" s=\"1\"><v>{value}</v></c>")
}

fn shared(col: &str, row: u32, index: usize) -> String {
    format!("<c r=\"{col}{row}\" t=\"s\"><v>{index}</v></c>")
}

/// Five-UUT, three-load data sheet: 12-row blocks from row 10, 65 W then
/// 90 W halves, four trailing rows ending in a signature line at row 73.
fn data_sheet_xml() -> String {
    let mut rows = String::new();
    for r in 1..=73u32 {
        let mut cells = String::new();
        if r == 5 {
            cells.push_str(&inline("E", r, "Model"));
        }
        if (FIRST_ROW..FIRST_ROW + 60).contains(&r) {
            let offset = (r - FIRST_ROW) % 12;
            match offset {
                0 => cells.push_str(&number("C", r, "65")),
                6 => cells.push_str(&number("C", r, "90")),
                _ => {}
            }
            let line = if offset % 2 == 0 { 0 } else { 1 };
            cells.push_str(&shared("D", r, line));
            if offset % 2 == 0 {
                let load = ["1", "0.75", "0.5"][((offset % 6) / 2) as usize];
                cells.push_str(&number("E", r, load));
            }
        }
        if r == 73 {
            cells.push_str(&shared("B", r, 2));
        }
        rows.push_str(&format!("<row r=\"{r}\" spans=\"1:14\">{cells}</row>"));
    }

    let merges: Vec<String> = (0..5)
        .map(|b| {
            let top = FIRST_ROW + b * 12;
            format!("<mergeCell ref=\"B{top}:B{}\"/>", top + 11)
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="B1:N73"/><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews><sheetFormatPr defaultRowHeight="15"/><sheetData>{rows}</sheetData><mergeCells count="5">{}</mergeCells><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#,
        merges.join("")
    )
}

fn setup_sheet_xml(values: &[(u32, &str)]) -> String {
    let rows: String = values
        .iter()
        .map(|(r, v)| {
            let kind = if v.parse::<f64>().is_ok() { "" } else { " t=\"str\"" };
            format!("<row r=\"{r}\"><c r=\"B{r}\"{kind}><v>{v}</v></c></row>")
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{rows}</sheetData></worksheet>"#
    )
}

const DEFAULT_SETUP: [(u32, &str); 7] = [
    (1, "10"),
    (2, "2"),
    (3, "3"),
    (4, "4"),
    (5, "5"),
    (7, "69"),
    (8, "14"),
];

fn template_xlsx(setup: &[(u32, &str)]) -> Vec<u8> {
    let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;
    let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;
    let workbook = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView xWindow="0" yWindow="0" windowWidth="28800" windowHeight="12300" activeTab="1"/></bookViews><sheets><sheet name="Setup" sheetId="1" state="hidden" r:id="rId1"/><sheet name="Conducted EMI" sheetId="2" r:id="rId2"/></sheets><definedNames><definedName name="_xlnm.Print_Area" localSheetId="1">'Conducted EMI'!$A$1:$N$73</definedName></definedNames></workbook>"#;
    let workbook_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;
    let shared_strings = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="3"><si><t>Line</t></si><si><t>Neutral</t></si><si><t>Signature</t></si></sst>"#;
    let styles = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="0"/><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="9" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs></styleSheet>"#;

    let setup = setup_sheet_xml(setup);
    let data = data_sheet_xml();
    let parts: [(&str, &str); 8] = [
        ("[Content_Types].xml", content_types),
        ("_rels/.rels", root_rels),
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", workbook_rels),
        ("xl/worksheets/sheet1.xml", &setup),
        ("xl/worksheets/sheet2.xml", &data),
        ("xl/sharedStrings.xml", shared_strings),
        ("xl/styles.xml", styles),
    ];

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in parts {
        zip.start_file(name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    source: PathBuf,
}

impl Fixture {
    fn new(reports: &[(&str, String)]) -> Fixture {
        Self::with_setup(reports, &DEFAULT_SETUP)
    }

    fn with_setup(reports: &[(&str, String)], setup: &[(u32, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let source = root.join("FSC048-4C0G-MP");
        std::fs::create_dir_all(&source).unwrap();
        for (name, text) in reports {
            std::fs::write(source.join(name), text).unwrap();
        }
        let template_dir = root.join("template");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(
            template_dir.join("2.1 Conducted EMI Measurement_3.xlsx"),
            template_xlsx(setup),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            root,
            source,
        }
    }

    fn job(&self) -> ReportJob {
        let mut job = ReportJob::new(&self.source);
        job.options.template_dir = self.root.join("template");
        job
    }

    fn workbook_path(&self) -> PathBuf {
        self.root
            .join("2.1 Conducted EMI Measurement_FSC048-4C0G.xlsx")
    }
}

fn run(job: &ReportJob) -> Result<emi_core::model::ReportOutcome, EmiError> {
    generate_report(
        job,
        &MockExtractor,
        &SofficeBridge::new(),
        &ProgressSink::silent(),
        &CancelToken::new(),
    )
}

fn cell(range: &calamine::Range<Data>, a1: &str) -> Option<Data> {
    let at: CellRef = a1.parse().unwrap();
    range
        .get_value((at.row - 1, at.col - 1))
        .cloned()
        .filter(|d| *d != Data::Empty)
}

// ---------------------------------------------------------------------------
// Test 1: Full run writes, shrinks, removes Setup and archives
// ---------------------------------------------------------------------------
#[test]
fn full_report_run() {
    let fixture = Fixture::new(&[
        ("SN1-65W-100.pdf", report_text("SN1", "65W", "100%", ROW_L1)),
        ("SN1-65W-75.pdf", report_text("SN1", "65W", "75%", ROW_N)),
        ("broken.pdf", "not a report".to_string()),
    ]);

    let outcome = run(&fixture.job()).unwrap();

    assert_eq!(outcome.uut_name, "FSC048-4C0G");
    assert_eq!(outcome.reports_placed, 2);
    assert_eq!(outcome.uut_count, 1);
    assert_eq!(outcome.rows_deleted, 48);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].file_name, "broken.pdf");
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.workbook, fixture.workbook_path());

    let mut wb: Xlsx<_> = open_workbook(&outcome.workbook).unwrap();
    assert_eq!(wb.sheet_names(), vec!["Conducted EMI".to_string()]);
    let range = wb.worksheet_range("Conducted EMI").unwrap();

    assert_eq!(cell(&range, "F5"), Some(Data::String("FSC048-4C0G".into())));
    assert_eq!(cell(&range, "B10"), Some(Data::String("SN1".into())));

    // 100% on Line: first slot, first row.
    assert_eq!(cell(&range, "F10"), Some(Data::Float(0.15)));
    assert_eq!(cell(&range, "G10"), Some(Data::Float(45.2)));
    assert_eq!(cell(&range, "H10"), Some(Data::Float(10.1)));
    assert_eq!(cell(&range, "I10"), Some(Data::Float(66.0)));
    assert_eq!(cell(&range, "J10"), Some(Data::String("-".into())));
    assert_eq!(cell(&range, "K10"), Some(Data::Float(38.1)));
    assert_eq!(cell(&range, "L10"), Some(Data::Float(48.2)));

    // 75% on Neutral: second slot, second row.
    assert_eq!(cell(&range, "F13"), Some(Data::Float(0.5)));
    assert_eq!(cell(&range, "F12"), None);

    // Trailing rows moved up by the 48 deleted rows.
    assert_eq!(cell(&range, "B25"), Some(Data::String("Signature".into())));
    assert_eq!(cell(&range, "B73"), None);

    let archive = outcome.archive.unwrap();
    assert_eq!(archive, fixture.root.join("FSC048-4C0G.zip"));
    let zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
    assert_eq!(zip.len(), 3);
}

// ---------------------------------------------------------------------------
// Test 2: Saved package internals stay consistent
// ---------------------------------------------------------------------------
#[test]
fn saved_package_drops_setup_references() {
    let fixture = Fixture::new(&[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))]);
    let outcome = run(&fixture.job()).unwrap();

    let mut zip = zip::ZipArchive::new(std::fs::File::open(&outcome.workbook).unwrap()).unwrap();
    assert!(zip.by_name("xl/worksheets/sheet1.xml").is_err());

    let mut workbook = String::new();
    zip.by_name("xl/workbook.xml")
        .unwrap()
        .read_to_string(&mut workbook)
        .unwrap();
    assert!(!workbook.contains("Setup"));
    assert!(workbook.contains("activeTab=\"0\""));
    assert!(workbook.contains("localSheetId=\"0\""));

    let mut sheet = String::new();
    zip.by_name("xl/worksheets/sheet2.xml")
        .unwrap()
        .read_to_string(&mut sheet)
        .unwrap();
    assert!(sheet.contains("<mergeCells count=\"1\"><mergeCell ref=\"B10:B21\"/></mergeCells>"));
    assert!(sheet.contains("<sheetView tabSelected=\"1\" workbookViewId=\"0\"/>"));
}

// ---------------------------------------------------------------------------
// Test 3: Embedding failure is a warning, the workbook stays
// ---------------------------------------------------------------------------
#[test]
fn embed_failure_is_reported_not_fatal() {
    let fixture = Fixture::new(&[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))]);
    let mut job = fixture.job();
    job.options.embed_archive = true;

    let outcome = run(&job).unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("embedding"));
    assert!(outcome.workbook.exists());
    assert!(outcome.archive.is_some());
}

// ---------------------------------------------------------------------------
// Test 4: No archive when switched off, explicit output directory
// ---------------------------------------------------------------------------
#[test]
fn no_archive_and_custom_out_dir() {
    let fixture = Fixture::new(&[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))]);
    let mut job = fixture.job();
    job.options.archive_sources = false;
    job.out_dir = Some(fixture.root.join("reports"));

    let outcome = run(&job).unwrap();
    assert!(outcome.archive.is_none());
    assert_eq!(
        outcome.workbook,
        fixture
            .root
            .join("reports")
            .join("2.1 Conducted EMI Measurement_FSC048-4C0G.xlsx")
    );
    assert!(!fixture.root.join("FSC048-4C0G.zip").exists());
}

// ---------------------------------------------------------------------------
// Test 5: Capacity failure produces no output
// ---------------------------------------------------------------------------
#[test]
fn six_uuts_rejected_without_output() {
    let reports: Vec<(String, String)> = ["A", "B", "C", "D", "E", "F"]
        .iter()
        .map(|p| {
            (
                format!("{p}.pdf"),
                report_text(&format!("{p}-01"), "65W", "100%", ROW_L1),
            )
        })
        .collect();
    let borrowed: Vec<(&str, String)> = reports
        .iter()
        .map(|(n, t)| (n.as_str(), t.clone()))
        .collect();
    let fixture = Fixture::new(&borrowed);

    let err = run(&fixture.job()).unwrap_err();
    assert!(matches!(err, EmiError::CapacityExceeded { found: 6, max: 5 }));
    assert!(!fixture.workbook_path().exists());
}

// ---------------------------------------------------------------------------
// Test 6: Configuration failures
// ---------------------------------------------------------------------------
#[test]
fn missing_template_and_directory() {
    let fixture = Fixture::new(&[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))]);

    let mut job = fixture.job();
    job.load_qty = LoadQty::FOUR;
    assert!(matches!(run(&job), Err(EmiError::TemplateNotFound(_))));

    let mut job = fixture.job();
    job.source_dir = fixture.root.join("missing");
    assert!(matches!(run(&job), Err(EmiError::DirectoryNotFound(_))));
}

#[test]
fn invalid_setup_value_rejected() {
    let mut setup = DEFAULT_SETUP;
    setup[2] = (3, "abc");
    let fixture = Fixture::with_setup(
        &[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))],
        &setup,
    );
    match run(&fixture.job()) {
        Err(EmiError::TemplateInvalid(msg)) => assert!(msg.contains("B3")),
        other => panic!("expected TemplateInvalid, got {other:?}"),
    }
}

#[test]
fn layout_past_sheet_rejected() {
    let mut setup = DEFAULT_SETUP;
    setup[0] = (1, "30");
    let fixture = Fixture::with_setup(
        &[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))],
        &setup,
    );
    assert!(matches!(run(&fixture.job()), Err(EmiError::Layout(_))));
    assert!(!fixture.workbook_path().exists());
}

// ---------------------------------------------------------------------------
// Test 7: Cancelled before the first file
// ---------------------------------------------------------------------------
#[test]
fn cancelled_run_saves_nothing() {
    let fixture = Fixture::new(&[("a.pdf", report_text("SN1", "65W", "100%", ROW_L1))]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = generate_report(
        &fixture.job(),
        &MockExtractor,
        &SofficeBridge::new(),
        &ProgressSink::silent(),
        &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, EmiError::Cancelled));
    assert!(!fixture.workbook_path().exists());
}

// ---------------------------------------------------------------------------
// Test 8: Parse and place through the library API on an in-memory sheet
// ---------------------------------------------------------------------------
#[test]
fn parse_and_place_on_grid() {
    let text = report_text("SN9", "90W", "50%", ROW_N);
    let (one, two) = text.split_once('\x0c').unwrap();
    let report = parsing::parse_report(one, two).unwrap();
    assert_eq!(report.serial.as_deref(), Some("SN9"));
    assert_eq!(report.rated_power, Some(90));
    assert_eq!(report.load_percent, Some(50));
    assert_eq!(report.channel, Channel::Average);

    let layout = TemplateLayout {
        first_row: 3,
        serial_col: 1,
        voltage_col: 2,
        line_col: 3,
        load_col: 4,
        last_row: 62,
        last_col: 11,
        model_cell: MODEL_CELL,
    };
    let mut sheet = Grid::with_rows(66);
    for block in 0..5u32 {
        let anchor = 3 + block * 12;
        sheet
            .set_cell(CellRef::new(anchor, 2), CellValue::from_token("65"))
            .unwrap();
        for (i, load) in ["1", "0.75", "0.5", "1", "0.75", "0.5"].iter().enumerate() {
            let row = anchor + i as u32 * 2;
            sheet
                .set_cell(CellRef::new(row, 4), CellValue::from_token(load))
                .unwrap();
            sheet.set_cell(CellRef::new(row, 3), "Line".into()).unwrap();
            sheet
                .set_cell(CellRef::new(row + 1, 3), "Neutral".into())
                .unwrap();
        }
    }

    let reports = vec![emi_core::model::SourcedReport {
        file_name: "sn9.pdf".into(),
        report,
    }];
    let (prepared, placements) =
        placement::place_all(&reports, &mut sheet, &layout, LoadQty::THREE).unwrap();
    assert_eq!(prepared.rows_deleted, 48);
    // 90 W -> second half (row 9), 50% -> third slot (row 13), N -> row 14.
    assert_eq!(placements[0].row, 14);
    assert_eq!(
        sheet.cell(CellRef::new(14, 5)),
        CellValue::from_token("0.50")
    );
    assert_eq!(sheet.cell(CellRef::new(14, 9)), CellValue::Text("-".into()));
}

#[test]
fn peak_channel_wins_when_lower() {
    let page_two = "Freq Reading Limit Margin Line\n\
        0.15 45.2 38.1 10.1 5.3 48.2 66 12.3 -3.5 L1 QP\n\
        0.50 40.1 31.7 10.2 7.3 41.9 56 9.8 -2.1 N QP";
    let text = report_text("SN1", "65W", "100%", "");
    let (one, _) = text.split_once('\x0c').unwrap();
    let report = parsing::parse_report(one, page_two).unwrap();
    assert_eq!(report.channel, Channel::Peak);
    assert_eq!(report.rows[0].field(4), Some("5.3"));
}
