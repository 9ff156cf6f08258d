//! Text substitution inside Word documents.
//!
//! Used to derive one unit's test report from another's: serial numbers
//! are swapped in the document body and paired readings get a small
//! random offset.

use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::EmiError;
use crate::parsing::values::parse_decimal;

const DOCUMENT_PART: &str = "word/document.xml";

/// Positions within every group of eight values that hold a reading.
const READING_SLOTS: [usize; 2] = [1, 4];

static VALUE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">(\d+\.\d+)<").expect("valid regex"));

/// Split a user-entered string set: on `,` when present, else on whitespace.
pub fn parse_string_set(text: &str) -> Vec<String> {
    if text.contains(',') {
        text.split(',').map(|s| s.to_string()).collect()
    } else {
        text.split_whitespace().map(|s| s.to_string()).collect()
    }
}

/// Copy a `.docx`, applying string replacements to its document body.
///
/// Pairs with an empty `old` string are skipped. After the replacements
/// the paired readings are perturbed with `perturb_paired_values`.
pub fn replace_in_docx(
    input: &Path,
    output: &Path,
    replacements: &[(String, String)],
    rng: &mut impl Rng,
) -> Result<(), EmiError> {
    let bytes = std::fs::read(input)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice()))?;

    let mut out = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut found_document = false;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if name == DOCUMENT_PART {
            found_document = true;
            let mut text = String::from_utf8(data)
                .map_err(|_| EmiError::Docx(format!("{DOCUMENT_PART} is not valid UTF-8")))?;
            for (old, new) in replacements {
                if !old.is_empty() {
                    text = text.replace(old.as_str(), new);
                }
            }
            data = perturb_paired_values(&text, rng).into_bytes();
        }

        out.start_file(name, options)?;
        out.write_all(&data)?;
    }

    if !found_document {
        return Err(EmiError::Docx(format!(
            "{DOCUMENT_PART} not found in {}",
            input.display()
        )));
    }

    let bytes = out.finish()?.into_inner();
    std::fs::write(output, bytes)?;
    log::info!("Generated {}", output.display());
    Ok(())
}

/// Offset paired readings in document XML.
///
/// Every `>d.d<` number is indexed in document order. For index `i` with
/// `i % 8` in {1, 4}, with `a = v[i]`, `b = v[i + 1]` and
/// `upper = trunc((b - a) * 100)`, the reading becomes `a + r / 2000`
/// (`r` uniform in `[-upper, upper)`) and `v[i + 2]` becomes
/// `b - reading`. Both are rounded to two decimals. Only the matched
/// tokens are touched.
pub fn perturb_paired_values(xml: &str, rng: &mut impl Rng) -> String {
    let matches: Vec<(std::ops::Range<usize>, Decimal)> = VALUE_PATTERN
        .captures_iter(xml)
        .filter_map(|c| {
            let m = c.get(1)?;
            Some((m.range(), parse_decimal(m.as_str()).ok()?))
        })
        .collect();

    let mut replaced: Vec<Option<String>> = vec![None; matches.len()];
    for i in 0..matches.len() {
        if !READING_SLOTS.contains(&(i % 8)) || i + 2 >= matches.len() {
            continue;
        }
        let reading = matches[i].1;
        let reference = matches[i + 1].1;
        let upper = ((reference - reading) * Decimal::ONE_HUNDRED)
            .trunc()
            .try_into()
            .unwrap_or(0i64);
        if upper <= 0 {
            continue;
        }
        let offset = Decimal::from(rng.random_range(-upper..upper)) / Decimal::from(2000);
        let new_reading = reading + offset;
        let partner = reference - new_reading;
        replaced[i] = Some(format_value(new_reading));
        replaced[i + 2] = Some(format_value(partner));
    }

    let mut out = String::with_capacity(xml.len());
    let mut last = 0;
    for ((range, _), new) in matches.iter().zip(&replaced) {
        if let Some(text) = new {
            out.push_str(&xml[last..range.start]);
            out.push_str(text);
            last = range.end;
        }
    }
    out.push_str(&xml[last..]);
    out
}

/// Two-decimal rendering without trailing zeros, keeping one decimal
/// place for whole numbers ("12.30" -> "12.3", "7" -> "7.0").
fn format_value(value: Decimal) -> String {
    let rounded = value
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    if rounded.scale() == 0 {
        format!("{rounded}.0")
    } else {
        rounded.to_string()
    }
}
