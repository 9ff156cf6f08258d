use crate::error::EmiError;
use crate::parsing::values::leading_int;

/// Labelled fields found in the report header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportHeader {
    pub serial: Option<String>,
    pub rated_power: Option<u32>,
    pub load_percent: Option<u32>,
}

/// Extract header fields from the leading text lines.
///
/// A field line starts with its label token (`Serial`, `Power`, `Load`) and
/// carries the value as its last token. A later line with the same label
/// overwrites an earlier one; numeric values are only checked once the last
/// occurrence is known.
pub fn parse_header(lines: &[&str]) -> Result<ReportHeader, EmiError> {
    let mut serial = None;
    let mut power = None;
    let mut load = None;

    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (Some(&label), Some(&value)) = (tokens.first(), tokens.last()) else {
            continue;
        };

        match label {
            "Serial" => serial = Some(value),
            "Power" => power = Some(value),
            "Load" => load = Some(value),
            _ => {}
        }
    }

    Ok(ReportHeader {
        serial: serial.map(str::to_string),
        rated_power: power.map(|v| numeric_field("Power", v)).transpose()?,
        load_percent: load.map(|v| numeric_field("Load", v)).transpose()?,
    })
}

fn numeric_field(label: &str, value: &str) -> Result<u32, EmiError> {
    leading_int(value).ok_or_else(|| {
        EmiError::ParseError(format!("{} value '{}' has no leading number", label, value))
    })
}
