use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static LOAD_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_\d+\.xlsx$").expect("valid regex"));

/// UUT model name from a source directory: the first two dash-delimited
/// tokens of its basename ("FSC048-4C0G-MP" -> "FSC048-4C0G"), or the whole
/// basename when it has no dash.
pub fn uut_name(source_dir: &Path) -> String {
    let base = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source_dir.to_string_lossy().to_string());

    let tokens: Vec<&str> = base.split('-').collect();
    if tokens.len() > 1 {
        format!("{}-{}", tokens[0], tokens[1])
    } else {
        base
    }
}

/// Output workbook name derived from the template name.
///
/// "2.1 Conducted EMI Measurement_3.xlsx" -> "2.1 Conducted EMI Measurement_FSC048-4C0G.xlsx".
/// A template without a numeric suffix gets `_<uut>` inserted before the extension.
pub fn output_file_name(template: &Path, uut: &str) -> String {
    let base = template
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let re = &*LOAD_SUFFIX;
    if re.is_match(&base) {
        return re
            .replace(&base, regex::NoExpand(&format!("_{uut}.xlsx")))
            .to_string();
    }

    match base.strip_suffix(".xlsx") {
        Some(stem) => format!("{stem}_{uut}.xlsx"),
        None => format!("{base}_{uut}.xlsx"),
    }
}
