use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::EmiError;

/// Zip every `.pdf` below `source_dir` into `zip_path`.
///
/// Entries are named relative to `source_dir` with `/` separators and
/// written in sorted path order. Returns the number of files stored.
pub fn archive_pdfs(source_dir: &Path, zip_path: &Path) -> Result<usize, EmiError> {
    if !source_dir.is_dir() {
        return Err(EmiError::DirectoryNotFound(source_dir.to_path_buf()));
    }

    let mut files = Vec::new();
    collect_pdfs(source_dir, &mut files)?;
    files.sort();

    let mut zip = zip::ZipWriter::new(File::create(zip_path)?);
    // The zip crate reads LZMA but cannot write it.
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for path in &files {
        let relative = path.strip_prefix(source_dir).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        zip.write_all(&std::fs::read(path)?)?;
    }
    zip.finish()?;

    log::info!(
        "Archived {} PDF file(s) into {}",
        files.len(),
        zip_path.display()
    );
    Ok(files.len())
}

pub(crate) fn is_pdf(path: &Path) -> bool {
    has_extension(path, "pdf")
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn collect_pdfs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EmiError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_pdfs(&path, out)?;
        } else if is_pdf(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_archive_recurses_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("FSC048-4C0G-MP");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("b.pdf"), b"%PDF-b").unwrap();
        std::fs::write(src.join("a.PDF"), b"%PDF-a").unwrap();
        std::fs::write(src.join("notes.txt"), b"skip").unwrap();
        std::fs::write(src.join("sub").join("c.pdf"), b"%PDF-c").unwrap();

        let zip_path = dir.path().join("FSC048-4C0G.zip");
        let count = archive_pdfs(&src, &zip_path).unwrap();
        assert_eq!(count, 3);

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf", "sub/c.pdf"]);

        let mut content = String::new();
        archive
            .by_name("sub/c.pdf")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "%PDF-c");
    }

    #[test]
    fn test_entries_are_deflated() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("SN1-65W-100.pdf"), b"%PDF-1.4 %PDF-1.4 %PDF-1.4").unwrap();

        let zip_path = dir.path().join("out.zip");
        archive_pdfs(&src, &zip_path).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Deflated);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = archive_pdfs(&dir.path().join("nope"), &dir.path().join("x.zip")).unwrap_err();
        assert!(matches!(err, EmiError::DirectoryNotFound(_)));
    }
}
