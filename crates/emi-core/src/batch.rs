//! Whole-batch background work with progress events and cooperative
//! cancellation.
//!
//! Files are always processed one at a time. A batch runs on a single
//! worker thread; the caller watches `ProgressEvent`s on a channel and can
//! raise the `CancelToken`, which is checked before each file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::Rng;
use serde::Serialize;

use crate::archive::{has_extension, is_pdf};
use crate::docx::replace_in_docx;
use crate::error::EmiError;
use crate::extraction::PdfExtractor;
use crate::model::{SkippedFile, SourcedReport};
use crate::office::OfficeBridge;

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { total: usize },
    Advanced { done: usize, total: usize },
    Finished { succeeded: usize, failed: usize },
}

/// Sending half of the progress channel. A sink without a receiver drops
/// events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        ProgressSink { tx: Some(tx) }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        log::debug!("progress: {event:?}");
        if let Some(tx) = &self.tx {
            // The receiver going away is not an error for the worker.
            let _ = tx.send(event);
        }
    }
}

/// Counts for a batch whose per-file failures are tolerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// A batch job running on its worker thread.
pub struct BatchHandle<T> {
    events: Receiver<ProgressEvent>,
    cancel: CancelToken,
    thread: JoinHandle<Result<T, EmiError>>,
}

impl<T> BatchHandle<T> {
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job and return its result.
    pub fn join(self) -> Result<T, EmiError> {
        self.thread.join().map_err(|_| EmiError::WorkerPanicked)?
    }
}

/// Run `job` on a background thread.
pub fn spawn<T, F>(name: &str, job: F) -> Result<BatchHandle<T>, EmiError>
where
    T: Send + 'static,
    F: FnOnce(ProgressSink, CancelToken) -> Result<T, EmiError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || job(ProgressSink::new(tx), worker_cancel))?;
    Ok(BatchHandle {
        events: rx,
        cancel,
        thread,
    })
}

/// Reports read from a directory plus the files that were left out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadOutcome {
    pub reports: Vec<SourcedReport>,
    pub skipped: Vec<SkippedFile>,
    pub cancelled: bool,
}

/// Extract and parse every `.pdf` directly inside `dir`, in file-name
/// order. A file that fails is logged and recorded, never fatal.
pub fn read_reports(
    dir: &Path,
    extractor: &dyn PdfExtractor,
    sink: &ProgressSink,
    cancel: &CancelToken,
) -> Result<ReadOutcome, EmiError> {
    let files = list_files(dir, is_pdf)?;
    let total = files.len();
    sink.emit(ProgressEvent::Started { total });

    let mut outcome = ReadOutcome::default();
    for (i, path) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("Reading reports cancelled after {i} of {total} file(s)");
            outcome.cancelled = true;
            break;
        }
        let file_name = file_name(path);
        log::info!("FileName: {file_name}");
        match read_one(path, extractor) {
            Ok(report) => outcome.reports.push(SourcedReport { file_name, report }),
            Err(e) => {
                log::error!("Error processing {file_name}: {e}");
                outcome.skipped.push(SkippedFile {
                    file_name,
                    reason: e.to_string(),
                });
            }
        }
        sink.emit(ProgressEvent::Advanced { done: i + 1, total });
    }

    sink.emit(ProgressEvent::Finished {
        succeeded: outcome.reports.len(),
        failed: outcome.skipped.len(),
    });
    Ok(outcome)
}

fn read_one(
    path: &Path,
    extractor: &dyn PdfExtractor,
) -> Result<crate::model::MeasurementReport, EmiError> {
    let bytes = std::fs::read(path)?;
    crate::parse_pdf(&bytes, extractor)
}

/// Convert a `.docx` file, or every `.docx` in a directory, to a sibling PDF.
pub fn convert_documents(
    path: &Path,
    bridge: &dyn OfficeBridge,
    sink: &ProgressSink,
    cancel: &CancelToken,
) -> Result<BatchSummary, EmiError> {
    let files = if path.is_dir() {
        list_files(path, is_docx)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        return Err(EmiError::DirectoryNotFound(path.to_path_buf()));
    };

    let total = files.len();
    sink.emit(ProgressEvent::Started { total });
    let mut summary = BatchSummary::default();

    for (i, docx) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        let pdf = docx.with_extension("pdf");
        match bridge.convert_to_pdf(docx, &pdf) {
            Ok(()) => {
                log::info!("Converted {} to PDF.", docx.display());
                summary.succeeded += 1;
            }
            Err(e) => {
                log::error!("Error converting {} to PDF: {e}", docx.display());
                summary.failed += 1;
            }
        }
        sink.emit(ProgressEvent::Advanced { done: i + 1, total });
    }

    log::info!("{} Fail / {total} Total files convert.", summary.failed);
    sink.emit(ProgressEvent::Finished {
        succeeded: summary.succeeded,
        failed: summary.failed,
    });
    Ok(summary)
}

/// Serial substitution over a set of Word documents.
#[derive(Debug, Clone)]
pub struct ReplaceJob {
    /// A `.docx` file or a directory of them.
    pub source: PathBuf,
    pub target_dir: PathBuf,
    /// Serials to look for, pairwise with `targets`.
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    /// One more content-only replacement applied to every document.
    pub extra: Option<(String, String)>,
}

/// For each `(src, tgt)` pair, rewrite every not-yet-handled source
/// document whose name contains `src` into the target directory, with
/// `src` replaced by `tgt` in the file name and body.
pub fn replace_documents(
    job: &ReplaceJob,
    rng: &mut impl Rng,
    sink: &ProgressSink,
    cancel: &CancelToken,
) -> Result<BatchSummary, EmiError> {
    if job.sources.len() != job.targets.len() {
        log::error!(
            "Source and target string sets differ: {} vs {}",
            job.sources.len(),
            job.targets.len()
        );
        return Err(EmiError::StringSetMismatch {
            sources: job.sources.len(),
            targets: job.targets.len(),
        });
    }

    let (base, mut pending): (PathBuf, Vec<String>) = if job.source.is_dir() {
        let files = list_files(&job.source, is_docx)?;
        (job.source.clone(), files.iter().map(|p| file_name(p)).collect())
    } else if job.source.is_file() {
        let base = job
            .source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        (base, vec![file_name(&job.source)])
    } else {
        return Err(EmiError::DirectoryNotFound(job.source.clone()));
    };

    std::fs::create_dir_all(&job.target_dir)?;

    let total = pending.len();
    sink.emit(ProgressEvent::Started { total });
    let mut summary = BatchSummary::default();
    let mut done = 0;

    'pairs: for (src, tgt) in job.sources.iter().zip(&job.targets) {
        if src.is_empty() {
            continue;
        }
        let (matching, rest): (Vec<String>, Vec<String>) =
            pending.into_iter().partition(|name| name.contains(src.as_str()));
        pending = rest;

        let mut replacements = vec![(src.clone(), tgt.clone())];
        if let Some(extra) = &job.extra {
            replacements.push(extra.clone());
        }

        for name in matching {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break 'pairs;
            }
            let input = base.join(&name);
            let output = job.target_dir.join(name.replace(src.as_str(), tgt));
            match replace_in_docx(&input, &output, &replacements, rng) {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    log::error!("Error replacing strings in {name}: {e}");
                    summary.failed += 1;
                }
            }
            done += 1;
            sink.emit(ProgressEvent::Advanced { done, total });
        }
    }

    sink.emit(ProgressEvent::Finished {
        succeeded: summary.succeeded,
        failed: summary.failed,
    });
    Ok(summary)
}

fn is_docx(path: &Path) -> bool {
    has_extension(path, "docx")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Files directly inside `dir` accepted by `filter`, sorted by name.
fn list_files(dir: &Path, filter: fn(&Path) -> bool) -> Result<Vec<PathBuf>, EmiError> {
    if !dir.is_dir() {
        return Err(EmiError::DirectoryNotFound(dir.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && filter(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
