//! CLI output formatting for upload runs.
//!
//! # Output Format
//!
//! ```text
//! ==> biology-101: 120 files (40 already uploaded)
//!     [biology-101] resumed 40/40 files
//!     [biology-101] 50/120 fig-50.tif → fig-50.tif.jpg (812.3 KB)
//!     [biology-101] 75/120 fig-75.png → fig-75.png (96.0 KB, kept)
//!     [biology-101] 120/120 plate.psd → plate.psd.jpg (2.4 MB)
//!     index → library/biology-101/images-index.json (120 entries)
//!
//! Done. Uploaded 81 objects in 93.4s
//! ```
//!
//! File progress is throttled: a stored file is shown every
//! [`PROGRESS_EVERY`] files and on the last file of a book; resumed files
//! every [`RESUME_EVERY`] and on the last resumed file.
//!
//! # Architecture
//!
//! Each event has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and `print_*` wrappers that write to stdout or stderr.
//! Format functions are pure: no I/O, no side effects.

use crate::pipeline::{PipelineEvent, RunReport};
use std::time::Duration;

/// Show every Nth stored file.
pub const PROGRESS_EVERY: usize = 25;
/// Show every Nth resumed file.
pub const RESUME_EVERY: usize = 50;
/// Error text kept in a failure diagnostic.
const MAX_ERROR_CHARS: usize = 200;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count with one decimal.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Format a single pipeline event as display lines.
///
/// Throttled events return an empty vector.
pub fn format_pipeline_event(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::BookStarted {
            book,
            file_count,
            resumable,
        } => {
            if *resumable > 0 {
                vec![format!(
                    "==> {book}: {file_count} files ({resumable} already uploaded)"
                )]
            } else {
                vec![format!("==> {book}: {file_count} files")]
            }
        }
        PipelineEvent::FileResumed {
            book,
            resumed,
            resumable,
            ..
        } => {
            if resumed % RESUME_EVERY == 0 || resumed == resumable {
                vec![format!(
                    "{}[{book}] resumed {resumed}/{resumable} files",
                    indent(1)
                )]
            } else {
                Vec::new()
            }
        }
        PipelineEvent::FileStored {
            book,
            original,
            stored_name,
            position,
            total,
            converted,
            stored_bytes,
            dry_run,
        } => {
            if position % PROGRESS_EVERY != 0 && position != total {
                return Vec::new();
            }
            let mut detail = format_bytes(*stored_bytes);
            if !converted {
                detail.push_str(", kept");
            }
            if *dry_run {
                detail.push_str(", dry run");
            }
            vec![format!(
                "{}[{book}] {position}/{total} {original} \u{2192} {stored_name} ({detail})",
                indent(1)
            )]
        }
        PipelineEvent::FileBlocked {
            book,
            original,
            reason,
        } => vec![format!(
            "{}[BLOCKED] {book}/{original}: {}",
            indent(1),
            truncate(reason, MAX_ERROR_CHARS)
        )],
        PipelineEvent::IndexUploaded {
            path, entries, ..
        } => vec![format!(
            "{}index \u{2192} {path} ({entries} entries)",
            indent(1)
        )],
        PipelineEvent::IndexUnchanged { path, .. } => {
            vec![format!("{}index unchanged: {path}", indent(1))]
        }
        PipelineEvent::IndexPrepared {
            path, entries, ..
        } => vec![format!(
            "{}index (dry run) {path} ({entries} entries)",
            indent(1)
        )],
    }
}

/// Final line of a run.
pub fn format_run_summary(report: &RunReport, elapsed: Duration, dry_run: bool) -> String {
    let secs = elapsed.as_secs_f64();
    if dry_run {
        let entries: usize = report.books.iter().map(|b| b.manifest.entries.len()).sum();
        format!(
            "Dry run done. Prepared {entries} entries across {} books in {secs:.1}s",
            report.books.len()
        )
    } else {
        format!(
            "Done. Uploaded {} objects in {secs:.1}s",
            report.objects_written()
        )
    }
}

/// Files a dry run could not prepare, one line each.
pub fn format_blocked_files(report: &RunReport) -> Vec<String> {
    let blocked = report.blocked();
    if blocked.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Blocked files ({}):", blocked.len())];
    for (book, file) in blocked {
        lines.push(format!(
            "{}{book}/{}: {}",
            indent(1),
            file.original,
            truncate(&file.reason, MAX_ERROR_CHARS)
        ));
    }
    lines
}

/// Short diagnostic for a file that aborted the run.
pub fn format_failure(book: &str, original: &str, message: &str) -> String {
    format!(
        "[ERR] upload failed ({book}/{original}): {}",
        truncate(message, MAX_ERROR_CHARS)
    )
}

/// Print the lines for one event to stdout.
pub fn print_pipeline_event(event: &PipelineEvent) {
    for line in format_pipeline_event(event) {
        println!("{}", line);
    }
}

/// Print the failure diagnostic to stderr.
pub fn print_failure(book: &str, original: &str, message: &str) {
    eprintln!("{}", format_failure(book, original, message));
}
