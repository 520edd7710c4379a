//! Per-book optimize, upload and resume driver.
//!
//! For every file of a book, strictly in order:
//!
//! 1. Stop if the run was cancelled (between files only).
//! 2. Skip if the resume ledger already holds a completed entry.
//! 3. Decide preserve vs. convert ([`crate::policy`]).
//! 4. Produce the bytes: read verbatim, or run the adaptive size-budget loop.
//! 5. Hash the bytes and claim a unique object name.
//! 6. Upload with retries (skipped on dry runs).
//! 7. Record the entry in the ledger and persist it atomically.
//! 8. Append the entry to the book manifest and report progress.
//!
//! After the last file the manifest is uploaded as
//! `{prefix}/{slug}/images-index.json`. A book whose files were all resumed
//! and whose manifest digest matches the ledger's `indexSha256` issues no
//! network writes at all.
//!
//! A failing file aborts the whole run on a real upload. Dry runs never touch
//! the network or the ledger; failing files are collected as blocked and the
//! run goes on.
//!
//! ## Concurrency
//!
//! Files within a book are sequential: the ledger is a read-modify-persist
//! cycle owned by one worker. Books are independent and may run on a rayon
//! pool sized by `max_parallel_books`. The first failing book raises the
//! shared [`CancelFlag`] so the others stop at their next file boundary.

use crate::config::{BookliftConfig, effective_book_workers};
use crate::hashing::sha256_hex;
use crate::imaging::{
    BackendError, BudgetOutcome, ImageBackend, MAX_ATTEMPTS, OptimizeParams, Quality,
    optimize_within_budget,
};
use crate::ledger::ResumeLedger;
use crate::naming::{DEFAULT_MAX_NAME_LEN, NameRegistry, sanitize_storage_name};
use crate::policy::{ConversionDecision, decide, extension_of, mime_for_ext};
use crate::retry::{RetryPolicy, with_retries};
use crate::scan::BookSource;
use crate::transport::{ObjectStore, TransportError};
use crate::types::{BookLayout, BookManifest, ManifestEntry};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Content type of the per-book index object.
pub const INDEX_CONTENT_TYPE: &str = "application/json";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{book}/{original}: {source}")]
    File {
        book: String,
        original: String,
        #[source]
        source: FileError,
    },
    #[error("index upload failed for {book}: {source}")]
    Index {
        book: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to save resume ledger for {book}: {source}")]
    Ledger {
        book: String,
        #[source]
        source: std::io::Error,
    },
    #[error("run cancelled")]
    Cancelled,
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a single file could not be delivered.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("blocked: {0}")]
    Blocked(String),
    #[error("upload failed: {0}")]
    Transport(#[from] TransportError),
}

/// Settings for one run, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub params: OptimizeParams,
    /// Upload ceiling in bytes.
    pub max_upload_bytes: u64,
    pub convert_all: bool,
    pub prefix: String,
    pub upsert: bool,
    pub retry: RetryPolicy,
    pub resume: bool,
    pub state_dir: PathBuf,
    pub dry_run: bool,
    pub max_name_len: usize,
    pub book_workers: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &BookliftConfig, dry_run: bool) -> Self {
        Self {
            params: OptimizeParams {
                max_px: config.images.max_px,
                quality: Quality::new(config.images.quality),
                alpha: config.images.alpha_mode,
            },
            max_upload_bytes: config.images.max_upload_bytes(),
            convert_all: config.images.convert_all,
            prefix: config.storage.prefix.clone(),
            upsert: config.storage.upsert,
            retry: RetryPolicy::with_retries(config.storage.retries),
            resume: config.resume.enabled,
            state_dir: PathBuf::from(&config.resume.state_dir),
            dry_run,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            book_workers: effective_book_workers(&config.processing),
        }
    }

    /// Whether the ledger is read and written this run.
    fn uses_ledger(&self) -> bool {
        self.resume && !self.dry_run
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&BookliftConfig::default(), false)
    }
}

/// Shared stop signal, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
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

/// Progress events sent to the console printer.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    BookStarted {
        book: String,
        file_count: usize,
        resumable: usize,
    },
    /// A file skipped because the ledger already holds it.
    FileResumed {
        book: String,
        original: String,
        /// Files resumed so far in this book.
        resumed: usize,
        /// Files the ledger allows skipping in this book.
        resumable: usize,
    },
    FileStored {
        book: String,
        original: String,
        stored_name: String,
        /// 1-based position of this file in the book.
        position: usize,
        total: usize,
        converted: bool,
        stored_bytes: u64,
        dry_run: bool,
    },
    /// Dry runs only: a file that could not be prepared.
    FileBlocked {
        book: String,
        original: String,
        reason: String,
    },
    IndexUploaded {
        book: String,
        path: String,
        entries: usize,
    },
    /// Every file was resumed and the index content is unchanged.
    IndexUnchanged { book: String, path: String },
    /// Dry runs only: the index that would have been uploaded.
    IndexPrepared {
        book: String,
        path: String,
        entries: usize,
    },
}

/// A file a dry run could not prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedFile {
    pub original: String,
    pub reason: String,
}

/// Outcome of one book.
#[derive(Debug, Clone)]
pub struct BookReport {
    pub slug: String,
    pub manifest: BookManifest,
    /// Asset objects written this run.
    pub uploaded: usize,
    pub resumed: usize,
    pub index_uploaded: bool,
    pub blocked: Vec<BlockedFile>,
}

impl BookReport {
    /// Objects written this run, index included.
    pub fn objects_written(&self) -> usize {
        self.uploaded + usize::from(self.index_uploaded)
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub books: Vec<BookReport>,
}

impl RunReport {
    pub fn objects_written(&self) -> usize {
        self.books.iter().map(BookReport::objects_written).sum()
    }

    /// Blocked files across all books as `(book, file)`.
    pub fn blocked(&self) -> Vec<(&str, &BlockedFile)> {
        self.books
            .iter()
            .flat_map(|b| b.blocked.iter().map(move |f| (b.slug.as_str(), f)))
            .collect()
    }
}

/// Bytes ready for upload plus the metadata the manifest needs.
#[derive(Debug)]
struct PreparedFile {
    bytes: Vec<u8>,
    ext: String,
    mime: &'static str,
    /// Unsanitized name the object is derived from.
    candidate_name: String,
    original_bytes: u64,
    converted: bool,
    dimensions: Option<(u32, u32, String)>,
}

fn emit(events: Option<&Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        // Receiver gone means nobody is printing; keep working.
        tx.send(event).ok();
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read or optimize one file according to the conversion policy.
fn prepare_file(
    backend: &impl ImageBackend,
    path: &Path,
    original: &str,
    settings: &PipelineSettings,
) -> Result<PreparedFile, FileError> {
    let size = std::fs::metadata(path).map(|m| m.len()).ok();
    let ext = extension_of(path);
    let decision = decide(&ext, size, settings.max_upload_bytes, settings.convert_all);

    let ConversionDecision::Convert(reason) = decision else {
        let bytes = std::fs::read(path)?;
        return Ok(PreparedFile {
            original_bytes: bytes.len() as u64,
            mime: mime_for_ext(&ext),
            ext,
            candidate_name: original.to_string(),
            converted: false,
            dimensions: None,
            bytes,
        });
    };

    tracing::debug!(file = original, ?reason, "optimizing");
    match optimize_within_budget(
        backend,
        path,
        &settings.params,
        settings.max_upload_bytes,
        MAX_ATTEMPTS,
    ) {
        BudgetOutcome::Fits {
            image,
            attempts,
            params,
        } => {
            if attempts > 1 {
                tracing::info!(
                    file = original,
                    attempts,
                    max_px = params.max_px,
                    quality = params.quality.value(),
                    "fit under upload ceiling after shrinking"
                );
            }
            let out_ext = image.format.extension();
            let candidate_name = if ext == out_ext {
                original.to_string()
            } else {
                format!("{original}.{out_ext}")
            };
            Ok(PreparedFile {
                original_bytes: size.unwrap_or(0),
                ext: out_ext.to_string(),
                mime: image.format.mime(),
                candidate_name,
                converted: true,
                dimensions: Some((image.width, image.height, image.mode.to_string())),
                bytes: image.bytes,
            })
        }
        BudgetOutcome::Exhausted {
            attempts,
            last_size,
            last_error,
        } => Err(FileError::Blocked(exhausted_reason(
            attempts,
            settings.max_upload_bytes,
            last_size,
            last_error.as_ref(),
        ))),
        BudgetOutcome::Aborted { error, .. } => Err(FileError::Blocked(error.to_string())),
    }
}

fn exhausted_reason(
    attempts: u32,
    max_bytes: u64,
    last_size: Option<u64>,
    last_error: Option<&BackendError>,
) -> String {
    match (last_size, last_error) {
        (Some(size), _) => format!(
            "no output under {max_bytes} bytes after {attempts} attempts (smallest try {size} bytes)"
        ),
        (None, Some(err)) => format!("no valid output after {attempts} attempts: {err}"),
        (None, None) => format!("no valid output after {attempts} attempts"),
    }
}

/// Optimize and upload one book.
pub fn upload_book(
    backend: &impl ImageBackend,
    store: &impl ObjectStore,
    book: &BookSource,
    settings: &PipelineSettings,
    cancel: &CancelFlag,
    events: Option<&Sender<PipelineEvent>>,
) -> Result<BookReport, PipelineError> {
    let slug = book.slug.as_str();
    let layout = BookLayout::new(&settings.prefix, slug);
    let images_prefix = layout.images_prefix();

    let mut ledger = if settings.uses_ledger() {
        ResumeLedger::load(&settings.state_dir, slug)
    } else {
        ResumeLedger::empty(slug)
    };

    let originals: Vec<String> = book.files.iter().map(|p| file_name_of(p)).collect();

    // Names held by resumable entries are taken before any fresh file claims one
    let mut names = NameRegistry::new(settings.max_name_len);
    let mut resumable = 0;
    for original in &originals {
        if let Some(entry) = ledger.resumable(original, &images_prefix) {
            names.reserve(&entry.stored_name);
            resumable += 1;
        }
    }

    let total = book.files.len();
    emit(
        events,
        PipelineEvent::BookStarted {
            book: slug.to_string(),
            file_count: total,
            resumable,
        },
    );

    let mut manifest = BookManifest::new(
        slug,
        settings.params.max_px,
        settings.params.quality.value(),
        settings.params.alpha,
    );
    let mut uploaded = 0;
    let mut resumed = 0;
    let mut blocked = Vec::new();

    for (i, (path, original)) in book.files.iter().zip(&originals).enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if let Some(entry) = ledger.resumable(original, &images_prefix) {
            resumed += 1;
            tracing::debug!(book = slug, file = %original, "already uploaded, skipping");
            manifest.push(entry.clone());
            emit(
                events,
                PipelineEvent::FileResumed {
                    book: slug.to_string(),
                    original: original.clone(),
                    resumed,
                    resumable,
                },
            );
            continue;
        }

        let file_error = |source: FileError| PipelineError::File {
            book: slug.to_string(),
            original: original.clone(),
            source,
        };

        let prepared = match prepare_file(backend, path, original, settings) {
            Ok(p) => p,
            Err(err) if settings.dry_run => {
                emit(
                    events,
                    PipelineEvent::FileBlocked {
                        book: slug.to_string(),
                        original: original.clone(),
                        reason: err.to_string(),
                    },
                );
                blocked.push(BlockedFile {
                    original: original.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(file_error(err)),
        };

        let stored_name = names.claim(&sanitize_storage_name(
            &prepared.candidate_name,
            settings.max_name_len,
        ));
        let storage_path = layout.asset_path(&stored_name);
        let (width, height, mode) = match prepared.dimensions {
            Some((w, h, m)) => (Some(w), Some(h), Some(m)),
            None => (None, None, None),
        };
        let entry = ManifestEntry {
            original_name: original.clone(),
            stored_name: stored_name.clone(),
            storage_path: storage_path.clone(),
            original_bytes: prepared.original_bytes,
            stored_bytes: prepared.bytes.len() as u64,
            stored_ext: prepared.ext,
            stored_mime: prepared.mime.to_string(),
            stored_sha256: sha256_hex(&prepared.bytes),
            width,
            height,
            mode,
        };

        if !settings.dry_run {
            with_retries(&settings.retry, &storage_path, || {
                store.put_object(
                    &storage_path,
                    &entry.stored_mime,
                    &prepared.bytes,
                    settings.upsert,
                )
            })
            .map_err(|e| file_error(FileError::Transport(e)))?;
            uploaded += 1;
        }

        if settings.uses_ledger() {
            ledger.record(entry.clone());
            ledger
                .save(&settings.state_dir)
                .map_err(|source| PipelineError::Ledger {
                    book: slug.to_string(),
                    source,
                })?;
        }

        let stored_bytes = entry.stored_bytes;
        manifest.push(entry);
        emit(
            events,
            PipelineEvent::FileStored {
                book: slug.to_string(),
                original: original.clone(),
                stored_name,
                position: i + 1,
                total,
                converted: prepared.converted,
                stored_bytes,
                dry_run: settings.dry_run,
            },
        );
    }

    let index_path = layout.index_path();
    let entries = manifest.entries.len();
    let digest = manifest.content_digest()?;
    let index_uploaded = if settings.dry_run {
        emit(
            events,
            PipelineEvent::IndexPrepared {
                book: slug.to_string(),
                path: index_path,
                entries,
            },
        );
        false
    } else if resumed == total && ledger.index_sha256.as_deref() == Some(digest.as_str()) {
        tracing::debug!(book = slug, "index unchanged, skipping upload");
        emit(
            events,
            PipelineEvent::IndexUnchanged {
                book: slug.to_string(),
                path: index_path,
            },
        );
        false
    } else {
        let body = manifest.to_json_bytes()?;
        with_retries(&settings.retry, &index_path, || {
            store.put_object(&index_path, INDEX_CONTENT_TYPE, &body, true)
        })
        .map_err(|source| PipelineError::Index {
            book: slug.to_string(),
            source,
        })?;
        if settings.uses_ledger() {
            ledger.set_index_digest(digest);
            ledger
                .save(&settings.state_dir)
                .map_err(|source| PipelineError::Ledger {
                    book: slug.to_string(),
                    source,
                })?;
        }
        emit(
            events,
            PipelineEvent::IndexUploaded {
                book: slug.to_string(),
                path: index_path,
                entries,
            },
        );
        true
    };

    Ok(BookReport {
        slug: slug.to_string(),
        manifest,
        uploaded,
        resumed,
        index_uploaded,
        blocked,
    })
}

/// Upload every book, in parallel when `settings.book_workers > 1`.
///
/// Stops at the first failing book. In parallel mode the other workers see
/// the raised [`CancelFlag`] and stop at their next file; the first real
/// error is returned rather than the resulting cancellations.
pub fn upload_books(
    backend: &impl ImageBackend,
    store: &impl ObjectStore,
    books: &[BookSource],
    settings: &PipelineSettings,
    cancel: &CancelFlag,
    events: Option<Sender<PipelineEvent>>,
) -> Result<RunReport, PipelineError> {
    let events = events.as_ref();

    if settings.book_workers <= 1 || books.len() <= 1 {
        let mut reports = Vec::with_capacity(books.len());
        for book in books {
            reports.push(upload_book(backend, store, book, settings, cancel, events)?);
        }
        return Ok(RunReport { books: reports });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.book_workers)
        .build()?;
    let results: Vec<Result<BookReport, PipelineError>> = pool.install(|| {
        books
            .par_iter()
            .map(|book| {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let result = upload_book(backend, store, book, settings, cancel, events);
                if result.is_err() {
                    cancel.cancel();
                }
                result
            })
            .collect()
    });

    let mut reports = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(PipelineError::Cancelled) => {
                first_error.get_or_insert(PipelineError::Cancelled);
            }
            Err(err) => {
                if matches!(first_error, None | Some(PipelineError::Cancelled)) {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(RunReport { books: reports }),
    }
}
