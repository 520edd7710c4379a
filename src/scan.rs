//! Book discovery.
//!
//! The upload root holds one directory per book. Each book keeps its source
//! images directly inside an `images/` subdirectory:
//!
//! ```text
//! books/                           # Upload root
//! ├── biology-101/                 # Book slug = directory name
//! │   └── images/
//! │       ├── cover.png
//! │       ├── fig-1.tif
//! │       └── fig-2.jpg
//! ├── chemistry/
//! │   └── images/
//! │       └── plate.psd
//! └── drafts/                      # No images/ directory: skipped
//! ```
//!
//! Only direct files of `images/` are candidates (no recursion). Hidden
//! entries are skipped everywhere. Books and files are sorted by name so
//! every run visits them in the same order.

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Name of the per-book directory holding source images.
pub const IMAGES_DIR: &str = "images";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("Book '{book}' not found under {root}")]
    BookNotFound { book: String, root: PathBuf },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// One book ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSource {
    pub slug: String,
    pub images_dir: PathBuf,
    /// Candidate files, sorted by file name.
    pub files: Vec<PathBuf>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Discover books under `root`.
///
/// `only_book` restricts discovery to one book directory (an error if it is
/// missing). `limit` caps the number of files taken from each book.
pub fn discover_books(
    root: &Path,
    only_book: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<BookSource>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }

    let book_dirs = match only_book {
        Some(book) => {
            let dir = root.join(book);
            if !dir.is_dir() {
                return Err(ScanError::BookNotFound {
                    book: book.to_string(),
                    root: root.to_path_buf(),
                });
            }
            vec![dir]
        }
        None => list_book_dirs(root)?,
    };

    let mut books = Vec::new();
    for dir in book_dirs {
        let slug = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let images_dir = dir.join(IMAGES_DIR);
        if !images_dir.is_dir() {
            tracing::debug!(book = %slug, "no images/ directory, skipping");
            continue;
        }
        let mut files = collect_files(&images_dir)?;
        if let Some(n) = limit {
            files.truncate(n);
        }
        books.push(BookSource {
            slug,
            images_dir,
            files,
        });
    }
    Ok(books)
}

fn list_book_dirs(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if is_hidden(&name) || !entry.path().is_dir() {
            continue;
        }
        dirs.push(entry.into_path());
    }
    Ok(dirs)
}

/// Direct, non-hidden files of `dir`, sorted by name.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        // is_file() on the path follows symlinks
        if is_hidden(&name) || !entry.path().is_file() {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}
