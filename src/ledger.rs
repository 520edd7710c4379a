//! Per-book resume ledger.
//!
//! Uploading a large book takes a long time and networks fail. The ledger
//! records every original file whose upload fully succeeded, so a rerun skips
//! straight past completed work.
//!
//! # Design
//!
//! One JSON file per book at `{state_dir}/{slug}.json`:
//!
//! ```json
//! {
//!   "bookSlug": "biology-101",
//!   "updatedAt": "2026-03-01T12:00:00Z",
//!   "uploadedByOriginal": { "fig-1.tif": { "originalName": "fig-1.tif", ... } },
//!   "indexSha256": "…"
//! }
//! ```
//!
//! A file moves from *absent* to *completed* only after its upload
//! succeeded; there is no in-progress state. A crash between upload and save
//! leaves the file absent, so the next run re-uploads identical bytes to the
//! same deterministic path.
//!
//! Every save writes `{slug}.json.tmp` and renames it over the final path,
//! so a crash never leaves a half-written ledger. An unreadable, unparsable,
//! or foreign ledger is treated as empty with a warning: corruption disables
//! resume for that run, it never fails it.
//!
//! The ledger is trusted as-is. The remote store is never queried to confirm
//! that recorded objects still exist.
//!
//! `indexSha256` holds [`BookManifest::content_digest`] of the last uploaded
//! index, letting a fully resumed run skip re-uploading an unchanged index.
//!
//! [`BookManifest::content_digest`]: crate::types::BookManifest::content_digest

use crate::types::{ManifestEntry, utc_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeLedger {
    pub book_slug: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub uploaded_by_original: BTreeMap<String, ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_sha256: Option<String>,
}

/// Ledger file path for a book.
pub fn ledger_path(state_dir: &Path, book_slug: &str) -> PathBuf {
    state_dir.join(format!("{book_slug}.json"))
}

impl ResumeLedger {
    /// Create an empty ledger (used for `--no-resume`, dry runs, or first upload).
    pub fn empty(book_slug: &str) -> Self {
        Self {
            book_slug: book_slug.to_string(),
            updated_at: String::new(),
            uploaded_by_original: BTreeMap::new(),
            index_sha256: None,
        }
    }

    /// Load a book's ledger. Returns an empty ledger if the file doesn't
    /// exist, can't be read or parsed, or belongs to another book.
    pub fn load(state_dir: &Path, book_slug: &str) -> Self {
        let path = ledger_path(state_dir, book_slug);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::empty(book_slug),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "resume ledger unreadable, starting fresh");
                return Self::empty(book_slug);
            }
        };
        let ledger: Self = match serde_json::from_str(&content) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "resume ledger corrupt, starting fresh");
                return Self::empty(book_slug);
            }
        };
        if ledger.book_slug != book_slug {
            tracing::warn!(
                path = %path.display(),
                found = %ledger.book_slug,
                "resume ledger belongs to another book, starting fresh"
            );
            return Self::empty(book_slug);
        }
        ledger
    }

    /// Completed entry for `original_name`, if it can be resumed under the
    /// current storage layout (`images_prefix` is `{prefix}/{slug}/images/`).
    pub fn resumable(&self, original_name: &str, images_prefix: &str) -> Option<&ManifestEntry> {
        let entry = self.uploaded_by_original.get(original_name)?;
        if entry.storage_path.starts_with(images_prefix)
            && entry.storage_path.len() > images_prefix.len()
        {
            Some(entry)
        } else {
            tracing::debug!(
                original = original_name,
                path = %entry.storage_path,
                "ledger entry outside current prefix, re-uploading"
            );
            None
        }
    }

    /// Record a completed upload.
    pub fn record(&mut self, entry: ManifestEntry) {
        self.updated_at = utc_timestamp();
        self.uploaded_by_original
            .insert(entry.original_name.clone(), entry);
    }

    pub fn set_index_digest(&mut self, digest: String) {
        self.updated_at = utc_timestamp();
        self.index_sha256 = Some(digest);
    }

    pub fn len(&self) -> usize {
        self.uploaded_by_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded_by_original.is_empty()
    }

    /// Atomically persist to `{state_dir}/{slug}.json`.
    pub fn save(&self, state_dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(state_dir)?;
        let path = ledger_path(state_dir, &self.book_slug);
        let tmp = state_dir.join(format!("{}.json.tmp", self.book_slug));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
    }
}
