//! Shared types written to the remote store and the resume ledger.
//!
//! Field names are camelCase on the wire: downstream renderers read the
//! published `images-index.json`, and resume ledgers written by earlier runs
//! must keep parsing.

use crate::hashing::sha256_hex;
use crate::imaging::AlphaPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp format used for `generatedAt` and `updatedAt` (UTC, seconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC time formatted with [`TIMESTAMP_FORMAT`].
pub fn utc_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One delivered asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Source filename inside the book's `images/` directory. Unique per book.
    pub original_name: String,
    pub stored_name: String,
    /// `{prefix}/{slug}/images/{storedName}`
    pub storage_path: String,
    pub original_bytes: u64,
    pub stored_bytes: u64,
    pub stored_ext: String,
    pub stored_mime: String,
    /// SHA-256 of exactly the uploaded bytes.
    pub stored_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// The per-book index uploaded after all assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookManifest {
    pub book_slug: String,
    pub generated_at: String,
    pub max_px: u32,
    pub jpeg_quality: u32,
    pub alpha_mode: AlphaPolicy,
    pub entries: Vec<ManifestEntry>,
    /// originalName → storagePath, redundant with `entries` for fast lookup.
    pub src_map: BTreeMap<String, String>,
}

impl BookManifest {
    pub fn new(book_slug: &str, max_px: u32, jpeg_quality: u32, alpha_mode: AlphaPolicy) -> Self {
        Self {
            book_slug: book_slug.to_string(),
            generated_at: utc_timestamp(),
            max_px,
            jpeg_quality,
            alpha_mode,
            entries: Vec::new(),
            src_map: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        self.src_map
            .insert(entry.original_name.clone(), entry.storage_path.clone());
        self.entries.push(entry);
    }

    /// Pretty JSON as uploaded to the store.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Digest of the manifest content with the generation timestamp blanked.
    ///
    /// Two runs that deliver the same assets with the same parameters produce
    /// the same digest.
    pub fn content_digest(&self) -> serde_json::Result<String> {
        let mut stable = self.clone();
        stable.generated_at.clear();
        Ok(sha256_hex(&serde_json::to_vec(&stable)?))
    }
}

/// Remote object paths for one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookLayout {
    prefix: String,
    slug: String,
}

impl BookLayout {
    pub fn new(prefix: &str, slug: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            slug: slug.to_string(),
        }
    }

    fn root(&self) -> String {
        if self.prefix.is_empty() {
            self.slug.clone()
        } else {
            format!("{}/{}", self.prefix, self.slug)
        }
    }

    /// Directory prefix every asset path of this book starts with.
    pub fn images_prefix(&self) -> String {
        format!("{}/images/", self.root())
    }

    pub fn asset_path(&self, stored_name: &str) -> String {
        format!("{}{}", self.images_prefix(), stored_name)
    }

    pub fn index_path(&self) -> String {
        format!("{}/images-index.json", self.root())
    }
}
