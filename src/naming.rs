//! Storage-safe object names.
//!
//! Object stores validate keys, and book exports are full of names like
//! `Figure 3.2 (Final) – CMYK.TIF`. Every stored object name goes through
//! [`sanitize_storage_name`], which maps an arbitrary filename onto
//! `[A-Za-z0-9._-]` while staying deterministic, so re-running a book always
//! produces the same keys.
//!
//! ## Rules
//!
//! - The extension (text after the last dot, ignoring leading dots) is
//!   lower-cased and restricted to ASCII alphanumerics.
//! - In the base, every run of disallowed characters becomes a single `_`,
//!   consecutive underscores collapse, and leading/trailing `.`, `_`, `-` are
//!   trimmed. When there is no usable extension, dots in the base become `_`
//!   too, so the result never grows a new "extension" on a second pass.
//! - An empty base becomes `file`.
//! - A base longer than its budget is truncated and suffixed with `_` plus
//!   10 hex chars of the SHA-256 of the full original name, which keeps
//!   distinct long names distinct.
//!
//! The function is idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
//!
//! ## Collisions
//!
//! Two different originals can sanitize to the same name (`a b.png` and
//! `a_b.png`). [`NameRegistry`] is the per-book record of claimed names; a
//! second claim of the same candidate gets a `_dupN` suffix.

use crate::hashing::short_digest;
use std::collections::HashMap;

/// Default overall name budget, extension included.
pub const DEFAULT_MAX_NAME_LEN: usize = 180;

const FALLBACK_BASE: &str = "file";
const HASH_FRAGMENT_LEN: usize = 10;
const MIN_BASE_LEN: usize = 24;
const MAX_EXT_LEN: usize = 16;
const SEPARATORS: &[char] = &['.', '_', '-'];

/// Map an arbitrary filename to a storage-safe, length-bounded name.
///
/// ```text
/// "Figure 3.2 (Final).TIF"  → "Figure_3.2_Final.tif"
/// "???.jpg"                 → "file.jpg"
/// ""                        → "file"
/// ```
pub fn sanitize_storage_name(name: &str, max_len: usize) -> String {
    let raw = name.trim();
    let (base, ext) = split_extension(raw);

    let ext: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_EXT_LEN)
        .collect();

    let mut safe_base = clean_base(base, !ext.is_empty());
    if safe_base.is_empty() {
        safe_base = FALLBACK_BASE.to_string();
    }

    let ext_len = if ext.is_empty() { 0 } else { ext.len() + 1 };
    let max_base = max_len.saturating_sub(ext_len).max(MIN_BASE_LEN);
    if safe_base.len() > max_base {
        let keep = max_base - (HASH_FRAGMENT_LEN + 1);
        // safe_base is pure ASCII here, so byte slicing is on a char boundary
        let head = safe_base[..keep].trim_end_matches(SEPARATORS);
        safe_base = format!("{head}_{}", short_digest(raw, HASH_FRAGMENT_LEN));
    }

    if ext.is_empty() {
        safe_base
    } else {
        format!("{safe_base}.{ext}")
    }
}

/// Split `name` into `(base, extension)` without the dot.
///
/// Leading dots belong to the base (`.hidden` has no extension).
fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(i) => {
            let dot = leading + i;
            (&name[..dot], &name[dot + 1..])
        }
        None => (name, ""),
    }
}

fn clean_base(base: &str, keep_dots: bool) -> String {
    let mut out = String::with_capacity(base.len());
    let mut prev_underscore = false;
    for c in base.chars() {
        let allowed = c.is_ascii_alphanumeric() || c == '-' || (keep_dots && c == '.');
        if allowed {
            out.push(c);
            prev_underscore = false;
        } else {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        }
    }
    out.trim_matches(SEPARATORS).to_string()
}

/// Per-book record of claimed object names.
///
/// Created fresh for each book run and threaded through the pipeline, so
/// collision numbering never leaks between books.
#[derive(Debug)]
pub struct NameRegistry {
    max_len: usize,
    /// Candidate name → number of collisions seen so far.
    used: HashMap<String, u32>,
}

impl NameRegistry {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            used: HashMap::new(),
        }
    }

    /// Mark a name as taken without going through collision handling.
    ///
    /// Used for entries restored from the resume ledger.
    pub fn reserve(&mut self, name: &str) {
        self.used.entry(name.to_string()).or_insert(0);
    }

    /// Claim `candidate`, returning it or a `_dupN` variant if already taken.
    pub fn claim(&mut self, candidate: &str) -> String {
        if !self.used.contains_key(candidate) {
            self.used.insert(candidate.to_string(), 0);
            return candidate.to_string();
        }

        let (base, ext) = split_extension(candidate);
        loop {
            let count = self.used.entry(candidate.to_string()).or_insert(0);
            *count += 1;
            let attempt = if ext.is_empty() {
                format!("{base}__dup{count}")
            } else {
                format!("{base}__dup{count}.{ext}")
            };
            let name = sanitize_storage_name(&attempt, self.max_len);
            if !self.used.contains_key(&name) {
                self.used.insert(name.clone(), 0);
                return name;
            }
        }
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NAME_LEN)
    }
}
