//! # booklift
//!
//! Batch image ingestion for per-book asset libraries. Walks a local tree of
//! book directories, optimizes each image to a web- and print-safe format
//! under a byte ceiling, uploads it to an object store under a deterministic
//! name, and publishes a per-book index mapping original filenames to stored
//! object paths.
//!
//! # Architecture
//!
//! ```text
//! scan        books/{slug}/images/*   →  BookSource list
//! pipeline    per file: ledger → policy → imaging → hashing + naming
//!             → transport (+ retry) → ledger save → manifest
//!             per book: images-index.json
//! ```
//!
//! Every run can be interrupted. The resume ledger records each file only
//! after its upload succeeded, so a rerun re-processes at most the file that
//! was in flight and converges to the same index.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Book discovery under the upload root |
//! | [`pipeline`] | Per-book driver: resume, convert, upload, index |
//! | [`imaging`] | Decode, orient, resize and encode; streaming TIFF fallback; size-budget loop |
//! | [`policy`] | Preserve-or-convert decision and MIME mapping |
//! | [`naming`] | Storage-safe object names and per-book collision handling |
//! | [`hashing`] | SHA-256 content digests |
//! | [`transport`] | Object store uploads over HTTP |
//! | [`retry`] | Bounded exponential backoff |
//! | [`ledger`] | Per-book resume state with atomic saves |
//! | [`credentials`] | Endpoint and service key resolution from env and env files |
//! | [`config`] | `booklift.toml` loading, merging and validation |
//! | [`types`] | Manifest entries, book index and remote layout |
//! | [`output`] | CLI progress and summary formatting |
//!
//! # Design Decisions
//!
//! ## Fail Fast on Real Runs
//!
//! Downstream rendering needs every asset of a book. A file that cannot be
//! optimized under the ceiling, or that still fails after retries, stops the
//! whole run with a non-zero exit instead of publishing a partial book. Dry
//! runs collect such files and keep going so a single pass lists them all.
//!
//! ## Trust the Local Ledger
//!
//! Resume decisions come from the local ledger alone; the remote store is
//! never listed or queried. Uploads are idempotent by path and content, so
//! redoing a file whose ledger write was lost is harmless.

pub mod config;
pub mod credentials;
pub mod hashing;
pub mod imaging;
pub mod ledger;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod scan;
pub mod transport;
pub mod types;
