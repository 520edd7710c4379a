//! Upload configuration module.
//!
//! Handles loading, validating, and merging `booklift.toml`. Stock defaults
//! are serialized to a TOML value, the user file is merged on top, and the
//! result is deserialized and validated. Command-line flags override the
//! merged values afterwards (see `main.rs`).
//!
//! ## Config File Location
//!
//! `booklift.toml` in the working directory is picked up automatically when
//! present. `--config <path>` points at any other file (which must exist).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! root = "books"                 # One directory per book, each with images/
//!
//! [images]
//! max_px = 3000                  # Longer-edge bound for optimized images
//! quality = 85                   # JPEG quality (1-100)
//! max_upload_mb = 40             # Upload ceiling; larger sources are optimized
//! convert_all = false            # Optimize every raster file, even small ones
//! alpha_mode = "png"             # "png" or "flatten-white-jpeg"
//!
//! [storage]
//! bucket = "books"
//! prefix = "library"
//! upsert = false                 # Overwrite existing objects
//! timeout_secs = 600             # Per-request timeout
//! retries = 5                    # Retries after the first failed attempt
//!
//! [resume]
//! enabled = true
//! state_dir = "tmp/book-images-upload-state"
//!
//! [processing]
//! max_parallel_books = 1         # Books uploaded concurrently (clamped to cores)
//!
//! [credentials]
//! env_files = ["supabase/.deploy.env", ".env", ".env.local", ".env.development", ".env.production"]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::credentials::DEFAULT_ENV_FILES;
use crate::imaging::AlphaPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "booklift.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Upload configuration loaded from `booklift.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BookliftConfig {
    /// Local root containing one directory per book.
    pub root: String,
    pub images: ImagesConfig,
    pub storage: StorageConfig,
    pub resume: ResumeConfig,
    pub processing: ProcessingConfig,
    pub credentials: CredentialsConfig,
}

impl Default for BookliftConfig {
    fn default() -> Self {
        Self {
            root: "books".to_string(),
            images: ImagesConfig::default(),
            storage: StorageConfig::default(),
            resume: ResumeConfig::default(),
            processing: ProcessingConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

impl BookliftConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.images.max_px == 0 {
            return Err(ConfigError::Validation(
                "images.max_px must be non-zero".into(),
            ));
        }
        if self.images.max_upload_mb == 0 {
            return Err(ConfigError::Validation(
                "images.max_upload_mb must be non-zero".into(),
            ));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.bucket must not be empty".into(),
            ));
        }
        if self.storage.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "storage.timeout_secs must be non-zero".into(),
            ));
        }
        if self.processing.max_parallel_books == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_parallel_books must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Image optimization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Longer-edge pixel bound for optimized output.
    pub max_px: u32,
    /// JPEG quality (1 = worst, 100 = best).
    pub quality: u32,
    /// Upload ceiling in MiB. Drives both the conversion policy and the
    /// adaptive shrink loop.
    pub max_upload_mb: u64,
    /// Optimize every raster file regardless of size or format.
    pub convert_all: bool,
    pub alpha_mode: AlphaPolicy,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_px: 3000,
            quality: 85,
            max_upload_mb: 40,
            convert_all: false,
            alpha_mode: AlphaPolicy::Preserve,
        }
    }
}

impl ImagesConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Remote object store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub bucket: String,
    /// Path prefix under the bucket; objects land at `{prefix}/{book}/images/`.
    pub prefix: String,
    /// Overwrite objects that already exist.
    pub upsert: bool,
    pub timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "books".to_string(),
            prefix: "library".to_string(),
            upsert: false,
            timeout_secs: 600,
            retries: 5,
        }
    }
}

/// Resume ledger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResumeConfig {
    pub enabled: bool,
    pub state_dir: String,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_dir: "tmp/book-images-upload-state".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of books uploaded concurrently.
    /// When absent, books run one at a time.
    /// Values larger than the core count are clamped down.
    pub max_parallel_books: Option<usize>,
}

/// Resolve the effective number of concurrent book workers.
///
/// - `None` → 1
/// - `Some(n)` → `min(n, cores)`, at least 1
pub fn effective_book_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_parallel_books
        .map(|n| n.min(cores))
        .unwrap_or(1)
        .max(1)
}

/// Where to look for storage credentials after the process environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    pub env_files: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_files: DEFAULT_ENV_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CredentialsConfig {
    pub fn env_file_paths(&self) -> Vec<PathBuf> {
        self.env_files.iter().map(PathBuf::from).collect()
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Serialize stock defaults to a TOML value tree.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(BookliftConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BookliftConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BookliftConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// With `explicit`, that file must exist. Without it, `booklift.toml` in
/// `working_dir` is used when present, stock defaults otherwise.
pub fn load_config(
    explicit: Option<&Path>,
    working_dir: &Path,
) -> Result<BookliftConfig, ConfigError> {
    let overlay = match explicit {
        Some(path) => Some(load_raw_config(path)?),
        None => {
            let default_path = working_dir.join(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                Some(load_raw_config(&default_path)?)
            } else {
                None
            }
        }
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// Returns a fully-commented stock `booklift.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# booklift configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Command-line flags override them.
# Unknown keys will cause an error.

# Local root containing one directory per book. Each book directory holds an
# images/ directory whose files are uploaded.
root = "books"

# ---------------------------------------------------------------------------
# Image optimization
# ---------------------------------------------------------------------------
[images]
# Longer-edge pixel bound for optimized images. Never upscales.
max_px = 3000

# JPEG quality (1-100).
quality = 85

# Upload ceiling in MiB. Sources above it are optimized, and optimized output
# is shrunk until it fits. Files that cannot fit block the run.
max_upload_mb = 40

# Optimize every raster file, even small JPEG/PNG/WebP/GIF. SVG is never
# rasterized.
convert_all = false

# Images with transparency:
#   "png"                keep alpha, encode lossless PNG
#   "flatten-white-jpeg" composite onto white, encode JPEG
alpha_mode = "png"

# ---------------------------------------------------------------------------
# Remote storage
# ---------------------------------------------------------------------------
[storage]
bucket = "books"

# Objects land at {prefix}/{book}/images/{name}; the per-book index at
# {prefix}/{book}/images-index.json.
prefix = "library"

# Overwrite objects that already exist. The index is always overwritten.
upsert = false

# Per-request timeout in seconds.
timeout_secs = 600

# Retries after a failed upload attempt (exponential backoff, 60s cap).
retries = 5

# ---------------------------------------------------------------------------
# Resume
# ---------------------------------------------------------------------------
[resume]
# Skip files recorded as uploaded by a previous run.
enabled = true

# One ledger file per book is kept here.
state_dir = "tmp/book-images-upload-state"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Books uploaded concurrently. Files within a book are always sequential.
# Values above the CPU core count are clamped down.
# max_parallel_books = 1

# ---------------------------------------------------------------------------
# Credentials
# ---------------------------------------------------------------------------
[credentials]
# SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY are read from the environment
# first, then from these files in order.
env_files = [
    "supabase/.deploy.env",
    ".env",
    ".env.local",
    ".env.development",
    ".env.production",
]
"##
}
