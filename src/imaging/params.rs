//! Parameter types for image optimization.
//!
//! These structs describe *what* to produce, not *how*. They are the interface
//! between the budget loop in [`operations`](super::operations) (which decides
//! the pixel/quality targets for each attempt) and the
//! [`backend`](super::backend) (which does the pixel work).
//!
//! ## Types
//!
//! - [`Quality`] — Lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`AlphaPolicy`] — What to do with transparency: keep it (PNG) or flatten onto white (JPEG).
//! - [`OptimizeParams`] — One attempt: max pixel dimension, quality, alpha policy.
//! - [`OutputFormat`] / [`ColorMode`] — Closed sets describing what was produced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// The quality as the `u8` the JPEG encoder expects.
    pub fn as_u8(self) -> u8 {
        self.0.clamp(1, 100) as u8
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// How images carrying an alpha channel are encoded.
///
/// Serialized names match the values recorded in published manifests
/// (`alphaMode`), so they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlphaPolicy {
    /// Keep transparency, encode lossless PNG.
    #[default]
    #[serde(rename = "png")]
    Preserve,
    /// Composite onto opaque white and encode JPEG. Textbook figures are
    /// printed on white pages, so this is visually lossless there and much
    /// smaller than full-resolution PNG.
    #[serde(rename = "flatten-white-jpeg")]
    FlattenWhite,
}

impl AlphaPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AlphaPolicy::Preserve => "png",
            AlphaPolicy::FlattenWhite => "flatten-white-jpeg",
        }
    }
}

impl fmt::Display for AlphaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a single optimization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeParams {
    /// Upper bound for the longer output edge. Images are never upscaled.
    pub max_px: u32,
    pub quality: Quality,
    pub alpha: AlphaPolicy,
}

/// Encoded output format. Closed set: everything the optimizer writes is
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// File extension used for stored objects.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Channel layout of the encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Rgb,
    Rgba,
}

impl ColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
