//! Preserve-or-convert decision for each source file.
//!
//! Files that are already web-friendly and under the upload ceiling are
//! uploaded byte-for-byte. Everything else goes through the optimizer.
//! Vector files are never rasterized.

use std::path::Path;

/// Formats that may be uploaded unmodified.
pub const PRESERVE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "svg"];
/// Print/large-format sources that are always optimized.
pub const MUST_CONVERT_EXTENSIONS: &[&str] = &["tif", "tiff", "psd"];
/// Vector formats, preserved verbatim regardless of size or overrides.
pub const VECTOR_EXTENSIONS: &[&str] = &["svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertReason {
    /// `convert_all` override.
    Forced,
    MustConvertFormat,
    OverSizeCeiling,
    /// The source size could not be read.
    SizeUnknown,
    NotPreservable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionDecision {
    PreserveVector,
    Preserve,
    Convert(ConvertReason),
}

impl ConversionDecision {
    pub fn converts(self) -> bool {
        matches!(self, ConversionDecision::Convert(_))
    }
}

/// Lower-cased extension without the dot (empty when there is none).
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Decide what to do with a file of extension `ext` and `size` bytes.
pub fn decide(
    ext: &str,
    size: Option<u64>,
    max_bytes: u64,
    convert_all: bool,
) -> ConversionDecision {
    if VECTOR_EXTENSIONS.contains(&ext) {
        return ConversionDecision::PreserveVector;
    }
    let reason = if convert_all {
        Some(ConvertReason::Forced)
    } else if MUST_CONVERT_EXTENSIONS.contains(&ext) {
        Some(ConvertReason::MustConvertFormat)
    } else {
        match size {
            None => Some(ConvertReason::SizeUnknown),
            Some(n) if n > max_bytes => Some(ConvertReason::OverSizeCeiling),
            Some(_) if !PRESERVE_EXTENSIONS.contains(&ext) => Some(ConvertReason::NotPreservable),
            Some(_) => None,
        }
    };
    match reason {
        Some(r) => ConversionDecision::Convert(r),
        None => ConversionDecision::Preserve,
    }
}

/// Content type for an extension (with or without a leading dot).
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "psd" => "image/vnd.adobe.photoshop",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;
    const CEILING: u64 = 40 * MB;

    #[test]
    fn must_convert_formats_always_convert_even_when_small() {
        for ext in ["tif", "tiff", "psd"] {
            assert_eq!(
                decide(ext, Some(10), CEILING, false),
                ConversionDecision::Convert(ConvertReason::MustConvertFormat),
                "{ext}"
            );
        }
    }

    #[test]
    fn vector_never_converts() {
        for convert_all in [false, true] {
            for size in [None, Some(1), Some(500 * MB)] {
                assert_eq!(
                    decide("svg", size, CEILING, convert_all),
                    ConversionDecision::PreserveVector
                );
            }
        }
    }

    #[test]
    fn small_web_formats_preserved() {
        for ext in ["jpg", "jpeg", "png", "webp", "gif"] {
            assert_eq!(
                decide(ext, Some(2 * MB), CEILING, false),
                ConversionDecision::Preserve
            );
        }
    }

    #[test]
    fn at_ceiling_is_preserved_above_converts() {
        assert_eq!(decide("png", Some(CEILING), CEILING, false), ConversionDecision::Preserve);
        assert_eq!(
            decide("png", Some(CEILING + 1), CEILING, false),
            ConversionDecision::Convert(ConvertReason::OverSizeCeiling)
        );
    }

    #[test]
    fn convert_all_forces_raster_formats() {
        assert_eq!(
            decide("png", Some(10), CEILING, true),
            ConversionDecision::Convert(ConvertReason::Forced)
        );
    }

    #[test]
    fn unknown_extension_or_size_converts() {
        assert_eq!(
            decide("bmp", Some(10), CEILING, false),
            ConversionDecision::Convert(ConvertReason::NotPreservable)
        );
        assert_eq!(
            decide("", Some(10), CEILING, false),
            ConversionDecision::Convert(ConvertReason::NotPreservable)
        );
        assert_eq!(
            decide("jpg", None, CEILING, false),
            ConversionDecision::Convert(ConvertReason::SizeUnknown)
        );
        assert!(decide("jpg", None, CEILING, false).converts());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of(Path::new("a/Fig.TIF")), "tif");
        assert_eq!(extension_of(Path::new("a/README")), "");
    }

    #[test]
    fn mime_table() {
        assert_eq!(mime_for_ext("jpg"), "image/jpeg");
        assert_eq!(mime_for_ext(".JPEG"), "image/jpeg");
        assert_eq!(mime_for_ext("png"), "image/png");
        assert_eq!(mime_for_ext("webp"), "image/webp");
        assert_eq!(mime_for_ext("gif"), "image/gif");
        assert_eq!(mime_for_ext("svg"), "image/svg+xml");
        assert_eq!(mime_for_ext("tiff"), "image/tiff");
        assert_eq!(mime_for_ext("psd"), "image/vnd.adobe.photoshop");
        assert_eq!(mime_for_ext("xyz"), "application/octet-stream");
    }
}
