//! Pure Rust image optimizer built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image::ImageReader` with content sniffing |
//! | Orientation | `ImageDecoder::orientation` + `DynamicImage::apply_orientation` |
//! | Resize | `image::imageops::resize` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (best compression, adaptive filter) |
//! | Streaming TIFF | [`super::streaming`] |

use super::backend::{BackendError, ImageBackend, OptimizedImage};
use super::calculations::fit_within;
use super::params::{AlphaPolicy, ColorMode, OptimizeParams, OutputFormat, Quality};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{
    DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageError, ImageReader,
    RgbImage, RgbaImage,
};
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-step mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a decoder error onto the backend taxonomy.
///
/// `Unsupported` and `Limits` mean the regular decoder cannot handle this
/// file at all; the caller may route chunked formats to the streaming path.
fn classify_decode_error(path: &Path, err: ImageError) -> BackendError {
    match err {
        ImageError::IoError(e) => BackendError::Io(e),
        ImageError::Unsupported(_) | ImageError::Limits(_) => BackendError::Undecodable {
            path: path.to_path_buf(),
            message: err.to_string(),
        },
        other => BackendError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

/// Load, decode and orient an image from disk.
fn load_oriented(path: &Path) -> Result<DynamicImage, BackendError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| classify_decode_error(path, e))?;
    // A broken orientation tag is not worth failing the file over
    let orientation = decoder.orientation().ok();
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| classify_decode_error(path, e))?;
    if let Some(orientation) = orientation {
        img.apply_orientation(orientation);
    }
    Ok(img)
}

/// Composite an RGBA buffer onto opaque white, using alpha as the blend mask.
pub(crate) fn flatten_onto_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

pub(crate) fn encode_jpeg(
    rgb: &RgbImage,
    quality: Quality,
) -> Result<OptimizedImage, BackendError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.as_u8())
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| BackendError::Encode(format!("JPEG encode failed: {e}")))?;
    Ok(OptimizedImage {
        bytes,
        format: OutputFormat::Jpeg,
        width: rgb.width(),
        height: rgb.height(),
        mode: ColorMode::Rgb,
    })
}

fn encode_png(rgba: &RgbaImage) -> Result<OptimizedImage, BackendError> {
    let mut bytes = Vec::new();
    PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, PngFilter::Adaptive)
        .write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| BackendError::Encode(format!("PNG encode failed: {e}")))?;
    Ok(OptimizedImage {
        bytes,
        format: OutputFormat::Png,
        width: rgba.width(),
        height: rgba.height(),
        mode: ColorMode::Rgba,
    })
}

fn downscale_rgb(img: RgbImage, max_px: u32) -> RgbImage {
    let (w, h) = fit_within(img.dimensions(), max_px);
    if (w, h) == img.dimensions() {
        return img;
    }
    image::imageops::resize(&img, w, h, FilterType::Lanczos3)
}

fn downscale_rgba(img: RgbaImage, max_px: u32) -> RgbaImage {
    let (w, h) = fit_within(img.dimensions(), max_px);
    if (w, h) == img.dimensions() {
        return img;
    }
    image::imageops::resize(&img, w, h, FilterType::Lanczos3)
}

impl ImageBackend for RustBackend {
    fn optimize(
        &self,
        source: &Path,
        params: &OptimizeParams,
    ) -> Result<OptimizedImage, BackendError> {
        let img = load_oriented(source)?;

        if !img.color().has_alpha() {
            let rgb = downscale_rgb(img.to_rgb8(), params.max_px);
            return encode_jpeg(&rgb, params.quality);
        }

        match params.alpha {
            AlphaPolicy::Preserve => {
                let rgba = downscale_rgba(img.to_rgba8(), params.max_px);
                encode_png(&rgba)
            }
            AlphaPolicy::FlattenWhite => {
                // Flatten before resampling so transparent edges don't bleed color
                let rgb = downscale_rgb(flatten_onto_white(&img.to_rgba8()), params.max_px);
                encode_jpeg(&rgb, params.quality)
            }
        }
    }

    fn optimize_streaming(
        &self,
        source: &Path,
        params: &OptimizeParams,
    ) -> Result<OptimizedImage, BackendError> {
        super::streaming::downsample_chunked(source, params.max_px, params.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn params(max_px: u32, alpha: AlphaPolicy) -> OptimizeParams {
        OptimizeParams {
            max_px,
            quality: Quality::new(85),
            alpha,
        }
    }

    /// Create a small valid JPEG file with the given dimensions.
    fn create_test_jpeg(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    /// PNG whose left half is opaque red and right half fully transparent.
    fn create_half_transparent_png(path: &Path, width: u32, height: u32) {
        let img = RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 0, 0])
            }
        });
        img.save(path).unwrap();
    }

    #[test]
    fn opaque_jpeg_downscaled_to_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("page.jpg");
        create_test_jpeg(&path, 400, 300);

        let out = RustBackend::new()
            .optimize(&path, &params(200, AlphaPolicy::Preserve))
            .unwrap();
        assert_eq!(out.format, OutputFormat::Jpeg);
        assert_eq!(out.mode, ColorMode::Rgb);
        assert_eq!((out.width, out.height), (200, 150));

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (200, 150));
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("small.jpg");
        create_test_jpeg(&path, 120, 80);

        let out = RustBackend::new()
            .optimize(&path, &params(3000, AlphaPolicy::Preserve))
            .unwrap();
        assert_eq!((out.width, out.height), (120, 80));
    }

    #[test]
    fn transparent_png_preserved_as_rgba_png() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("figure.png");
        create_half_transparent_png(&path, 64, 32);

        let out = RustBackend::new()
            .optimize(&path, &params(3000, AlphaPolicy::Preserve))
            .unwrap();
        assert_eq!(out.format, OutputFormat::Png);
        assert_eq!(out.mode, ColorMode::Rgba);

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.get_pixel(60, 10).0[3], 0);
        assert_eq!(decoded.get_pixel(2, 10).0, [255, 0, 0, 255]);
    }

    #[test]
    fn transparent_png_flattened_to_white_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("figure.png");
        create_half_transparent_png(&path, 64, 32);

        let out = RustBackend::new()
            .optimize(&path, &params(3000, AlphaPolicy::FlattenWhite))
            .unwrap();
        assert_eq!(out.format, OutputFormat::Jpeg);
        assert_eq!(out.mode, ColorMode::Rgb);

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert!(!decoded.color().has_alpha());
        let [r, g, b, _] = decoded.get_pixel(60, 16).0;
        assert!(r > 240 && g > 240 && b > 240, "expected white, got {r},{g},{b}");
        let [r, g, b, _] = decoded.get_pixel(4, 16).0;
        assert!(r > 200 && g < 60 && b < 60, "expected red, got {r},{g},{b}");
    }

    #[test]
    fn flatten_blends_partial_alpha() {
        let rgba = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 128]));
        let rgb = flatten_onto_white(&rgba);
        // 255 * (255 - 128) / 255 = 127
        assert_eq!(rgb.get_pixel(0, 0).0, [127, 127, 127]);

        let opaque = RgbaImage::from_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
        assert_eq!(flatten_onto_white(&opaque).get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn garbage_without_known_format_is_undecodable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("mystery.bin");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let err = RustBackend::new()
            .optimize(&path, &params(3000, AlphaPolicy::Preserve))
            .unwrap_err();
        assert!(err.is_undecodable(), "got {err:?}");
    }

    #[test]
    fn nonexistent_file_is_io_error() {
        let err = RustBackend::new()
            .optimize(
                Path::new("/nonexistent/image.jpg"),
                &params(3000, AlphaPolicy::Preserve),
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::Io(_)));
    }

    #[test]
    fn lower_quality_gives_smaller_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("noisy.png");
        let img = RgbImage::from_fn(256, 256, |x, y| {
            image::Rgb([
                (x.wrapping_mul(31) ^ y.wrapping_mul(17)) as u8,
                (x * y % 251) as u8,
                ((x + y) * 7 % 256) as u8,
            ])
        });
        img.save(&path).unwrap();

        let backend = RustBackend::new();
        let high = backend
            .optimize(&path, &params(3000, AlphaPolicy::Preserve))
            .unwrap();
        let low = backend
            .optimize(
                &path,
                &OptimizeParams {
                    max_px: 3000,
                    quality: Quality::new(30),
                    alpha: AlphaPolicy::Preserve,
                },
            )
            .unwrap();
        assert!(low.len() < high.len());
    }
}
