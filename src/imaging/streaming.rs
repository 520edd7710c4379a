//! Strided chunk-by-chunk TIFF downsampling.
//!
//! Print exports can be far larger than the regular decoders accept (or use
//! sample layouts they refuse). This path never materializes the full pixel
//! grid: it reads the image geometry from the header, picks integer row and
//! column strides so the sampled grid fits inside `max_px`, and decodes only
//! the strips or tiles that contain sampled pixels, one at a time.
//!
//! Both chunky and planar files are read one coding unit at a time (the same
//! strip or tile from every plane).
//!
//! Channel interpretation follows the photometric interpretation, falling
//! back to the sample count for extra-sample gray layouts:
//!
//! | Layout | Treated as |
//! |---|---|
//! | CMYK, CMYK + extra samples, or 4+ samples | CMYK on the first four, `255·(1−c/255)·(1−k/255)` |
//! | RGB, RGB + alpha, or 3 samples | RGB, extra samples dropped |
//! | gray, or 1–2 samples | intensity, replicated to RGB |
//! | palette, YCbCr, CIE L*a*b* | refused |
//!
//! 16-bit samples are reduced to their high byte. Output is always JPEG.
//!
//! The decoder lives behind the `streaming-fallback` cargo feature. Without
//! it every call fails with [`BackendError::CapabilityUnavailable`].

use super::backend::{BackendError, OptimizedImage};
use super::params::Quality;
use std::path::Path;

#[cfg(not(feature = "streaming-fallback"))]
pub fn downsample_chunked(
    source: &Path,
    _max_px: u32,
    _quality: Quality,
) -> Result<OptimizedImage, BackendError> {
    Err(BackendError::CapabilityUnavailable(format!(
        "streaming TIFF decoder not compiled in (build with the `streaming-fallback` feature) for {}",
        source.display()
    )))
}

#[cfg(feature = "streaming-fallback")]
pub fn downsample_chunked(
    source: &Path,
    max_px: u32,
    quality: Quality,
) -> Result<OptimizedImage, BackendError> {
    let rgb = sample_rgb(source, max_px)?;
    super::optimizer::encode_jpeg(&rgb, quality)
}

/// Strided RGB sample grid of a TIFF, at most `max_px` on each side.
#[cfg(feature = "streaming-fallback")]
fn sample_rgb(source: &Path, max_px: u32) -> Result<image::RgbImage, BackendError> {
    use super::calculations::{sampled_len, sampling_stride};
    use image::RgbImage;
    use std::fs::File;
    use std::io::BufReader;
    use tiff::decoder::{Decoder, TiffCodingUnit};

    let tiff_err = |e: tiff::TiffError| classify_tiff_error(source, e);
    let decode_err = |message: String| BackendError::Decode {
        path: source.to_path_buf(),
        message,
    };

    let file = File::open(source)?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err)?;
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    if width == 0 || height == 0 {
        return Err(decode_err("image has zero width or height".into()));
    }

    let color = decoder.colortype().map_err(tiff_err)?;
    let channels = Channels::of(color)
        .ok_or_else(|| decode_err(format!("{color:?} samples are not supported")))?;
    let bytes_per_sample = match color.bit_depth() {
        8 => 1,
        16 => 2,
        bits => {
            return Err(decode_err(format!(
                "{bits}-bit samples are not supported (only 8 and 16)"
            )));
        }
    };
    let samples = usize::from(color.num_samples());

    let stride_x = sampling_stride(width, max_px);
    let stride_y = sampling_stride(height, max_px);
    let out_w = sampled_len(width, stride_x);
    let out_h = sampled_len(height, stride_y);
    let mut out = vec![0u8; out_w as usize * out_h as usize * 3];

    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let chunks_across = width.div_ceil(chunk_w);
    let chunks_down = height.div_ceil(chunk_h);
    let mut buf = Vec::new();

    for chunk_row in 0..chunks_down {
        let y0 = chunk_row * chunk_h;
        let first_y = y0.div_ceil(stride_y) * stride_y;
        if first_y >= (y0 + chunk_h).min(height) {
            continue;
        }

        for chunk_col in 0..chunks_across {
            let x0 = chunk_col * chunk_w;
            // Index into the first plane; a coding unit spans the same region in every plane
            let index = chunk_row * chunks_across + chunk_col;
            let (data_w, data_h) = decoder.chunk_data_dimensions(index);
            let first_x = x0.div_ceil(stride_x) * stride_x;
            if first_x >= x0 + data_w || first_y >= y0 + data_h {
                continue;
            }

            let unit = TiffCodingUnit(index);
            let layout = decoder.image_coding_unit_layout(unit).map_err(tiff_err)?;
            let planes = layout.planes.max(1);
            if samples % planes != 0 {
                return Err(decode_err(format!(
                    "{samples} samples do not split into {planes} planes"
                )));
            }
            let samples_per_plane = samples / planes;
            let row_stride = layout.row_stride.map_or(
                data_w as usize * samples_per_plane * bytes_per_sample,
                |s| s.get(),
            );
            let plane_stride = layout
                .plane_stride
                .map_or(row_stride * data_h as usize, |s| s.get());

            // Planar bottom tiles past the first plane decode at full tile height
            buf.clear();
            buf.resize(layout.complete_len + row_stride * chunk_h as usize, 0);
            decoder
                .read_coding_unit_bytes(unit, &mut buf)
                .map_err(tiff_err)?;

            let view = ChunkView {
                buf: &buf,
                bytes_per_sample,
                samples_per_plane,
                row_stride,
                plane_stride,
            };
            if !view.covers(planes, data_w as usize, data_h as usize) {
                return Err(decode_err(format!("chunk {index} is shorter than its layout")));
            }

            for y in (first_y..y0 + data_h).step_by(stride_y as usize) {
                let local_y = (y - y0) as usize;
                let out_row = (y / stride_y) as usize * out_w as usize;
                for x in (first_x..x0 + data_w).step_by(stride_x as usize) {
                    let rgb = view.rgb(channels, (x - x0) as usize, local_y);
                    let dst = (out_row + (x / stride_x) as usize) * 3;
                    out[dst..dst + 3].copy_from_slice(&rgb);
                }
            }
        }
    }

    RgbImage::from_raw(out_w, out_h, out).ok_or_else(|| {
        BackendError::Encode("sampled buffer does not match output dimensions".into())
    })
}

#[cfg(feature = "streaming-fallback")]
fn classify_tiff_error(path: &Path, err: tiff::TiffError) -> BackendError {
    match err {
        tiff::TiffError::IoError(e) => BackendError::Io(e),
        other => BackendError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

/// How a pixel's leading samples map to RGB.
#[cfg(feature = "streaming-fallback")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channels {
    Intensity,
    Rgb,
    Cmyk,
}

#[cfg(feature = "streaming-fallback")]
impl Channels {
    /// `None` for layouts whose samples are not color intensities
    /// (palette indices, YCbCr, CIE L*a*b*).
    fn of(color: tiff::ColorType) -> Option<Self> {
        use tiff::ColorType;
        match color {
            // Keyed on the photometric interpretation: RGB with an alpha
            // sample has four samples but is not CMYK.
            ColorType::RGB(_) | ColorType::RGBA(_) => Some(Self::Rgb),
            ColorType::CMYK(_) | ColorType::CMYKA(_) => Some(Self::Cmyk),
            ColorType::Gray(_) | ColorType::GrayA(_) => Some(Self::Intensity),
            ColorType::Multiband { num_samples, .. } => Some(Self::from_sample_count(num_samples)),
            _ => None,
        }
    }

    fn from_sample_count(samples: u16) -> Self {
        match samples {
            0..=2 => Self::Intensity,
            3 => Self::Rgb,
            _ => Self::Cmyk,
        }
    }
}

/// One decoded strip or tile, every plane of it.
#[cfg(feature = "streaming-fallback")]
struct ChunkView<'a> {
    buf: &'a [u8],
    bytes_per_sample: usize,
    samples_per_plane: usize,
    row_stride: usize,
    plane_stride: usize,
}

#[cfg(feature = "streaming-fallback")]
impl ChunkView<'_> {
    fn covers(&self, planes: usize, width: usize, height: usize) -> bool {
        let end = (planes - 1) * self.plane_stride
            + (height - 1) * self.row_stride
            + width * self.samples_per_plane * self.bytes_per_sample;
        end <= self.buf.len()
    }

    /// Sample `s` of the pixel at chunk-local `(x, y)`, reduced to 8 bits.
    fn sample(&self, s: usize, x: usize, y: usize) -> u8 {
        let plane = s / self.samples_per_plane;
        let within = s % self.samples_per_plane;
        let at = plane * self.plane_stride
            + y * self.row_stride
            + (x * self.samples_per_plane + within) * self.bytes_per_sample;
        match self.bytes_per_sample {
            1 => self.buf[at],
            // Decoded samples are native-endian; keep the high byte
            _ => (u16::from_ne_bytes([self.buf[at], self.buf[at + 1]]) >> 8) as u8,
        }
    }

    fn rgb(&self, channels: Channels, x: usize, y: usize) -> [u8; 3] {
        let s = |i| self.sample(i, x, y);
        match channels {
            Channels::Intensity => [s(0); 3],
            Channels::Rgb => [s(0), s(1), s(2)],
            Channels::Cmyk => cmyk_to_rgb(s(0), s(1), s(2), s(3)),
        }
    }
}

#[cfg(feature = "streaming-fallback")]
fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let ink = |v: u8| ((255 - v as u32) * (255 - k as u32) + 127) / 255;
    [ink(c) as u8, ink(m) as u8, ink(y) as u8]
}
