//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the pipeline needs:
//! a regular decode-resize-encode pass and a streaming fallback for sources
//! the regular decoders refuse.
//!
//! The production implementation is
//! [`RustBackend`](super::optimizer::RustBackend): pure Rust, statically
//! linked. Tests swap in a recording mock so the driver can be exercised
//! without touching pixels.

use super::params::{ColorMode, OptimizeParams, OutputFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    /// The regular decoders refused the file (unsupported layout or over
    /// decoder limits). Chunked formats can be retried via the streaming path.
    #[error("undecodable by the standard decoder {path}: {message}")]
    Undecodable { path: PathBuf, message: String },
    #[error("encode failed: {0}")]
    Encode(String),
    /// An optional decoder is not compiled into this build.
    #[error("missing optional capability: {0}")]
    CapabilityUnavailable(String),
}

impl BackendError {
    pub fn is_undecodable(&self) -> bool {
        matches!(self, BackendError::Undecodable { .. })
    }
}

/// Encoded output of one optimization pass. Owned by the caller and
/// discarded after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub mode: ColorMode,
}

impl OptimizedImage {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Trait for image processing backends.
///
/// `Sync` so one backend can be shared by book workers running on rayon.
pub trait ImageBackend: Sync {
    /// Decode, orient, downscale and re-encode `source`.
    fn optimize(
        &self,
        source: &Path,
        params: &OptimizeParams,
    ) -> Result<OptimizedImage, BackendError>;

    /// Strided chunk-by-chunk downsample for sources that [`optimize`]
    /// reported as undecodable. Always produces JPEG.
    ///
    /// [`optimize`]: ImageBackend::optimize
    fn optimize_streaming(
        &self,
        source: &Path,
        params: &OptimizeParams,
    ) -> Result<OptimizedImage, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{AlphaPolicy, Quality};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted result for one mock call.
    #[derive(Debug, Clone)]
    pub enum MockResult {
        /// Produce an image whose encoded size is this many bytes.
        Bytes(usize),
        Undecodable,
        Decode,
        Encode,
        CapabilityUnavailable,
    }

    /// Mock backend that records operations without decoding anything.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    ///
    /// Results are consumed front to back; when the script runs dry every
    /// call produces `default_bytes` bytes.
    pub struct MockBackend {
        pub script: Mutex<VecDeque<MockResult>>,
        pub default_bytes: usize,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Optimize {
            source: String,
            max_px: u32,
            quality: u32,
        },
        Streaming {
            source: String,
            max_px: u32,
            quality: u32,
        },
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::with_script(Vec::new())
        }

        pub fn with_script(script: Vec<MockResult>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                default_bytes: 1024,
                operations: Mutex::new(Vec::new()),
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn next_result(
            &self,
            source: &Path,
            params: &OptimizeParams,
            format: OutputFormat,
        ) -> Result<OptimizedImage, BackendError> {
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MockResult::Bytes(self.default_bytes));
            let path = source.to_path_buf();
            match next {
                MockResult::Bytes(n) => Ok(OptimizedImage {
                    // Seed with quality so attempts at different parameters differ
                    bytes: vec![params.quality.as_u8(); n],
                    format,
                    width: params.max_px,
                    height: params.max_px,
                    mode: ColorMode::Rgb,
                }),
                MockResult::Undecodable => Err(BackendError::Undecodable {
                    path,
                    message: "mock undecodable".into(),
                }),
                MockResult::Decode => Err(BackendError::Decode {
                    path,
                    message: "mock decode failure".into(),
                }),
                MockResult::Encode => Err(BackendError::Encode("mock encode failure".into())),
                MockResult::CapabilityUnavailable => Err(BackendError::CapabilityUnavailable(
                    "mock streaming decoder".into(),
                )),
            }
        }
    }

    impl ImageBackend for MockBackend {
        fn optimize(
            &self,
            source: &Path,
            params: &OptimizeParams,
        ) -> Result<OptimizedImage, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Optimize {
                source: source.to_string_lossy().to_string(),
                max_px: params.max_px,
                quality: params.quality.value(),
            });
            // Mock sources are opaque, so both alpha policies yield JPEG
            self.next_result(source, params, OutputFormat::Jpeg)
        }

        fn optimize_streaming(
            &self,
            source: &Path,
            params: &OptimizeParams,
        ) -> Result<OptimizedImage, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Streaming {
                source: source.to_string_lossy().to_string(),
                max_px: params.max_px,
                quality: params.quality.value(),
            });
            self.next_result(source, params, OutputFormat::Jpeg)
        }
    }

    fn params() -> OptimizeParams {
        OptimizeParams {
            max_px: 3000,
            quality: Quality::new(85),
            alpha: AlphaPolicy::Preserve,
        }
    }

    #[test]
    fn mock_records_optimize() {
        let backend = MockBackend::new();
        let image = backend
            .optimize(Path::new("/book/images/fig.tif"), &params())
            .unwrap();
        assert_eq!(image.len(), 1024);
        assert_eq!(image.format, OutputFormat::Jpeg);

        let ops = backend.get_operations();
        assert_eq!(
            ops,
            vec![RecordedOp::Optimize {
                source: "/book/images/fig.tif".into(),
                max_px: 3000,
                quality: 85,
            }]
        );
    }

    #[test]
    fn mock_follows_script_then_default() {
        let backend = MockBackend::with_script(vec![
            MockResult::Undecodable,
            MockResult::Bytes(10),
        ]);
        let path = Path::new("/x.tif");

        let err = backend.optimize(path, &params()).unwrap_err();
        assert!(err.is_undecodable());
        assert_eq!(backend.optimize_streaming(path, &params()).unwrap().len(), 10);
        assert_eq!(backend.optimize(path, &params()).unwrap().len(), 1024);
    }

    #[test]
    fn only_undecodable_is_undecodable() {
        let path = PathBuf::from("/x");
        assert!(!BackendError::Decode {
            path: path.clone(),
            message: String::new()
        }
        .is_undecodable());
        assert!(!BackendError::Encode(String::new()).is_undecodable());
        assert!(!BackendError::CapabilityUnavailable(String::new()).is_undecodable());
    }
}
