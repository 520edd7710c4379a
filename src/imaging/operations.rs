//! High-level image operations.
//!
//! These functions combine calculations with backend execution: routing
//! undecodable chunked sources to the streaming decoder, and the adaptive
//! size-budget loop that shrinks pixels and quality until the encoded output
//! fits under the upload ceiling.

use super::backend::{BackendError, ImageBackend, OptimizedImage};
use super::calculations::{attempt_floors, next_attempt_params};
use super::params::{OptimizeParams, Quality};
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Default attempt bound for [`optimize_within_budget`].
pub const MAX_ATTEMPTS: u32 = 8;

/// Source formats the streaming decoder can read strip by strip.
const CHUNKED_EXTENSIONS: &[&str] = &["tif", "tiff"];

pub fn is_chunked_format(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| CHUNKED_EXTENSIONS.iter().any(|c| e.eq_ignore_ascii_case(c)))
}

/// Optimize once, retrying through the streaming decoder when the regular
/// decoder refuses a chunked source.
pub fn optimize_with_fallback(
    backend: &impl ImageBackend,
    source: &Path,
    params: &OptimizeParams,
) -> Result<OptimizedImage> {
    match backend.optimize(source, params) {
        Err(err) if err.is_undecodable() && is_chunked_format(source) => {
            tracing::info!(
                path = %source.display(),
                reason = %err,
                "regular decoder refused file, using streaming decoder"
            );
            backend.optimize_streaming(source, params)
        }
        other => other,
    }
}

/// Outcome of one attempt inside the budget loop.
#[derive(Debug)]
pub enum AttemptOutcome {
    Fits(OptimizedImage),
    Oversized { size: u64 },
    Failed(BackendError),
}

/// Outcome of the whole budget loop.
#[derive(Debug)]
pub enum BudgetOutcome {
    /// Output at or under the ceiling.
    Fits {
        image: OptimizedImage,
        attempts: u32,
        params: OptimizeParams,
    },
    /// Every attempt was oversized or failed.
    Exhausted {
        attempts: u32,
        last_size: Option<u64>,
        last_error: Option<BackendError>,
    },
    /// A failure that shrinking cannot fix (missing capability, unreadable file).
    Aborted { attempts: u32, error: BackendError },
}

/// Run one attempt and classify it against the ceiling.
pub fn attempt(
    backend: &impl ImageBackend,
    source: &Path,
    params: &OptimizeParams,
    max_bytes: u64,
) -> AttemptOutcome {
    match optimize_with_fallback(backend, source, params) {
        Ok(image) if image.len() <= max_bytes => AttemptOutcome::Fits(image),
        Ok(image) => AttemptOutcome::Oversized { size: image.len() },
        Err(err) => AttemptOutcome::Failed(err),
    }
}

/// Optimize `source` until the encoded output is at most `max_bytes`.
///
/// Each miss shrinks the pixel bound and quality via
/// [`next_attempt_params`](super::calculations::next_attempt_params), never
/// going above the starting values.
/// Decode and encode errors count as misses. Missing capabilities and I/O
/// errors abort at once since no parameter change can fix them.
pub fn optimize_within_budget(
    backend: &impl ImageBackend,
    source: &Path,
    initial: &OptimizeParams,
    max_bytes: u64,
    max_attempts: u32,
) -> BudgetOutcome {
    let mut params = *initial;
    let floors = attempt_floors(initial.max_px, initial.quality.value());
    let mut last_size = None;
    let mut last_error = None;

    for attempts in 1..=max_attempts {
        match attempt(backend, source, &params, max_bytes) {
            AttemptOutcome::Fits(image) => {
                return BudgetOutcome::Fits {
                    image,
                    attempts,
                    params,
                };
            }
            AttemptOutcome::Oversized { size } => {
                tracing::debug!(
                    path = %source.display(),
                    attempt = attempts,
                    size,
                    max_bytes,
                    max_px = params.max_px,
                    quality = params.quality.value(),
                    "output over budget, shrinking"
                );
                last_size = Some(size);
            }
            AttemptOutcome::Failed(
                error @ (BackendError::CapabilityUnavailable(_) | BackendError::Io(_)),
            ) => {
                return BudgetOutcome::Aborted { attempts, error };
            }
            AttemptOutcome::Failed(error) => {
                tracing::debug!(
                    path = %source.display(),
                    attempt = attempts,
                    %error,
                    "attempt failed, shrinking"
                );
                last_error = Some(error);
            }
        }

        let (px, q) = next_attempt_params(params.max_px, params.quality.value(), floors);
        params.max_px = px;
        params.quality = Quality::new(q);
    }

    BudgetOutcome::Exhausted {
        attempts: max_attempts,
        last_size,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, MockResult, RecordedOp};
    use crate::imaging::params::AlphaPolicy;
    use crate::imaging::optimizer::RustBackend;

    fn params() -> OptimizeParams {
        OptimizeParams {
            max_px: 3000,
            quality: Quality::new(85),
            alpha: AlphaPolicy::Preserve,
        }
    }

    fn attempted(backend: &MockBackend) -> Vec<(u32, u32)> {
        backend
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Optimize {
                    max_px, quality, ..
                } => Some((max_px, quality)),
                RecordedOp::Streaming { .. } => None,
            })
            .collect()
    }

    // =========================================================================
    // Fallback routing
    // =========================================================================

    #[test]
    fn chunked_format_detection() {
        assert!(is_chunked_format(Path::new("a/b.tif")));
        assert!(is_chunked_format(Path::new("a/b.TIFF")));
        assert!(!is_chunked_format(Path::new("a/b.psd")));
        assert!(!is_chunked_format(Path::new("a/tif")));
    }

    #[test]
    fn undecodable_tiff_routes_to_streaming() {
        let backend = MockBackend::with_script(vec![MockResult::Undecodable, MockResult::Bytes(7)]);
        let out = optimize_with_fallback(&backend, Path::new("/b/plate.tif"), &params()).unwrap();
        assert_eq!(out.len(), 7);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[1], RecordedOp::Streaming { .. }));
    }

    #[test]
    fn undecodable_non_chunked_is_not_routed() {
        let backend = MockBackend::with_script(vec![MockResult::Undecodable]);
        let err = optimize_with_fallback(&backend, Path::new("/b/art.psd"), &params()).unwrap_err();
        assert!(err.is_undecodable());
        assert_eq!(backend.get_operations().len(), 1);
    }

    #[test]
    fn generic_decode_error_is_not_routed() {
        let backend = MockBackend::with_script(vec![MockResult::Decode]);
        let err = optimize_with_fallback(&backend, Path::new("/b/plate.tif"), &params()).unwrap_err();
        assert!(matches!(err, BackendError::Decode { .. }));
        assert_eq!(backend.get_operations().len(), 1);
    }

    // =========================================================================
    // Budget loop
    // =========================================================================

    #[test]
    fn fits_on_first_attempt() {
        let backend = MockBackend::with_script(vec![MockResult::Bytes(100)]);
        let outcome = optimize_within_budget(&backend, Path::new("/a.jpg"), &params(), 100, 8);
        match outcome {
            BudgetOutcome::Fits {
                image, attempts, ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(image.len(), 100);
            }
            other => panic!("expected Fits, got {other:?}"),
        }
    }

    #[test]
    fn shrinks_until_it_fits() {
        let backend = MockBackend::with_script(vec![
            MockResult::Bytes(500),
            MockResult::Bytes(300),
            MockResult::Bytes(90),
        ]);
        let outcome = optimize_within_budget(&backend, Path::new("/a.jpg"), &params(), 100, 8);
        match outcome {
            BudgetOutcome::Fits {
                attempts, params, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(params.max_px, 2167);
                assert_eq!(params.quality.value(), 77);
            }
            other => panic!("expected Fits, got {other:?}"),
        }
        assert_eq!(attempted(&backend), vec![(3000, 85), (2550, 81), (2167, 77)]);
    }

    #[test]
    fn small_configured_bounds_are_never_raised() {
        let backend = MockBackend::with_script(vec![MockResult::Bytes(500); 3]);
        let start = OptimizeParams {
            max_px: 600,
            quality: Quality::new(70),
            alpha: AlphaPolicy::Preserve,
        };
        let outcome = optimize_within_budget(&backend, Path::new("/a.jpg"), &start, 100, 3);
        assert!(matches!(outcome, BudgetOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(attempted(&backend), vec![(600, 70), (600, 66), (600, 65)]);
    }

    #[test]
    fn errors_count_as_misses() {
        let backend = MockBackend::with_script(vec![
            MockResult::Encode,
            MockResult::Decode,
            MockResult::Bytes(10),
        ]);
        let outcome = optimize_within_budget(&backend, Path::new("/a.png"), &params(), 100, 8);
        assert!(matches!(outcome, BudgetOutcome::Fits { attempts: 3, .. }));
    }

    #[test]
    fn exhausts_after_bounded_attempts() {
        let backend = MockBackend::with_script(vec![MockResult::Bytes(1000); 20]);
        let outcome = optimize_within_budget(&backend, Path::new("/a.jpg"), &params(), 999, 8);
        match outcome {
            BudgetOutcome::Exhausted {
                attempts,
                last_size,
                last_error,
            } => {
                assert_eq!(attempts, 8);
                assert_eq!(last_size, Some(1000));
                assert!(last_error.is_none());
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(backend.get_operations().len(), 8);
    }

    #[test]
    fn missing_capability_aborts_immediately() {
        let backend = MockBackend::with_script(vec![
            MockResult::Undecodable,
            MockResult::CapabilityUnavailable,
        ]);
        let outcome = optimize_within_budget(&backend, Path::new("/huge.tif"), &params(), 100, 8);
        assert!(matches!(
            outcome,
            BudgetOutcome::Aborted {
                attempts: 1,
                error: BackendError::CapabilityUnavailable(_)
            }
        ));
        assert_eq!(backend.get_operations().len(), 2);
    }

    #[test]
    fn never_returns_output_over_ceiling() {
        for ceiling in [0u64, 1, 50, 99, 100, 101, 5000] {
            let script = [900, 700, 400, 250, 120, 101, 100, 60]
                .into_iter()
                .map(MockResult::Bytes)
                .collect();
            let backend = MockBackend::with_script(script);
            match optimize_within_budget(&backend, Path::new("/a.jpg"), &params(), ceiling, 8) {
                BudgetOutcome::Fits { image, .. } => assert!(image.len() <= ceiling),
                BudgetOutcome::Exhausted { .. } => assert!(ceiling < 60),
                BudgetOutcome::Aborted { error, .. } => panic!("unexpected abort: {error}"),
            }
        }
    }

    #[test]
    fn real_backend_respects_ceiling() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("noise.png");
        let img = image::RgbImage::from_fn(1600, 1200, |x, y| {
            let v = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503));
            image::Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
        });
        img.save(&path).unwrap();

        let ceiling = 400_000;
        let outcome =
            optimize_within_budget(&RustBackend::new(), &path, &params(), ceiling, MAX_ATTEMPTS);
        match outcome {
            BudgetOutcome::Fits { image, .. } => assert!(image.len() <= ceiling),
            BudgetOutcome::Exhausted { .. } => {}
            BudgetOutcome::Aborted { error, .. } => panic!("unexpected abort: {error}"),
        }
    }
}
