//! Image processing — pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode + orient** | `image::ImageReader` + `apply_orientation` |
//! | **Resize** | Lanczos3 via `image::imageops::resize` |
//! | **Encode** | JPEG (quality) or PNG (best compression) |
//! | **Streaming TIFF** | `tiff` chunk reader, strided sampling |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and attempt math (unit testable)
//! - **Parameters**: Data structures describing an optimization attempt
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Fallback routing and the adaptive size-budget loop

pub mod backend;
mod calculations;
pub mod operations;
pub mod optimizer;
mod params;
mod streaming;

pub use backend::{BackendError, ImageBackend, OptimizedImage};
pub use calculations::{attempt_floors, fit_within, next_attempt_params, sampling_stride};
pub use operations::{
    AttemptOutcome, BudgetOutcome, MAX_ATTEMPTS, optimize_with_fallback, optimize_within_budget,
};
pub use optimizer::RustBackend;
pub use params::{AlphaPolicy, ColorMode, OptimizeParams, OutputFormat, Quality};
