//! Pure calculation functions for image dimensions and retry parameters.
//!
//! All functions here are pure and testable without any I/O or images.

/// Smallest longer edge the budget loop will shrink to.
pub const MIN_ATTEMPT_PX: u32 = 800;
/// Lowest quality the budget loop will fall back to.
pub const MIN_ATTEMPT_QUALITY: u32 = 65;
/// Pixel shrink factor applied after each miss.
pub const SHRINK_FACTOR: f64 = 0.85;
/// Quality step applied after each miss.
pub const QUALITY_STEP: u32 = 4;

/// Dimensions that fit inside a `max_px` × `max_px` box, preserving aspect
/// ratio. Never upscales: images already inside the box are returned as-is.
///
/// # Examples
/// ```
/// # use booklift::imaging::fit_within;
/// assert_eq!(fit_within((6000, 4000), 3000), (3000, 2000));
/// assert_eq!(fit_within((1200, 800), 3000), (1200, 800));
/// ```
pub fn fit_within(source: (u32, u32), max_px: u32) -> (u32, u32) {
    let (w, h) = source;
    let longer = w.max(h);
    if longer <= max_px || longer == 0 {
        return (w, h);
    }

    let ratio = max_px as f64 / longer as f64;
    if w >= h {
        // Landscape or square: width is the longer edge
        let out_h = ((h as f64 * ratio).round() as u32).max(1);
        (max_px, out_h)
    } else {
        let out_w = ((w as f64 * ratio).round() as u32).max(1);
        (out_w, max_px)
    }
}

/// Integer sampling stride so that taking every `stride`-th element of `dim`
/// yields at most `max_px` samples. Always at least 1.
pub fn sampling_stride(dim: u32, max_px: u32) -> u32 {
    if max_px == 0 {
        return dim.max(1);
    }
    dim.div_ceil(max_px).max(1)
}

/// Number of samples taken from `dim` at the given stride.
pub fn sampled_len(dim: u32, stride: u32) -> u32 {
    dim.div_ceil(stride.max(1))
}

/// Floors for the budget loop given the first attempt's parameters.
///
/// A caller already below [`MIN_ATTEMPT_PX`] or [`MIN_ATTEMPT_QUALITY`] keeps
/// its own value as the floor, so later attempts never exceed it.
pub fn attempt_floors(max_px: u32, quality: u32) -> (u32, u32) {
    (max_px.min(MIN_ATTEMPT_PX), quality.min(MIN_ATTEMPT_QUALITY))
}

/// Parameters for the next budget-loop attempt after a miss.
///
/// Pixels shrink by [`SHRINK_FACTOR`], quality drops by [`QUALITY_STEP`];
/// neither goes below `floors` (see [`attempt_floors`]).
pub fn next_attempt_params(max_px: u32, quality: u32, floors: (u32, u32)) -> (u32, u32) {
    let (px_floor, quality_floor) = floors;
    let px = ((max_px as f64 * SHRINK_FACTOR) as u32).max(px_floor);
    let q = quality.saturating_sub(QUALITY_STEP).max(quality_floor);
    (px, q)
}
