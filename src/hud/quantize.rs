//! Step grids and tuning constants
//!
//! Every comparison in the decision core runs on quantized values: the
//! 16-segment display grid for what the user sees, the 1/64 fine grid for
//! what the hardware actually moves in. The tolerances below have
//! behavioral consequences and are tested at their exact boundaries.

use std::time::Duration;

/// Segments of the HUD bar; values snap to multiples of 1/16.
pub const DISPLAY_STEPS: f32 = 16.0;

/// Finest real adjustment step (Shift+Option media keys move by 1/64).
pub const FINE_STEPS: f32 = 64.0;

/// One fine step: 1/64.
pub const FINE_STEP: f32 = 1.0 / FINE_STEPS;

/// One display step: 1/16.
pub const DISPLAY_STEP: f32 = 1.0 / DISPLAY_STEPS;

/// A value counts as changed only beyond this delta.
/// Strictly smaller than one fine step (so a single 1/64 press is never
/// masked) and strictly larger than observed hardware read noise.
pub const VALUE_EPSILON: f32 = 1e-3;

/// Tolerance for matching a delta against exact fine-step multiples.
/// Tighter than `VALUE_EPSILON`: key-driven writes land exactly on the
/// grid, so anything further off is an ambient adjustment.
pub const STEP_MATCH_TOLERANCE: f32 = 1e-4;

/// Held keys and missed poll cycles can batch up to this many fine steps
/// into one observed delta.
pub const MAX_STEP_MULTIPLE: u32 = 4;

/// A hardware change is attributed to the keyboard only if a key press
/// for the channel was seen within this trailing window.
pub const KEY_RECENCY_WINDOW: Duration = Duration::from_secs(1);

/// At or below this quantized value the channel is at its minimum.
pub const LOWER_BOUNDARY: f32 = 0.001;

/// At or above this quantized value the channel is at its maximum.
pub const UPPER_BOUNDARY: f32 = 0.999;

/// Snap to the 16-segment display grid.
pub fn quantize_display(value: f32) -> f32 {
    (value.clamp(0.0, 1.0) * DISPLAY_STEPS).round() / DISPLAY_STEPS
}

/// Snap to the 1/64 fine grid. Display grid points are a subset, so
/// state stored on this grid compares cleanly against both step sizes.
pub fn quantize_fine(value: f32) -> f32 {
    (value.clamp(0.0, 1.0) * FINE_STEPS).round() / FINE_STEPS
}

/// The change gate: true when `new` differs from `old` by more than
/// float noise.
pub fn changed(new: f32, old: f32) -> bool {
    (new - old).abs() > VALUE_EPSILON
}
