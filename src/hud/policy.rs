//! User-initiated change classification
//!
//! Two policies decide whether an observed hardware change came from the
//! keyboard. They answer different situations and are deliberately kept
//! as separate variants rather than merged into one heuristic:
//!
//! - `KeyRecency` works whenever key observation is available: a change
//!   is user-initiated only if a key press for the channel landed inside
//!   a short trailing window. Used for volume always, and for brightness
//!   in heuristic mode.
//! - `StepQuantized` works blind: real key presses always move brightness
//!   by exact fine-step multiples, while ambient-light and battery
//!   adjustments drift by arbitrary continuous amounts. Used for
//!   brightness when the input-monitoring grant is unavailable.

use std::time::Duration;

use super::quantize::{FINE_STEP, KEY_RECENCY_WINDOW, MAX_STEP_MULTIPLE, STEP_MATCH_TOLERANCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPolicy {
    /// Attribute to the user if a key press was seen recently.
    KeyRecency,
    /// Attribute to the user if the delta is an exact 1-4x fine-step.
    StepQuantized,
}

impl DetectionPolicy {
    /// Classify an accepted-change candidate.
    ///
    /// `delta` is the fine-quantized difference from the last observed
    /// value; `key_age` is the elapsed time since the channel's last key
    /// press, if any.
    pub fn accepts(&self, delta: f32, key_age: Option<Duration>) -> bool {
        match self {
            DetectionPolicy::KeyRecency => {
                key_age.map_or(false, |age| age <= KEY_RECENCY_WINDOW)
            }
            DetectionPolicy::StepQuantized => is_step_multiple(delta),
        }
    }
}

/// True when `delta` is within tolerance of an exact integer multiple
/// (1 through `MAX_STEP_MULTIPLE`) of the fine step.
pub fn is_step_multiple(delta: f32) -> bool {
    let magnitude = delta.abs();
    let steps = (magnitude / FINE_STEP).round();
    if steps < 1.0 || steps > MAX_STEP_MULTIPLE as f32 {
        return false;
    }
    (magnitude - steps * FINE_STEP).abs() <= STEP_MATCH_TOLERANCE
}
