//! Overlay anchoring against the current display layout
//!
//! Screen geometry uses bottom-left-origin coordinates, matching the
//! window server. The anchor is the bottom-center point the overlay
//! grows up from; the placement mode decides whether its height above
//! the bottom edge is a fraction of the screen or a fixed pixel offset.

use crate::config::AppConfig;

/// Rectangular bounds for one display, bottom-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplayFrame {
    /// Stable display identifier (`CGDirectDisplayID` on macOS).
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DisplayFrame {
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// Point the overlay anchors to, bottom-left origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

/// Queries against the live display layout.
///
/// Implemented by the platform layer and by `StaticDisplays` for tests
/// and headless mode.
pub trait DisplayProvider: Send + Sync {
    fn primary(&self) -> Option<DisplayFrame>;
    /// Display currently under the pointer, if it can be determined.
    fn under_pointer(&self) -> Option<DisplayFrame>;
}

/// Pick the display the overlay should appear on.
pub fn select_target(provider: &dyn DisplayProvider, cfg: &AppConfig) -> Option<DisplayFrame> {
    if cfg.hud_follows_mouse_display {
        provider.under_pointer().or_else(|| provider.primary())
    } else {
        provider.primary()
    }
}

/// Compute the anchor for a frame under the active placement mode.
pub fn anchor_for(frame: &DisplayFrame, cfg: &AppConfig) -> Anchor {
    let rise = if cfg.use_relative_positioning {
        frame.height * cfg.bottom_fraction
    } else {
        cfg.bottom_offset_px
    };
    Anchor {
        x: frame.x + frame.width / 2.0,
        y: frame.y + rise.min(frame.height),
    }
}

/// Fixed display layout with a scriptable pointer position.
pub struct StaticDisplays {
    frames: Vec<DisplayFrame>,
    pointer: parking_lot::Mutex<(f32, f32)>,
}

impl StaticDisplays {
    pub fn new(frames: Vec<DisplayFrame>) -> Self {
        Self {
            frames,
            pointer: parking_lot::Mutex::new((0.0, 0.0)),
        }
    }

    pub fn single(width: f32, height: f32) -> Self {
        Self::new(vec![DisplayFrame {
            id: 1,
            x: 0.0,
            y: 0.0,
            width,
            height,
        }])
    }

    pub fn move_pointer(&self, x: f32, y: f32) {
        *self.pointer.lock() = (x, y);
    }
}

impl DisplayProvider for StaticDisplays {
    fn primary(&self) -> Option<DisplayFrame> {
        self.frames.first().copied()
    }

    fn under_pointer(&self) -> Option<DisplayFrame> {
        let (px, py) = *self.pointer.lock();
        self.frames.iter().copied().find(|f| f.contains(px, py))
    }
}
