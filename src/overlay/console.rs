//! Console surface - logs overlay activity instead of drawing
//!
//! Used by `--watch` mode and anywhere a real overlay window is not
//! wired in. Keeps a rebuild counter so behavior is observable from
//! tests and diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::placement::Anchor;
use super::{HudContent, Surface};
use crate::sources::Channel;

pub struct ConsoleSurface {
    rebuild_count: AtomicU64,
    verbose: bool,
}

impl ConsoleSurface {
    /// Surface that prints every HUD transition at info level (`--watch`).
    pub fn new() -> Self {
        Self {
            rebuild_count: AtomicU64::new(0),
            verbose: true,
        }
    }

    /// Surface that only narrates at debug level.
    pub fn quiet() -> Self {
        Self {
            rebuild_count: AtomicU64::new(0),
            verbose: false,
        }
    }

    /// Total content builds (initial shows + refreshes).
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count.load(Ordering::SeqCst)
    }

    fn render(content: &HudContent) -> String {
        let segments = (content.value * 16.0).round() as usize;
        let bar: String = "#".repeat(segments) + &"-".repeat(16 - segments.min(16));
        let suffix = match (content.channel, content.muted) {
            (Channel::Volume, true) => " (muted)",
            _ => "",
        };
        format!(
            "{} [{}] {:>3.0}%{}",
            content.channel,
            bar,
            content.value * 100.0,
            suffix
        )
    }
}

impl Default for ConsoleSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for ConsoleSurface {
    fn show(&self, content: &HudContent, anchor: Anchor) {
        let n = self.rebuild_count.fetch_add(1, Ordering::SeqCst) + 1;
        let line = format!(
            "🔆 HUD show: {} at ({:.0}, {:.0}) [build #{}]",
            Self::render(content),
            anchor.x,
            anchor.y,
            n
        );
        if self.verbose {
            info!("{line}");
        } else {
            debug!("{line}");
        }
    }

    fn refresh(&self, content: &HudContent) {
        let n = self.rebuild_count.fetch_add(1, Ordering::SeqCst) + 1;
        let line = format!("🔆 HUD update: {} [build #{}]", Self::render(content), n);
        if self.verbose {
            info!("{line}");
        } else {
            debug!("{line}");
        }
    }

    fn hide(&self) {
        if self.verbose {
            info!("🌑 HUD hide");
        } else {
            debug!("🌑 HUD hide");
        }
    }

    fn move_to(&self, anchor: Anchor) {
        debug!("📺 HUD re-anchored to ({:.0}, {:.0})", anchor.x, anchor.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sixteen_segment_bar() {
        let content = HudContent {
            channel: Channel::Volume,
            value: 0.5,
            muted: false,
        };
        let line = ConsoleSurface::render(&content);
        assert!(line.contains("########--------"));
        assert!(line.contains("50%"));
    }

    #[test]
    fn renders_mute_marker() {
        let content = HudContent {
            channel: Channel::Volume,
            value: 0.25,
            muted: true,
        };
        assert!(ConsoleSurface::render(&content).ends_with("(muted)"));
    }

    #[test]
    fn counts_rebuilds() {
        let surface = ConsoleSurface::new();
        let content = HudContent {
            channel: Channel::Brightness,
            value: 1.0,
            muted: false,
        };
        surface.show(&content, Anchor::default());
        surface.refresh(&content);
        surface.hide();
        assert_eq!(surface.rebuild_count(), 2);
    }
}
