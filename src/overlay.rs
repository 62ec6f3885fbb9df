//! Overlay presentation boundary
//!
//! The presenter actor is the single UI-affinity context: every overlay
//! mutation is marshaled onto it, whatever context produced the
//! decision. Rendering itself is behind the `Surface` trait - the
//! presenter decides *when* to show, refresh, move, and hide; a surface
//! decides *how*.

pub mod console;
pub mod placement;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::hud::quantize::VALUE_EPSILON;
use crate::hud::HudDecision;
use crate::sources::Channel;

use self::placement::{Anchor, DisplayProvider};

/// What a surface renders: the bar value plus the mute glyph state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HudContent {
    pub channel: Channel,
    pub value: f32,
    pub muted: bool,
}

/// Rendering collaborator contract.
///
/// Called only from the presenter actor, so implementations see strictly
/// serialized calls. A real overlay window lives outside this crate; the
/// in-tree implementations are the console surface and test recorders.
pub trait Surface: Send + Sync {
    /// Build content and bring the overlay on screen at `anchor`.
    fn show(&self, content: &HudContent, anchor: Anchor);
    /// Rebuild content while already visible (value/channel changed).
    fn refresh(&self, content: &HudContent);
    fn hide(&self);
    /// Re-anchor after a display-configuration change.
    fn move_to(&self, anchor: Anchor);
}

#[derive(Debug)]
enum PresenterCommand {
    Present(HudDecision),
    Reposition,
    Hide,
    Shutdown,
}

/// Handle for the presenter actor. All methods are fire-and-forget.
#[derive(Clone)]
pub struct PresenterHandle {
    tx: mpsc::UnboundedSender<PresenterCommand>,
}

impl PresenterHandle {
    pub fn present(&self, decision: HudDecision) {
        let _ = self.tx.send(PresenterCommand::Present(decision));
    }

    pub fn reposition(&self) {
        let _ = self.tx.send(PresenterCommand::Reposition);
    }

    pub fn hide(&self) {
        let _ = self.tx.send(PresenterCommand::Hide);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(PresenterCommand::Shutdown);
    }
}

/// Overlay state, owned exclusively by the presenter actor.
struct OverlayState {
    visible: bool,
    shown: Option<HudContent>,
    hide_at: Option<Instant>,
}

pub struct Presenter {
    surface: Arc<dyn Surface>,
    displays: Arc<dyn DisplayProvider>,
    config: watch::Receiver<Arc<AppConfig>>,
    rx: mpsc::UnboundedReceiver<PresenterCommand>,
    state: OverlayState,
}

impl Presenter {
    pub fn spawn(
        surface: Arc<dyn Surface>,
        displays: Arc<dyn DisplayProvider>,
        config: watch::Receiver<Arc<AppConfig>>,
    ) -> PresenterHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = Presenter {
            surface,
            displays,
            config,
            rx,
            state: OverlayState {
                visible: false,
                shown: None,
                hide_at: None,
            },
        };
        tokio::spawn(actor.run());

        PresenterHandle { tx }
    }

    async fn run(mut self) {
        debug!("overlay presenter started");

        loop {
            // The hide timer is single-shot and rearmed on every
            // content-affecting decision; because both the rearm and the
            // expiry run inside this loop there is no cancel/fire race.
            let deadline = self.state.hide_at;

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(PresenterCommand::Present(decision)) => self.on_present(decision),
                    Some(PresenterCommand::Reposition) => self.on_reposition(),
                    Some(PresenterCommand::Hide) => self.hide_now(),
                    Some(PresenterCommand::Shutdown) | None => break,
                },
                _ = async { tokio::time::sleep_until(deadline.unwrap()).await },
                    if deadline.is_some() => self.hide_now(),
            }
        }

        if self.state.visible {
            self.surface.hide();
        }
        debug!("overlay presenter stopped");
    }

    fn on_present(&mut self, decision: HudDecision) {
        let cfg = self.config.borrow().clone();
        let content = HudContent {
            channel: decision.channel,
            value: decision.value,
            muted: decision.muted,
        };

        // Every decision pushes the hide deadline out.
        self.state.hide_at = Some(Instant::now() + hide_delay(&cfg));

        if self.state.visible {
            if let Some(shown) = self.state.shown {
                let unchanged = shown.channel == content.channel
                    && (shown.value - content.value).abs() <= VALUE_EPSILON
                    && shown.muted == content.muted;
                if unchanged {
                    // Debounce: rapid repeats refresh the deadline, not
                    // the content.
                    trace!(channel = %content.channel, "overlay unchanged; deadline extended");
                    return;
                }
            }
            // A decision for another channel replaces the content rather
            // than stacking a second overlay.
            self.surface.refresh(&content);
        } else {
            self.surface.show(&content, self.anchor(&cfg));
            self.state.visible = true;
        }

        self.state.shown = Some(content);
    }

    fn on_reposition(&mut self) {
        if self.state.visible {
            let cfg = self.config.borrow().clone();
            let anchor = self.anchor(&cfg);
            debug!(?anchor, "re-anchoring overlay after display change");
            self.surface.move_to(anchor);
        }
        // Not visible: the next show computes a fresh anchor anyway.
    }

    fn hide_now(&mut self) {
        if self.state.visible {
            self.surface.hide();
        }
        self.state.visible = false;
        self.state.shown = None;
        self.state.hide_at = None;
    }

    fn anchor(&self, cfg: &AppConfig) -> Anchor {
        placement::select_target(self.displays.as_ref(), cfg)
            .map(|frame| placement::anchor_for(&frame, cfg))
            .unwrap_or_default()
    }
}

fn hide_delay(cfg: &AppConfig) -> Duration {
    Duration::from_millis(cfg.hide_delay_ms)
}
