//! Per-channel signal reconciler
//!
//! The decision core. One reconciler actor per channel consumes push
//! notifications, poll ticks, and key events, re-reads ground truth
//! through the hardware reader, and decides whether the overlay should
//! appear. All state for a channel is owned by its actor and mutated
//! only inside the actor's run loop, so concurrent notification + poll +
//! key arrivals cannot lose updates.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::{AppConfig, BrightnessDetectionMode};
use crate::sources::{Channel, HardwareReader, KeyAction, KeyEvent};

use super::policy::DetectionPolicy;
use super::quantize::{changed, quantize_fine, LOWER_BOUNDARY, UPPER_BOUNDARY, VALUE_EPSILON};
use super::HudDecision;

/// Commands accepted by a reconciler actor. All fire-and-forget.
#[derive(Debug)]
pub enum ReconcilerCommand {
    /// A payload-free "something changed" signal from a notification or
    /// poll tick. Carries the device generation it was queued under.
    Observe { generation: u32 },
    /// A decoded media-key press.
    Key(KeyEvent),
    /// The backing device was swapped. Discard the old baseline and
    /// re-read silently against the new device.
    ResetDevice { generation: u32 },
    Shutdown,
}

/// Handle for feeding events into a reconciler.
///
/// Sends never block and never fail loudly; once the actor is gone the
/// events have nowhere to go by design.
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<ReconcilerCommand>,
}

impl ReconcilerHandle {
    pub fn observe(&self, generation: u32) {
        let _ = self.tx.send(ReconcilerCommand::Observe { generation });
    }

    pub fn key(&self, event: KeyEvent) {
        let _ = self.tx.send(ReconcilerCommand::Key(event));
    }

    pub fn reset_device(&self, generation: u32) {
        let _ = self.tx.send(ReconcilerCommand::ResetDevice { generation });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ReconcilerCommand::Shutdown);
    }
}

/// Last-known ground truth for one channel.
struct ChannelState {
    /// Raw value from the most recent read. Kept unquantized: the step
    /// classifier needs to see that ambient drift lands off-grid, which
    /// snapping the reading would erase. Only emitted decision values
    /// are quantized.
    last_value: f32,
    /// Volume only; brightness has no mute flag.
    last_muted: bool,
    last_key_at: Option<Instant>,
    /// Tracked so availability flips log once on the edge, not per poll.
    available: bool,
}

pub struct Reconciler {
    channel: Channel,
    hardware: Arc<dyn HardwareReader>,
    config: watch::Receiver<Arc<AppConfig>>,
    decisions: mpsc::UnboundedSender<HudDecision>,
    rx: mpsc::UnboundedReceiver<ReconcilerCommand>,
    state: ChannelState,
    generation: u32,
}

impl Reconciler {
    /// Spawn a reconciler for `channel` and return its handle.
    ///
    /// The actor seeds its baseline from a first hardware read so the
    /// initial observed value does not register as a change.
    pub fn spawn(
        channel: Channel,
        hardware: Arc<dyn HardwareReader>,
        config: watch::Receiver<Arc<AppConfig>>,
        decisions: mpsc::UnboundedSender<HudDecision>,
    ) -> ReconcilerHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut actor = Reconciler {
            channel,
            hardware,
            config,
            decisions,
            rx,
            state: ChannelState {
                last_value: 0.0,
                last_muted: false,
                last_key_at: None,
                available: true,
            },
            generation: 0,
        };

        tokio::spawn(async move {
            if let Ok((value, muted)) = actor.read() {
                actor.state.last_value = value;
                actor.state.last_muted = muted;
            }
            actor.run().await;
        });

        ReconcilerHandle { tx }
    }

    async fn run(mut self) {
        debug!(channel = %self.channel, "reconciler started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                ReconcilerCommand::Observe { generation } => {
                    if generation != self.generation {
                        trace!(
                            channel = %self.channel,
                            stale = generation,
                            current = self.generation,
                            "dropped observation from superseded device"
                        );
                        continue;
                    }
                    self.handle_observation();
                }
                ReconcilerCommand::Key(event) => self.handle_key(event),
                ReconcilerCommand::ResetDevice { generation } => {
                    self.generation = generation;
                    // Re-baseline silently; the swap itself is not a user
                    // volume change.
                    if let Ok((value, muted)) = self.read() {
                        self.state.last_value = value;
                        self.state.last_muted = muted;
                    }
                    debug!(channel = %self.channel, generation, "rebased onto new device");
                }
                ReconcilerCommand::Shutdown => break,
            }
        }

        debug!(channel = %self.channel, "reconciler stopped");
    }

    /// Read raw ground truth with edge-triggered availability logging.
    fn read(&mut self) -> Result<(f32, bool), ()> {
        let result = match self.channel {
            Channel::Volume => self
                .hardware
                .read_volume()
                .map(|r| (r.value.clamp(0.0, 1.0), r.muted)),
            Channel::Brightness => self
                .hardware
                .read_brightness()
                .map(|b| (b.clamp(0.0, 1.0), false)),
        };

        match result {
            Ok(reading) => {
                if !self.state.available {
                    info!(channel = %self.channel, "hardware control available again");
                    self.state.available = true;
                }
                Ok(reading)
            }
            Err(err) => {
                if self.state.available {
                    info!(channel = %self.channel, %err, "hardware control unavailable; HUD inactive for this channel");
                    self.state.available = false;
                }
                Err(())
            }
        }
    }

    /// A value observation: push notification or poll tick.
    fn handle_observation(&mut self) {
        let Ok((value, muted)) = self.read() else {
            return;
        };

        let delta = value - self.state.last_value;
        let mute_changed = self.channel == Channel::Volume && muted != self.state.last_muted;

        // Idempotent by construction: a notification and a poll tick that
        // observe the same applied change differ by less than epsilon.
        if delta.abs() <= VALUE_EPSILON && !mute_changed {
            return;
        }

        let cfg = self.config.borrow().clone();
        let key_age = self.state.last_key_at.map(|at| at.elapsed());
        let accepted = self.policy(&cfg).accepts(delta, key_age);

        // State always tracks ground truth so the next delta is computed
        // against reality, emitted or not.
        self.state.last_value = value;
        self.state.last_muted = muted;

        if accepted && self.emission_enabled(&cfg) {
            self.emit(value, muted);
        } else {
            debug!(
                channel = %self.channel,
                delta,
                "change classified as ambient; state updated silently"
            );
        }
    }

    /// A raw key press. Re-reads immediately instead of waiting for the
    /// next poll or notification, to keep key-to-HUD latency low.
    fn handle_key(&mut self, event: KeyEvent) {
        // Unconditional: this timestamp is what the recency policy reads.
        self.state.last_key_at = Some(event.at);

        let cfg = self.config.borrow().clone();
        let Ok((value, muted)) = self.read() else {
            return;
        };

        match event.action {
            KeyAction::ToggleMute => {
                // Optimistic flip for responsiveness; the hardware write
                // happens in the tap (driving mode) or in the OS
                // (passthrough), and the next notification reconciles.
                let muted_now = !muted;
                self.state.last_value = value;
                self.state.last_muted = muted_now;
                if self.emission_enabled(&cfg) {
                    self.emit(value, muted_now);
                }
            }
            KeyAction::Increase | KeyAction::Decrease => {
                let at_boundary = match event.action {
                    KeyAction::Increase => value >= UPPER_BOUNDARY,
                    _ => value <= LOWER_BOUNDARY,
                };

                if at_boundary && !changed(value, self.state.last_value) {
                    // Boundary forcing: the press produced no hardware
                    // change, so no observation event will ever arrive.
                    // This is the only emission path without one.
                    self.state.last_value = value;
                    if self.emission_enabled(&cfg) {
                        self.emit(value, muted);
                    }
                } else if changed(value, self.state.last_value)
                    || (self.channel == Channel::Volume && muted != self.state.last_muted)
                {
                    // The step already landed; emit now rather than on
                    // the trailing notification.
                    self.state.last_value = value;
                    self.state.last_muted = muted;
                    if self.emission_enabled(&cfg) {
                        self.emit(value, muted);
                    }
                }
                // Otherwise the change has not landed yet; the
                // notification or next poll tick arrives well inside the
                // recency window and emits through handle_observation.
            }
        }
    }

    fn policy(&self, cfg: &AppConfig) -> DetectionPolicy {
        match self.channel {
            Channel::Volume => DetectionPolicy::KeyRecency,
            Channel::Brightness => match cfg.brightness_detection_mode {
                BrightnessDetectionMode::Heuristic => DetectionPolicy::KeyRecency,
                BrightnessDetectionMode::StepBased => DetectionPolicy::StepQuantized,
            },
        }
    }

    fn emission_enabled(&self, cfg: &AppConfig) -> bool {
        self.channel != Channel::Brightness || cfg.brightness_hud_enabled
    }

    fn emit(&self, value: f32, muted: bool) {
        // Decisions carry grid values; raw readings stay internal.
        let value = quantize_fine(value);
        trace!(channel = %self.channel, value, muted, "HUD decision");
        let _ = self.decisions.send(HudDecision {
            channel: self.channel,
            value,
            muted,
            at: Instant::now(),
        });
    }
}
