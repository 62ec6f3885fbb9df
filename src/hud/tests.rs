//! Tests for the decision core: reconciler properties and engine lifecycle

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::{AppConfig, BrightnessDetectionMode};
use crate::overlay::console::ConsoleSurface;
use crate::overlay::placement::StaticDisplays;
use crate::overlay::Presenter;
use crate::sources::fake::{FakeHardware, FakeKeys, FakeNotifications};
use crate::sources::{Channel, KeyAction, KeyEvent};

use super::reconciler::{Reconciler, ReconcilerHandle};
use super::{HudDecision, HudEngine};

/// Let every ready task (actors, forwarders) run to quiescence on the
/// single-threaded test runtime.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn config_rx(cfg: AppConfig) -> (watch::Sender<Arc<AppConfig>>, watch::Receiver<Arc<AppConfig>>) {
    watch::channel(Arc::new(cfg))
}

fn key(channel: Channel, action: KeyAction) -> KeyEvent {
    KeyEvent {
        channel,
        action,
        fine_step: false,
        repeat: false,
        at: Instant::now(),
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<HudDecision>) -> Vec<HudDecision> {
    let mut out = Vec::new();
    while let Ok(d) = rx.try_recv() {
        out.push(d);
    }
    out
}

struct ReconcilerRig {
    hw: Arc<FakeHardware>,
    handle: ReconcilerHandle,
    decisions: mpsc::UnboundedReceiver<HudDecision>,
    config_tx: watch::Sender<Arc<AppConfig>>,
}

async fn spawn_reconciler(channel: Channel, cfg: AppConfig, volume: f32, brightness: f32) -> ReconcilerRig {
    let hw = FakeHardware::new(volume, brightness);
    let (config_tx, rx) = config_rx(cfg);
    let (tx, decisions) = mpsc::unbounded_channel();
    let handle = Reconciler::spawn(channel, hw.clone(), rx, tx);
    settle().await; // baseline read
    ReconcilerRig {
        hw,
        handle,
        decisions,
        config_tx,
    }
}

// ---------------------------------------------------------------------------
// Reconciler properties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn key_then_observation_emits_exactly_once() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    // Key lands before the hardware applied the step: nothing yet.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    // The step lands; the observation emits.
    rig.hw.set_volume(0.5625);
    rig.handle.observe(0);
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].channel, Channel::Volume);
    assert_eq!(decisions[0].value, 0.5625);
    assert!(!decisions[0].muted);
}

#[tokio::test(start_paused = true)]
async fn repeated_observations_of_same_value_are_noops() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    rig.hw.set_volume(0.5625);
    rig.handle.observe(0);
    settle().await;
    assert_eq!(drain(&mut rig.decisions).len(), 1);

    // Notification and poll tick both observe the already-applied change.
    rig.handle.observe(0);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());
}

#[tokio::test(start_paused = true)]
async fn ambient_volume_change_tracked_silently() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    // Another app dragged its own slider: no key press, no HUD.
    rig.hw.set_volume(0.75);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    // But state followed ground truth: the next key-driven change is
    // computed against 0.75, not 0.5.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    rig.hw.set_volume(0.8125);
    rig.handle.observe(0);
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].value, 0.8125);
}

#[tokio::test(start_paused = true)]
async fn recency_window_gates_observation_attribution() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    // Observation 1.5s after the key press: too old, suppressed.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    settle().await;
    tokio::time::advance(Duration::from_millis(1500)).await;
    rig.hw.set_volume(0.5625);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    // Observation 0.5s after a key press: attributed to the user.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    settle().await;
    tokio::time::advance(Duration::from_millis(500)).await;
    rig.hw.set_volume(0.625);
    rig.handle.observe(0);
    settle().await;
    assert_eq!(drain(&mut rig.decisions).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn boundary_forcing_at_maximum_volume() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 1.0, 0.5).await;

    // The press cannot change the hardware, so no observation will ever
    // arrive; the key path itself must emit.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].value, 1.0);
}

#[tokio::test(start_paused = true)]
async fn boundary_forcing_at_minimum_volume() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.0, 0.5).await;

    rig.handle.key(key(Channel::Volume, KeyAction::Decrease));
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].value, 0.0);

    // A press away from the boundary with no hardware change yet: quiet.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());
}

#[tokio::test(start_paused = true)]
async fn brightness_boundary_forcing_in_step_mode() {
    let cfg = AppConfig {
        brightness_detection_mode: BrightnessDetectionMode::StepBased,
        ..AppConfig::default()
    };
    let mut rig = spawn_reconciler(Channel::Brightness, cfg, 0.5, 1.0).await;

    // Hardware still reads 1.0; the only emission path is boundary
    // forcing, and the delta path must stay silent.
    rig.handle.key(key(Channel::Brightness, KeyAction::Increase));
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].channel, Channel::Brightness);
    assert_eq!(decisions[0].value, 1.0);

    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());
}

#[tokio::test(start_paused = true)]
async fn step_mode_accepts_exact_multiples_only() {
    let cfg = AppConfig {
        brightness_detection_mode: BrightnessDetectionMode::StepBased,
        ..AppConfig::default()
    };
    let mut rig = spawn_reconciler(Channel::Brightness, cfg, 0.5, 0.5).await;

    // One display step = 4 fine steps: a real key press, no key
    // observation needed.
    rig.hw.set_brightness(0.5625);
    rig.handle.observe(0);
    settle().await;
    assert_eq!(drain(&mut rig.decisions).len(), 1);

    // Ambient-light drift: off the step grid, suppressed.
    rig.hw.set_brightness(0.5625 + 0.031);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    // The silent update re-baselined: a clean single fine step from the
    // drifted value is accepted again.
    rig.hw.set_brightness(0.5625 + 0.031 + 0.015625);
    rig.handle.observe(0);
    settle().await;
    assert_eq!(drain(&mut rig.decisions).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn mute_toggle_emits_optimistically_without_double_fire() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    rig.handle.key(key(Channel::Volume, KeyAction::ToggleMute));
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].muted, "optimistic mute flip missing");

    // The OS applies the mute and the notification lands: state already
    // agrees, so no second HUD.
    rig.hw.set_muted(true);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_generation_observations_are_discarded() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    rig.handle.reset_device(1);
    settle().await;

    // A change arrives, but attributed to the pre-swap device identity.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    rig.hw.set_volume(0.5625);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    // The same change under the new identity emits exactly once.
    rig.handle.observe(1);
    settle().await;
    assert_eq!(drain(&mut rig.decisions).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn device_reset_rebaselines_silently() {
    let mut rig = spawn_reconciler(Channel::Volume, AppConfig::default(), 0.5, 0.5).await;

    // New device comes up at a very different volume.
    rig.hw.set_volume(0.25);
    rig.handle.reset_device(1);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty(), "device swap itself showed a HUD");

    // And deltas are computed against the new device's level.
    rig.handle.key(key(Channel::Volume, KeyAction::Increase));
    rig.hw.set_volume(0.3125);
    rig.handle.observe(1);
    settle().await;
    let decisions = drain(&mut rig.decisions);
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].value, 0.3125);
}

#[tokio::test(start_paused = true)]
async fn brightness_hud_can_be_disabled() {
    let cfg = AppConfig {
        brightness_hud_enabled: false,
        brightness_detection_mode: BrightnessDetectionMode::StepBased,
        ..AppConfig::default()
    };
    let mut rig = spawn_reconciler(Channel::Brightness, cfg, 0.5, 0.5).await;

    rig.hw.set_brightness(0.5625);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    rig.handle.key(key(Channel::Brightness, KeyAction::Increase));
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());
}

#[tokio::test(start_paused = true)]
async fn config_reload_applies_at_next_decision() {
    let cfg = AppConfig {
        brightness_detection_mode: BrightnessDetectionMode::Heuristic,
        ..AppConfig::default()
    };
    let mut rig = spawn_reconciler(Channel::Brightness, cfg, 0.5, 0.5).await;

    // Heuristic mode without a key press: exact step still suppressed.
    rig.hw.set_brightness(0.5625);
    rig.handle.observe(0);
    settle().await;
    assert!(drain(&mut rig.decisions).is_empty());

    // Hot-swap to step mode; no restart, next decision uses it.
    rig.config_tx
        .send(Arc::new(AppConfig {
            brightness_detection_mode: BrightnessDetectionMode::StepBased,
            ..AppConfig::default()
        }))
        .unwrap();
    rig.hw.set_brightness(0.625);
    rig.handle.observe(0);
    settle().await;
    assert_eq!(drain(&mut rig.decisions).len(), 1);
}

// ---------------------------------------------------------------------------
// Engine lifecycle
// ---------------------------------------------------------------------------

struct EngineRig {
    hw: Arc<FakeHardware>,
    notifications: Arc<FakeNotifications>,
    keys: Arc<FakeKeys>,
    surface: Arc<ConsoleSurface>,
    engine: HudEngine,
    _config_tx: watch::Sender<Arc<AppConfig>>,
}

fn engine_rig(cfg: AppConfig) -> EngineRig {
    let hw = FakeHardware::new(0.5, 0.5);
    let notifications = FakeNotifications::new();
    let keys = FakeKeys::new();
    let (config_tx, rx) = config_rx(cfg);

    let surface = Arc::new(ConsoleSurface::quiet());
    let displays = Arc::new(StaticDisplays::single(1440.0, 900.0));
    let presenter = Presenter::spawn(surface.clone(), displays, rx.clone());

    let engine = HudEngine::new(
        hw.clone(),
        notifications.clone(),
        keys.clone(),
        rx,
        presenter,
    );

    EngineRig {
        hw,
        notifications,
        keys,
        surface,
        engine,
        _config_tx: config_tx,
    }
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let rig = engine_rig(AppConfig::default());

    rig.engine.start().await.unwrap();
    settle().await;
    rig.engine.start().await.unwrap();
    settle().await;

    assert!(rig.engine.is_running().await);
    // The second start did not stack a second subscription.
    assert_eq!(rig.notifications.subscribe_count(), 1);

    rig.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn key_to_overlay_path_end_to_end() {
    let rig = engine_rig(AppConfig::default());
    rig.engine.start().await.unwrap();
    settle().await;

    // Key press, hardware applies, notification confirms.
    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    settle().await;
    rig.hw.set_volume(0.5625);
    rig.notifications.fire().await;
    settle().await;

    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn device_change_produces_one_decision_on_new_device_only() {
    let rig = engine_rig(AppConfig::default());
    rig.engine.start().await.unwrap();
    settle().await;

    // Swap the default output device.
    rig.notifications.swap_device().await;
    settle().await;
    assert_eq!(
        rig.notifications.subscribe_count(),
        2,
        "engine did not re-subscribe against the new device"
    );

    // A lingering notification from the old device identity: nothing.
    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    settle().await;
    rig.hw.set_volume(0.5625);
    rig.notifications.fire_stale(0).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 0);

    // The same change delivered by the new device: exactly one HUD.
    rig.notifications.fire().await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_silences_in_flight_events() {
    let rig = engine_rig(AppConfig::default());
    rig.engine.start().await.unwrap();
    settle().await;

    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    settle().await;
    rig.hw.set_volume(0.5625);
    rig.notifications.fire().await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
    rig.engine.stop().await;
    assert!(!rig.engine.is_running().await);

    // Events after teardown reach nothing.
    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    rig.hw.set_volume(0.75);
    rig.notifications.fire().await;
    settle().await;
    tokio::time::advance(Duration::from_millis(500)).await;
    settle().await;

    assert_eq!(rig.surface.rebuild_count(), 1, "emission observed after stop");
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_works() {
    let rig = engine_rig(AppConfig::default());
    rig.engine.start().await.unwrap();
    settle().await;
    rig.engine.stop().await;

    rig.engine.start().await.unwrap();
    settle().await;
    assert!(rig.engine.is_running().await);

    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    settle().await;
    rig.hw.set_volume(0.5625);
    rig.notifications.fire().await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn missing_permission_degrades_to_step_detection() {
    let cfg = AppConfig {
        brightness_detection_mode: BrightnessDetectionMode::StepBased,
        ..AppConfig::default()
    };
    let rig = engine_rig(cfg);
    rig.keys.set_permission(false);

    rig.engine.start().await.unwrap();
    settle().await;

    // Key presses go nowhere without the grant.
    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 0);

    // Brightness still works through the poll + step classifier.
    rig.hw.set_brightness(0.5625);
    tokio::time::advance(Duration::from_millis(150)).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn poll_drives_brightness_without_notifications() {
    let cfg = AppConfig {
        brightness_detection_mode: BrightnessDetectionMode::StepBased,
        ..AppConfig::default()
    };
    let rig = engine_rig(cfg);
    rig.engine.start().await.unwrap();
    settle().await;

    rig.hw.set_brightness(0.5 + 0.0625);
    tokio::time::advance(Duration::from_millis(250)).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    // Poll keeps observing the same value: no churn.
    tokio::time::advance(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn hardware_unavailability_is_not_fatal() {
    let rig = engine_rig(AppConfig::default());
    rig.hw.set_brightness_available(false);
    rig.hw.set_volume_available(false);

    rig.engine.start().await.unwrap();
    settle().await;

    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    rig.notifications.fire().await;
    tokio::time::advance(Duration::from_millis(300)).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 0);

    // Control comes back (device reconnected): the next key press finds
    // fresh ground truth and the HUD works again.
    rig.hw.set_volume_available(true);
    rig.keys.press(Channel::Volume, KeyAction::Increase).await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    // The confirming notification observes the same value: no churn.
    rig.notifications.fire().await;
    settle().await;
    assert_eq!(rig.surface.rebuild_count(), 1);

    rig.engine.stop().await;
}
