//! Scriptable in-process sources
//!
//! Stand-ins for the platform backends, used by the test suite and by
//! `--watch` mode on platforms without the native integrations. State is
//! plain interior mutability so tests can drive the hardware from the
//! outside while the engine reads it like the real thing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    Channel, ChangeNotifications, HardwareReader, KeyAction, KeyEvent, KeySource, KeySourceError,
    SourceEvent, SubscriptionHandle, Unavailable, VolumeReading,
};

#[derive(Debug, Clone, Copy)]
struct FakeState {
    volume: f32,
    muted: bool,
    brightness: f32,
    volume_available: bool,
    brightness_available: bool,
}

/// Scriptable `HardwareReader`.
///
/// Writes are recorded (count + last value) so consuming-mode tests can
/// assert that the tap drove the hardware.
pub struct FakeHardware {
    state: Mutex<FakeState>,
    write_count: AtomicU64,
}

impl FakeHardware {
    pub fn new(volume: f32, brightness: f32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                volume,
                muted: false,
                brightness,
                volume_available: true,
                brightness_available: true,
            }),
            write_count: AtomicU64::new(0),
        })
    }

    pub fn set_volume(&self, value: f32) {
        self.state.lock().volume = value;
    }

    pub fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    pub fn set_brightness(&self, value: f32) {
        self.state.lock().brightness = value;
    }

    pub fn set_volume_available(&self, available: bool) {
        self.state.lock().volume_available = available;
    }

    pub fn set_brightness_available(&self, available: bool) {
        self.state.lock().brightness_available = available;
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }
}

impl HardwareReader for FakeHardware {
    fn read_volume(&self) -> Result<VolumeReading, Unavailable> {
        let s = self.state.lock();
        if !s.volume_available {
            return Err(Unavailable("no default output device"));
        }
        Ok(VolumeReading {
            value: s.volume,
            muted: s.muted,
        })
    }

    fn read_brightness(&self) -> Result<f32, Unavailable> {
        let s = self.state.lock();
        if !s.brightness_available {
            return Err(Unavailable("no built-in display"));
        }
        Ok(s.brightness)
    }

    fn write_volume(&self, value: f32) -> Result<(), Unavailable> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.state.lock().volume = value.clamp(0.0, 1.0);
        Ok(())
    }

    fn write_mute(&self, muted: bool) -> Result<(), Unavailable> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.state.lock().muted = muted;
        Ok(())
    }

    fn write_brightness(&self, value: f32) -> Result<(), Unavailable> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.state.lock().brightness = value.clamp(0.0, 1.0);
        Ok(())
    }
}

struct FakeSubscription {
    handle: SubscriptionHandle,
    generation: u32,
    events: mpsc::Sender<SourceEvent>,
}

/// Scriptable `ChangeNotifications`.
///
/// `fire()` simulates a HAL property-change callback on the current
/// subscription; `fire_stale()` simulates a notification that was queued
/// against a superseded device identity.
#[derive(Default)]
pub struct FakeNotifications {
    subscription: Mutex<Option<FakeSubscription>>,
    next_handle: AtomicU64,
    subscribe_count: AtomicU32,
}

impl FakeNotifications {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times subscribe() was called (device-change reconciliation
    /// re-subscribes, so tests can count re-registrations).
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Push a volume-change notification tagged with the live generation.
    pub async fn fire(&self) {
        let (events, generation) = {
            let sub = self.subscription.lock();
            match sub.as_ref() {
                Some(s) => (s.events.clone(), s.generation),
                None => return,
            }
        };
        let _ = events
            .send(SourceEvent::Observation {
                channel: Channel::Volume,
                generation,
            })
            .await;
    }

    /// Push a notification attributed to an old device generation.
    pub async fn fire_stale(&self, generation: u32) {
        let events = {
            let sub = self.subscription.lock();
            match sub.as_ref() {
                Some(s) => s.events.clone(),
                None => return,
            }
        };
        let _ = events
            .send(SourceEvent::Observation {
                channel: Channel::Volume,
                generation,
            })
            .await;
    }

    /// Simulate a default-output-device swap.
    pub async fn swap_device(&self) {
        let events = {
            let sub = self.subscription.lock();
            match sub.as_ref() {
                Some(s) => s.events.clone(),
                None => return,
            }
        };
        let _ = events.send(SourceEvent::DefaultDeviceChanged).await;
    }
}

#[async_trait]
impl ChangeNotifications for FakeNotifications {
    async fn subscribe(
        &self,
        generation: u32,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        *self.subscription.lock() = Some(FakeSubscription {
            handle,
            generation,
            events,
        });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let mut sub = self.subscription.lock();
        if sub.as_ref().map(|s| s.handle) == Some(handle) {
            *sub = None;
        }
        Ok(())
    }
}

/// Scriptable `KeySource`. Tests call `press()` to inject decoded keys.
pub struct FakeKeys {
    events: Mutex<Option<mpsc::Sender<SourceEvent>>>,
    permission: Mutex<bool>,
}

impl FakeKeys {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(None),
            permission: Mutex::new(true),
        })
    }

    pub fn set_permission(&self, granted: bool) {
        *self.permission.lock() = granted;
    }

    pub async fn press(&self, channel: Channel, action: KeyAction) {
        self.press_with(channel, action, false, false).await;
    }

    pub async fn press_with(&self, channel: Channel, action: KeyAction, fine: bool, repeat: bool) {
        let events = {
            let guard = self.events.lock();
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return,
            }
        };
        let _ = events
            .send(SourceEvent::Key(KeyEvent {
                channel,
                action,
                fine_step: fine,
                repeat,
                at: Instant::now(),
            }))
            .await;
    }
}

#[async_trait]
impl KeySource for FakeKeys {
    fn permission_granted(&self) -> bool {
        *self.permission.lock()
    }

    async fn start(&self, events: mpsc::Sender<SourceEvent>) -> Result<(), KeySourceError> {
        if !self.permission_granted() {
            return Err(KeySourceError::PermissionDenied);
        }
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn stop(&self) {
        *self.events.lock() = None;
    }
}
