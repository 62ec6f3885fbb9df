//! Event sources feeding the HUD engine
//!
//! Three independent sources observe the hardware: push notifications from
//! the audio HAL, a global media-key tap, and a periodic brightness poll.
//! All of them funnel `SourceEvent`s into the engine's dispatch loop; none
//! of them carry a value payload - the reconciler re-reads ground truth
//! through `HardwareReader` at decision time.

pub mod fake;
pub mod keymap;
pub mod poll;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The two independent HUD domains.
///
/// Channels share nothing but the overlay presenter; each has its own
/// reconciler, state, and detection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Volume,
    Brightness,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Volume => write!(f, "volume"),
            Channel::Brightness => write!(f, "brightness"),
        }
    }
}

/// Semantic direction of a media-key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Increase,
    Decrease,
    ToggleMute,
}

/// A decoded media-key press as delivered by the key source.
#[derive(Debug, Clone, Copy)]
pub struct KeyEvent {
    pub channel: Channel,
    pub action: KeyAction,
    /// Fine-step modifier combination held (1/64 steps instead of 1/16).
    pub fine_step: bool,
    /// Auto-repeat event from a held key.
    pub repeat: bool,
    pub at: Instant,
}

/// Current output volume and mute flag, as read from the hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeReading {
    pub value: f32,
    pub muted: bool,
}

/// The backing device does not support this control right now.
///
/// Expected and recoverable: a non-built-in display has no brightness
/// control, the default output device query can fail mid-swap. Callers
/// downgrade to "feature inactive" and retry on the next event.
#[derive(Debug, Clone, Copy, Error)]
#[error("hardware control unavailable: {0}")]
pub struct Unavailable(pub &'static str);

/// Failures starting the global key tap.
#[derive(Debug, Clone, Copy, Error)]
pub enum KeySourceError {
    /// The input-monitoring privacy grant is missing. Normal degraded
    /// mode, not fatal - boundary/key-press detection is simply off.
    #[error("input monitoring permission not granted")]
    PermissionDenied,
    /// The tap could not be installed for another reason.
    #[error("event tap installation failed")]
    TapFailed,
}

/// Payload-free event pushed into the engine's dispatch loop.
#[derive(Debug, Clone, Copy)]
pub enum SourceEvent {
    /// Something changed on this channel - re-query the reader.
    ///
    /// `generation` identifies the device subscription that produced the
    /// event; observations from a superseded generation are discarded
    /// rather than mis-attributed to the new device.
    Observation { channel: Channel, generation: u32 },
    /// The default output device was swapped (headphones in/out).
    DefaultDeviceChanged,
    /// A decoded media-key press.
    Key(KeyEvent),
    /// Display configuration changed; the overlay must re-anchor.
    DisplaysChanged,
}

/// Stateless queries against the audio/display subsystem.
///
/// Callable from any thread; every call is a bounded in-process query,
/// never network or disk. Writes exist for consuming-mode key handling,
/// where the tap performs the adjustment itself.
pub trait HardwareReader: Send + Sync {
    fn read_volume(&self) -> Result<VolumeReading, Unavailable>;
    fn read_brightness(&self) -> Result<f32, Unavailable>;
    fn write_volume(&self, value: f32) -> Result<(), Unavailable>;
    fn write_mute(&self, muted: bool) -> Result<(), Unavailable>;
    fn write_brightness(&self, value: f32) -> Result<(), Unavailable>;
}

/// Opaque handle for a live notification subscription.
///
/// Keyed by device identity under the hood: after a default-device change
/// the old handle is stale and must be torn down before subscribing
/// against the new device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(pub u64);

/// Push notifications for volume/mute changes and default-device swaps.
///
/// Delivered callbacks run on an arbitrary background context and carry
/// no payload. Implementations use interior mutability; all methods take
/// `&self` so the source can live behind an `Arc`.
#[async_trait]
pub trait ChangeNotifications: Send + Sync {
    /// Subscribe against the current default output device. Events are
    /// tagged with `generation` so stale deliveries can be dropped.
    async fn subscribe(
        &self,
        generation: u32,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<SubscriptionHandle>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;
}

/// Global media-key interception.
///
/// Wraps a privileged OS-level tap that can be force-disabled under
/// timeout and must re-enable itself without a restart. In consuming
/// mode the tap swallows the event and performs the hardware write, so
/// the OS overlay never appears.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Synchronous permission probe. Re-checked at every monitoring
    /// start; never cached as "denied forever".
    fn permission_granted(&self) -> bool;

    async fn start(&self, events: mpsc::Sender<SourceEvent>) -> Result<(), KeySourceError>;

    /// Idempotent. After return, no further key events are delivered.
    async fn stop(&self);
}
