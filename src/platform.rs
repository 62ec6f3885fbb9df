//! Platform backend selection
//!
//! The decision core never names an OS directly; it consumes the traits
//! in `sources` and `overlay::placement`. This module hands out the
//! native implementations where they exist. On other platforms the
//! constructors return `None` and callers fall back to the in-process
//! fakes (`--watch` mode) or refuse to start.

#[cfg(target_os = "macos")]
pub mod macos;

use std::sync::Arc;

use crate::overlay::placement::DisplayProvider;
use crate::sources::{ChangeNotifications, HardwareReader, KeySource};

/// Native volume/mute/brightness reader, if this platform has one.
pub fn native_hardware() -> Option<Arc<dyn HardwareReader>> {
    #[cfg(target_os = "macos")]
    {
        Some(Arc::new(macos::SystemHardware::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        None
    }
}

/// Native HAL property-change notifications.
pub fn native_notifications() -> Option<Arc<dyn ChangeNotifications>> {
    #[cfg(target_os = "macos")]
    {
        Some(Arc::new(macos::coreaudio::CoreAudioNotifications::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        None
    }
}

/// Native global media-key tap.
///
/// `consume` selects intercept-and-drive mode: the tap swallows the key
/// event and applies the adjustment through `hardware` itself.
pub fn native_keys(
    consume: bool,
    hardware: Arc<dyn HardwareReader>,
) -> Option<Arc<dyn KeySource>> {
    #[cfg(target_os = "macos")]
    {
        Some(Arc::new(macos::tap::MediaKeyTap::new(consume, hardware)))
    }
    #[cfg(not(target_os = "macos"))]
    {
        let _ = (consume, hardware);
        None
    }
}

/// Native display layout provider.
pub fn native_displays() -> Option<Arc<dyn DisplayProvider>> {
    #[cfg(target_os = "macos")]
    {
        Some(Arc::new(macos::display::ActiveDisplays::new()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        None
    }
}
