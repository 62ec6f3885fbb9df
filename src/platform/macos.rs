//! macOS backends: Core Audio HAL, display brightness, media-key tap
//!
//! All callback-driven APIs here route through explicit registration
//! tables keyed by plain integer ids instead of passing `self` pointers
//! across the C boundary, so a callback can never outlive its owner:
//! an id that is no longer in the table is simply ignored.

pub mod coreaudio;
pub mod display;
pub mod tap;

use crate::sources::{HardwareReader, Unavailable, VolumeReading};

/// Composite reader over the default audio output device and the
/// built-in display.
pub struct SystemHardware {
    audio: coreaudio::DefaultOutputDevice,
    display: display::BuiltinDisplay,
}

impl SystemHardware {
    pub fn new() -> Self {
        Self {
            audio: coreaudio::DefaultOutputDevice::new(),
            display: display::BuiltinDisplay::new(),
        }
    }
}

impl Default for SystemHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareReader for SystemHardware {
    fn read_volume(&self) -> Result<VolumeReading, Unavailable> {
        self.audio.read()
    }

    fn read_brightness(&self) -> Result<f32, Unavailable> {
        self.display.read()
    }

    fn write_volume(&self, value: f32) -> Result<(), Unavailable> {
        self.audio.write_volume(value.clamp(0.0, 1.0))
    }

    fn write_mute(&self, muted: bool) -> Result<(), Unavailable> {
        self.audio.write_mute(muted)
    }

    fn write_brightness(&self, value: f32) -> Result<(), Unavailable> {
        self.display.write(value.clamp(0.0, 1.0))
    }
}
