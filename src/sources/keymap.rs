//! Media-key decode table
//!
//! Maps the raw system-defined key codes carried by NX_SYSDEFINED events
//! to semantic `KeyEvent`s. The mapping is a closed enum so a new key
//! code cannot silently fall through half the match sites.

use tokio::time::Instant;

use super::{Channel, KeyAction, KeyEvent};

// Raw key codes from IOKit's ev_keymap.h. Hardware constants; do not change.
pub const NX_KEYTYPE_SOUND_UP: u16 = 0;
pub const NX_KEYTYPE_SOUND_DOWN: u16 = 1;
pub const NX_KEYTYPE_BRIGHTNESS_UP: u16 = 2;
pub const NX_KEYTYPE_BRIGHTNESS_DOWN: u16 = 3;
pub const NX_KEYTYPE_MUTE: u16 = 7;

/// The media keys this daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKey {
    SoundUp,
    SoundDown,
    Mute,
    BrightnessUp,
    BrightnessDown,
}

impl MediaKey {
    /// Decode a raw NX key code. Unknown codes (play/pause, eject,
    /// keyboard illumination, ...) return `None` and pass through.
    pub fn from_raw(code: u16) -> Option<Self> {
        match code {
            NX_KEYTYPE_SOUND_UP => Some(MediaKey::SoundUp),
            NX_KEYTYPE_SOUND_DOWN => Some(MediaKey::SoundDown),
            NX_KEYTYPE_MUTE => Some(MediaKey::Mute),
            NX_KEYTYPE_BRIGHTNESS_UP => Some(MediaKey::BrightnessUp),
            NX_KEYTYPE_BRIGHTNESS_DOWN => Some(MediaKey::BrightnessDown),
            _ => None,
        }
    }

    pub fn channel(self) -> Channel {
        match self {
            MediaKey::SoundUp | MediaKey::SoundDown | MediaKey::Mute => Channel::Volume,
            MediaKey::BrightnessUp | MediaKey::BrightnessDown => Channel::Brightness,
        }
    }

    pub fn action(self) -> KeyAction {
        match self {
            MediaKey::SoundUp | MediaKey::BrightnessUp => KeyAction::Increase,
            MediaKey::SoundDown | MediaKey::BrightnessDown => KeyAction::Decrease,
            MediaKey::Mute => KeyAction::ToggleMute,
        }
    }
}

/// Fine-step mode is Shift+Option, matching the native key behavior.
pub fn fine_step_held(shift: bool, option: bool) -> bool {
    shift && option
}

/// Decode a raw key-down into a `KeyEvent`, or `None` for keys we
/// don't handle.
pub fn decode(code: u16, shift: bool, option: bool, repeat: bool, at: Instant) -> Option<KeyEvent> {
    let key = MediaKey::from_raw(code)?;
    Some(KeyEvent {
        channel: key.channel(),
        action: key.action(),
        fine_step: fine_step_held(shift, option),
        repeat,
        at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_handled_key() {
        let cases = [
            (NX_KEYTYPE_SOUND_UP, Channel::Volume, KeyAction::Increase),
            (NX_KEYTYPE_SOUND_DOWN, Channel::Volume, KeyAction::Decrease),
            (NX_KEYTYPE_MUTE, Channel::Volume, KeyAction::ToggleMute),
            (NX_KEYTYPE_BRIGHTNESS_UP, Channel::Brightness, KeyAction::Increase),
            (
                NX_KEYTYPE_BRIGHTNESS_DOWN,
                Channel::Brightness,
                KeyAction::Decrease,
            ),
        ];

        for (code, channel, action) in cases {
            let ev = decode(code, false, false, false, Instant::now()).unwrap();
            assert_eq!(ev.channel, channel);
            assert_eq!(ev.action, action);
            assert!(!ev.fine_step);
        }
    }

    #[test]
    fn unknown_codes_pass_through() {
        // Play/pause (16), eject (14), illumination up (21)
        for code in [14u16, 16, 21, 22, 0xFF] {
            assert!(MediaKey::from_raw(code).is_none());
            assert!(decode(code, false, false, false, Instant::now()).is_none());
        }
    }

    #[test]
    fn fine_step_requires_both_modifiers() {
        assert!(fine_step_held(true, true));
        assert!(!fine_step_held(true, false));
        assert!(!fine_step_held(false, true));
        assert!(!fine_step_held(false, false));

        let ev = decode(NX_KEYTYPE_SOUND_UP, true, true, false, Instant::now()).unwrap();
        assert!(ev.fine_step);
    }

    #[test]
    fn repeat_flag_carried_through() {
        let ev = decode(NX_KEYTYPE_BRIGHTNESS_UP, false, false, true, Instant::now()).unwrap();
        assert!(ev.repeat);
    }
}
