//! Global media-key tap
//!
//! A CGEventTap on NX_SYSDEFINED events intercepts the volume,
//! brightness, and mute keys before the system handles them. The tap is
//! privileged: it needs the input-monitoring grant, and the OS can
//! force-disable it under timeout, in which case the callback re-enables
//! it on the spot - recovery must be immediate or key events are lost.
//!
//! In consuming mode the callback swallows the event and performs the
//! hardware adjustment itself, so the system's own overlay never fires.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use objc2::msg_send;
use objc2::runtime::AnyObject;
use objc2::ClassType;
use objc2_app_kit::NSEvent;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::hud::quantize::{DISPLAY_STEP, FINE_STEP};
use crate::sources::keymap;
use crate::sources::{
    Channel, HardwareReader, KeyAction, KeySource, KeySourceError, SourceEvent,
};

type CGEventRef = *mut c_void;
type CFMachPortRef = *mut c_void;
type CFRunLoopRef = *mut c_void;
type CFRunLoopSourceRef = *mut c_void;

type CGEventTapCallBack =
    unsafe extern "C" fn(*mut c_void, u32, CGEventRef, *mut c_void) -> CGEventRef;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: u32,
        place: u32,
        options: u32,
        events_of_interest: u64,
        callback: CGEventTapCallBack,
        user_info: *mut c_void,
    ) -> CFMachPortRef;
    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    fn CGEventGetFlags(event: CGEventRef) -> u64;
    fn CGPreflightListenEventAccess() -> bool;
    fn CGRequestListenEventAccess() -> bool;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortCreateRunLoopSource(
        allocator: *const c_void,
        port: CFMachPortRef,
        order: isize,
    ) -> CFRunLoopSourceRef;
    fn CFRunLoopGetCurrent() -> CFRunLoopRef;
    fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: *const c_void);
    fn CFRunLoopRun();
    fn CFRunLoopStop(rl: CFRunLoopRef);
    fn CFRelease(cf: *const c_void);
    static kCFRunLoopCommonModes: *const c_void;
}

// kCGSessionEventTap / kCGHeadInsertEventTap
const SESSION_EVENT_TAP: u32 = 1;
const HEAD_INSERT: u32 = 0;
// kCGEventTapOptionDefault (active: may consume) / ...ListenOnly
const TAP_OPTION_DEFAULT: u32 = 0;
const TAP_OPTION_LISTEN_ONLY: u32 = 1;

/// NX_SYSDEFINED: system-defined events carry the media keys.
const NX_SYSDEFINED: u32 = 14;
/// NSEvent subtype for aux control buttons (media keys).
const NX_SUBTYPE_AUX_CONTROL_BUTTONS: i16 = 8;

// Tap lifecycle pseudo-events.
const TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFFFFFE;
const TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFFFFFF;

// CGEventFlags
const FLAG_SHIFT: u64 = 1 << 17;
const FLAG_OPTION: u64 = 1 << 19;

// Key state nibble inside data1's keyFlags.
const KEY_STATE_DOWN: isize = 0x0A;

/// Raw pointer that crosses the spawn boundary into the tap thread.
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}

/// Everything the C callback needs, looked up by table id - never a
/// self pointer across the FFI boundary.
struct TapEntry {
    events: mpsc::Sender<SourceEvent>,
    hardware: Arc<dyn HardwareReader>,
    consume: bool,
    port: SendPtr,
}

static TAPS: Lazy<Mutex<HashMap<usize, TapEntry>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_TAP_ID: AtomicUsize = AtomicUsize::new(1);

/// Decode one NX_SYSDEFINED event via NSEvent and forward it.
/// Returns true when the event should be swallowed.
unsafe fn handle_media_key(entry: &TapEntry, event: CGEventRef) -> bool {
    let cls = NSEvent::class();
    let ns_event: *mut AnyObject = msg_send![cls, eventWithCGEvent: event];
    if ns_event.is_null() {
        return false;
    }

    let subtype: i16 = msg_send![&*ns_event, subtype];
    if subtype != NX_SUBTYPE_AUX_CONTROL_BUTTONS {
        return false;
    }

    let data1: isize = msg_send![&*ns_event, data1];
    let code = ((data1 & 0xFFFF_0000) >> 16) as u16;
    let key_flags = data1 & 0xFFFF;
    let down = (key_flags & 0xFF00) >> 8 == KEY_STATE_DOWN;
    let repeat = key_flags & 0x1 != 0;

    let flags = CGEventGetFlags(event);
    let shift = flags & FLAG_SHIFT != 0;
    let option = flags & FLAG_OPTION != 0;

    let Some(key) = keymap::decode(code, shift, option, repeat, Instant::now()) else {
        // Not one of ours (play/pause, eject, ...): always pass through.
        return false;
    };

    if !down {
        // Key-up still belongs to us in consuming mode, but carries no
        // action.
        return entry.consume;
    }

    trace!(?key, "media key intercepted");
    if entry.events.try_send(SourceEvent::Key(key)).is_err() {
        trace!("dropped key event (engine queue full or closed)");
    }

    if entry.consume {
        apply_key(entry.hardware.as_ref(), key.channel, key.action, key.fine_step);
        return true;
    }
    false
}

/// Consuming mode: perform the adjustment the OS would have done.
fn apply_key(hardware: &dyn HardwareReader, channel: Channel, action: KeyAction, fine: bool) {
    let step = if fine { FINE_STEP } else { DISPLAY_STEP };
    let result = match (channel, action) {
        (Channel::Volume, KeyAction::ToggleMute) => hardware
            .read_volume()
            .and_then(|r| hardware.write_mute(!r.muted)),
        (Channel::Volume, KeyAction::Increase) => hardware
            .read_volume()
            .and_then(|r| hardware.write_volume((r.value + step).clamp(0.0, 1.0))),
        (Channel::Volume, KeyAction::Decrease) => hardware
            .read_volume()
            .and_then(|r| hardware.write_volume((r.value - step).clamp(0.0, 1.0))),
        (Channel::Brightness, KeyAction::Increase) => hardware
            .read_brightness()
            .and_then(|b| hardware.write_brightness((b + step).clamp(0.0, 1.0))),
        (Channel::Brightness, KeyAction::Decrease) => hardware
            .read_brightness()
            .and_then(|b| hardware.write_brightness((b - step).clamp(0.0, 1.0))),
        (Channel::Brightness, KeyAction::ToggleMute) => Ok(()),
    };
    if let Err(err) = result {
        debug!(%err, "consuming-mode hardware write skipped");
    }
}

unsafe extern "C" fn tap_callback(
    _proxy: *mut c_void,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    let id = user_info as usize;
    let taps = TAPS.lock();
    let Some(entry) = taps.get(&id) else {
        // Owner torn down; never touch a dead registration.
        return event;
    };

    match event_type {
        TAP_DISABLED_BY_TIMEOUT | TAP_DISABLED_BY_USER_INPUT => {
            // Unconditional, immediate, no retry ceiling: a disabled tap
            // silently loses every key press until re-enabled.
            warn!("event tap disabled by the OS; re-enabling");
            CGEventTapEnable(entry.port.0, true);
            event
        }
        NX_SYSDEFINED => {
            if handle_media_key(entry, event) {
                std::ptr::null_mut()
            } else {
                event
            }
        }
        _ => event,
    }
}

struct TapState {
    id: usize,
    runloop: SendPtr,
    thread: JoinHandle<()>,
}

/// `KeySource` backed by a session event tap on its own run-loop thread.
pub struct MediaKeyTap {
    consume: bool,
    hardware: Arc<dyn HardwareReader>,
    state: Mutex<Option<TapState>>,
}

impl MediaKeyTap {
    pub fn new(consume: bool, hardware: Arc<dyn HardwareReader>) -> Self {
        Self {
            consume,
            hardware,
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl KeySource for MediaKeyTap {
    fn permission_granted(&self) -> bool {
        unsafe { CGPreflightListenEventAccess() }
    }

    async fn start(&self, events: mpsc::Sender<SourceEvent>) -> Result<(), KeySourceError> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Ok(());
        }

        if !self.permission_granted() {
            // Triggers the system prompt on first refusal; the answer is
            // picked up at the next monitoring start.
            unsafe { CGRequestListenEventAccess() };
            return Err(KeySourceError::PermissionDenied);
        }

        let id = NEXT_TAP_ID.fetch_add(1, Ordering::SeqCst);
        let consume = self.consume;
        let hardware = self.hardware.clone();

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<SendPtr, KeySourceError>>();

        let thread = std::thread::Builder::new()
            .name("machud-event-tap".into())
            .spawn(move || unsafe {
                let options = if consume {
                    TAP_OPTION_DEFAULT
                } else {
                    TAP_OPTION_LISTEN_ONLY
                };
                let port = CGEventTapCreate(
                    SESSION_EVENT_TAP,
                    HEAD_INSERT,
                    options,
                    1u64 << NX_SYSDEFINED,
                    tap_callback,
                    id as *mut c_void,
                );
                if port.is_null() {
                    let _ = ready_tx.send(Err(KeySourceError::TapFailed));
                    return;
                }

                TAPS.lock().insert(
                    id,
                    TapEntry {
                        events,
                        hardware,
                        consume,
                        port: SendPtr(port),
                    },
                );

                let source = CFMachPortCreateRunLoopSource(std::ptr::null(), port, 0);
                let runloop = CFRunLoopGetCurrent();
                CFRunLoopAddSource(runloop, source, kCFRunLoopCommonModes);
                CGEventTapEnable(port, true);

                let _ = ready_tx.send(Ok(SendPtr(runloop)));
                CFRunLoopRun();

                // stop() pulled the plug; release our toys.
                TAPS.lock().remove(&id);
                CGEventTapEnable(port, false);
                CFRelease(source);
                CFRelease(port);
            })
            .map_err(|_| KeySourceError::TapFailed)?;

        match ready_rx.recv() {
            Ok(Ok(runloop)) => {
                info!(consume = self.consume, "media-key event tap running");
                *state = Some(TapState {
                    id,
                    runloop,
                    thread,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(KeySourceError::TapFailed),
        }
    }

    async fn stop(&self) {
        let taken = self.state.lock().take();
        let Some(tap) = taken else {
            return;
        };
        // Deregister first so an event already in the callback finds a
        // dead table entry instead of a closing channel.
        TAPS.lock().remove(&tap.id);
        unsafe { CFRunLoopStop(tap.runloop.0) };
        let _ = tap.thread.join();
        debug!("media-key event tap stopped");
    }
}
