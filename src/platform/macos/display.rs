//! Built-in display brightness and display layout queries
//!
//! Brightness goes through the DisplayServices framework, which only
//! answers for the built-in panel - external displays return a non-zero
//! status and surface as `Unavailable`. Layout changes are observed via
//! `CGDisplayRegisterReconfigurationCallback` and forwarded as
//! `DisplaysChanged` so the overlay can re-anchor.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::overlay::placement::{DisplayFrame, DisplayProvider};
use crate::sources::{SourceEvent, Unavailable};

#[repr(C)]
#[derive(Clone, Copy)]
struct CGPoint {
    x: f64,
    y: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CGSize {
    width: f64,
    height: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CGRect {
    origin: CGPoint,
    size: CGSize,
}

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGMainDisplayID() -> u32;
    fn CGGetActiveDisplayList(max: u32, displays: *mut u32, count: *mut u32) -> i32;
    fn CGDisplayBounds(display: u32) -> CGRect;
    fn CGDisplayRegisterReconfigurationCallback(
        callback: unsafe extern "C" fn(u32, u32, *mut c_void),
        user_info: *mut c_void,
    ) -> i32;
    fn CGDisplayRemoveReconfigurationCallback(
        callback: unsafe extern "C" fn(u32, u32, *mut c_void),
        user_info: *mut c_void,
    ) -> i32;
    fn CGEventCreate(source: *const c_void) -> *mut c_void;
    fn CGEventGetLocation(event: *mut c_void) -> CGPoint;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRelease(cf: *const c_void);
}

// Private framework, the same one the system brightness keys drive.
#[link(name = "DisplayServices", kind = "framework")]
extern "C" {
    fn DisplayServicesGetBrightness(display: u32, brightness: *mut f32) -> i32;
    fn DisplayServicesSetBrightness(display: u32, brightness: f32) -> i32;
}

const NO_ERR: i32 = 0;

/// Brightness control for the built-in panel.
pub struct BuiltinDisplay;

impl BuiltinDisplay {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self) -> Result<f32, Unavailable> {
        let mut brightness: f32 = 0.0;
        let status = unsafe { DisplayServicesGetBrightness(CGMainDisplayID(), &mut brightness) };
        if status != NO_ERR {
            return Err(Unavailable("display has no brightness control"));
        }
        Ok(brightness.clamp(0.0, 1.0))
    }

    pub fn write(&self, value: f32) -> Result<(), Unavailable> {
        let status = unsafe { DisplayServicesSetBrightness(CGMainDisplayID(), value) };
        if status != NO_ERR {
            return Err(Unavailable("brightness write rejected"));
        }
        Ok(())
    }
}

impl Default for BuiltinDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert CG bounds (top-left origin, y down) to bottom-left origin.
fn to_bottom_left(bounds: CGRect, global_bottom: f64) -> DisplayFrame {
    DisplayFrame {
        id: 0,
        x: bounds.origin.x as f32,
        y: (global_bottom - (bounds.origin.y + bounds.size.height)) as f32,
        width: bounds.size.width as f32,
        height: bounds.size.height as f32,
    }
}

fn active_frames() -> Vec<DisplayFrame> {
    const MAX_DISPLAYS: usize = 16;
    let mut ids = [0u32; MAX_DISPLAYS];
    let mut count: u32 = 0;
    let status =
        unsafe { CGGetActiveDisplayList(MAX_DISPLAYS as u32, ids.as_mut_ptr(), &mut count) };
    if status != NO_ERR {
        warn!(status, "CGGetActiveDisplayList failed");
        return Vec::new();
    }

    let bounds: Vec<(u32, CGRect)> = ids[..count as usize]
        .iter()
        .map(|&id| (id, unsafe { CGDisplayBounds(id) }))
        .collect();

    // The flip axis is the lowest bottom edge across all displays in CG
    // coordinates.
    let global_bottom = bounds
        .iter()
        .map(|(_, b)| b.origin.y + b.size.height)
        .fold(0.0f64, f64::max);

    bounds
        .into_iter()
        .map(|(id, b)| {
            let mut frame = to_bottom_left(b, global_bottom);
            frame.id = id;
            frame
        })
        .collect()
}

fn pointer_location() -> Option<(f32, f32)> {
    unsafe {
        let event = CGEventCreate(std::ptr::null());
        if event.is_null() {
            return None;
        }
        let loc = CGEventGetLocation(event);
        CFRelease(event);
        // Event location is top-left origin; flip against the layout.
        let frames = active_frames();
        let global_top = frames
            .iter()
            .map(|f| f.y + f.height)
            .fold(0.0f32, f32::max);
        Some((loc.x as f32, global_top - loc.y as f32))
    }
}

/// Live display layout.
pub struct ActiveDisplays;

impl ActiveDisplays {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ActiveDisplays {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayProvider for ActiveDisplays {
    fn primary(&self) -> Option<DisplayFrame> {
        let main = unsafe { CGMainDisplayID() };
        active_frames().into_iter().find(|f| f.id == main)
    }

    fn under_pointer(&self) -> Option<DisplayFrame> {
        let (px, py) = pointer_location()?;
        active_frames().into_iter().find(|f| f.contains(px, py))
    }
}

static RECONFIG_SINKS: Lazy<Mutex<HashMap<u64, mpsc::Sender<SourceEvent>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

// Reconfiguration flags from CoreGraphics.
const K_CG_DISPLAY_BEGIN_CONFIGURATION_FLAG: u32 = 1 << 0;

/// Called by the window server on layout changes. Ignores the "begin"
/// half of the transaction and fans the completed change out to every
/// registered sink by table id.
unsafe extern "C" fn reconfiguration_callback(_display: u32, flags: u32, _user_info: *mut c_void) {
    if flags & K_CG_DISPLAY_BEGIN_CONFIGURATION_FLAG != 0 {
        return;
    }
    trace!(flags, "display reconfiguration");
    for sink in RECONFIG_SINKS.lock().values() {
        let _ = sink.try_send(SourceEvent::DisplaysChanged);
    }
}

/// Forward display-configuration changes into the engine's event
/// channel. Returns a registration id for `stop_display_watch`.
pub fn start_display_watch(events: mpsc::Sender<SourceEvent>) -> Option<u64> {
    let id = NEXT_SINK_ID.fetch_add(1, Ordering::SeqCst);
    let first = {
        let mut sinks = RECONFIG_SINKS.lock();
        let first = sinks.is_empty();
        sinks.insert(id, events);
        first
    };

    if first {
        let status = unsafe {
            CGDisplayRegisterReconfigurationCallback(reconfiguration_callback, std::ptr::null_mut())
        };
        if status != NO_ERR {
            warn!(status, "failed to register display reconfiguration callback");
            RECONFIG_SINKS.lock().remove(&id);
            return None;
        }
        debug!("display reconfiguration watch installed");
    }
    Some(id)
}

/// Remove a registration; the OS callback is detached with the last one.
pub fn stop_display_watch(id: u64) {
    let empty = {
        let mut sinks = RECONFIG_SINKS.lock();
        sinks.remove(&id);
        sinks.is_empty()
    };
    if empty {
        unsafe {
            CGDisplayRemoveReconfigurationCallback(reconfiguration_callback, std::ptr::null_mut());
        }
        debug!("display reconfiguration watch removed");
    }
}
