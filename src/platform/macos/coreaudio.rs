//! Core Audio HAL access: default-output volume/mute and change listeners
//!
//! Reads and writes go through `AudioObjectGetPropertyData` /
//! `AudioObjectSetPropertyData` against the current default output
//! device. Listeners are registered per device; the HAL keys them by
//! device identity, so after a default-device swap the old registrations
//! are dead weight and must be removed explicitly.

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use objc2_core_audio::{
    kAudioDevicePropertyMute, kAudioDevicePropertyVolumeScalar,
    kAudioHardwarePropertyDefaultOutputDevice, kAudioObjectPropertyScopeGlobal,
    kAudioObjectPropertyScopeOutput, AudioObjectAddPropertyListener, AudioObjectGetPropertyData,
    AudioObjectPropertyAddress, AudioObjectRemovePropertyListener, AudioObjectSetPropertyData,
};

use crate::sources::{
    Channel, ChangeNotifications, SourceEvent, SubscriptionHandle, Unavailable, VolumeReading,
};

/// System object ID for hardware-wide queries.
const SYSTEM_OBJECT: u32 = 1;

const NO_ERR: i32 = 0;

fn device_address() -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: kAudioHardwarePropertyDefaultOutputDevice,
        mScope: kAudioObjectPropertyScopeGlobal,
        mElement: 0,
    }
}

fn volume_address() -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: kAudioDevicePropertyVolumeScalar,
        mScope: kAudioObjectPropertyScopeOutput,
        mElement: 0,
    }
}

fn mute_address() -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: kAudioDevicePropertyMute,
        mScope: kAudioObjectPropertyScopeOutput,
        mElement: 0,
    }
}

/// Resolve the current default output device id.
fn default_device() -> Result<u32, Unavailable> {
    let mut device_id: u32 = 0;
    let mut size = mem::size_of::<u32>() as u32;
    let address = device_address();

    let status = unsafe {
        AudioObjectGetPropertyData(
            SYSTEM_OBJECT,
            &address,
            0,
            std::ptr::null(),
            &mut size,
            &mut device_id as *mut u32 as *mut c_void,
        )
    };
    if status != NO_ERR || device_id == 0 {
        return Err(Unavailable("no default output device"));
    }
    Ok(device_id)
}

/// Stateless reader/writer against whatever device is default right now.
pub struct DefaultOutputDevice;

impl DefaultOutputDevice {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self) -> Result<VolumeReading, Unavailable> {
        let device = default_device()?;

        let mut volume: f32 = 0.0;
        let mut size = mem::size_of::<f32>() as u32;
        let address = volume_address();
        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &address,
                0,
                std::ptr::null(),
                &mut size,
                &mut volume as *mut f32 as *mut c_void,
            )
        };
        if status != NO_ERR {
            return Err(Unavailable("device has no master volume control"));
        }

        // Mute is optional on some devices; treat failure as unmuted.
        let mut muted: u32 = 0;
        let mut size = mem::size_of::<u32>() as u32;
        let address = mute_address();
        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &address,
                0,
                std::ptr::null(),
                &mut size,
                &mut muted as *mut u32 as *mut c_void,
            )
        };

        Ok(VolumeReading {
            value: volume.clamp(0.0, 1.0),
            muted: status == NO_ERR && muted != 0,
        })
    }

    pub fn write_volume(&self, value: f32) -> Result<(), Unavailable> {
        let device = default_device()?;
        let volume: f32 = value;
        let address = volume_address();
        let status = unsafe {
            AudioObjectSetPropertyData(
                device,
                &address,
                0,
                std::ptr::null(),
                mem::size_of::<f32>() as u32,
                &volume as *const f32 as *const c_void,
            )
        };
        if status != NO_ERR {
            return Err(Unavailable("volume write rejected"));
        }
        Ok(())
    }

    pub fn write_mute(&self, muted: bool) -> Result<(), Unavailable> {
        let device = default_device()?;
        let flag: u32 = muted as u32;
        let address = mute_address();
        let status = unsafe {
            AudioObjectSetPropertyData(
                device,
                &address,
                0,
                std::ptr::null(),
                mem::size_of::<u32>() as u32,
                &flag as *const u32 as *const c_void,
            )
        };
        if status != NO_ERR {
            return Err(Unavailable("device has no mute control"));
        }
        Ok(())
    }
}

impl Default for DefaultOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// What a registered listener needs to deliver events. Looked up by id
/// inside the C callback; never a self pointer.
struct ListenerEntry {
    events: mpsc::Sender<SourceEvent>,
    generation: u32,
    device: u32,
    kind: ListenerKind,
}

#[derive(Clone, Copy, PartialEq)]
enum ListenerKind {
    VolumeOrMute,
    DefaultDevice,
}

static LISTENERS: Lazy<Mutex<HashMap<u64, ListenerEntry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// HAL property listener. Runs on a HAL-owned thread; looks up its id in
/// the registration table and forwards a payload-free event.
extern "C" fn property_listener(
    _object: u32,
    _num_addresses: u32,
    _addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> i32 {
    let id = client_data as u64;
    let listeners = LISTENERS.lock();
    let Some(entry) = listeners.get(&id) else {
        // Owner already torn down; stale delivery, drop it.
        return NO_ERR;
    };

    let event = match entry.kind {
        ListenerKind::VolumeOrMute => SourceEvent::Observation {
            channel: Channel::Volume,
            generation: entry.generation,
        },
        ListenerKind::DefaultDevice => SourceEvent::DefaultDeviceChanged,
    };

    // try_send: this thread has no runtime, and a full queue just means
    // the engine is already about to re-read ground truth anyway.
    if entry.events.try_send(event).is_err() {
        trace!("dropped HAL notification (engine queue full or closed)");
    }
    NO_ERR
}

/// `ChangeNotifications` backed by HAL property listeners.
///
/// One subscription installs volume + mute listeners on the current
/// default device and (exactly once per subscription) a default-device
/// listener on the system object.
pub struct CoreAudioNotifications {
    /// Listener ids per live subscription handle.
    subscriptions: Mutex<HashMap<u64, Vec<u64>>>,
    next_handle: AtomicU64,
}

impl CoreAudioNotifications {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn register(
        device: u32,
        address: AudioObjectPropertyAddress,
        kind: ListenerKind,
        generation: u32,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<u64> {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst);
        LISTENERS.lock().insert(
            id,
            ListenerEntry {
                events,
                generation,
                device,
                kind,
            },
        );

        let status = unsafe {
            AudioObjectAddPropertyListener(
                device,
                &address,
                Some(property_listener),
                id as *mut c_void,
            )
        };
        if status != NO_ERR {
            LISTENERS.lock().remove(&id);
            bail!("AudioObjectAddPropertyListener failed with status {status}");
        }
        Ok(id)
    }

    fn unregister(id: u64) {
        let Some(entry) = LISTENERS.lock().remove(&id) else {
            return;
        };
        let address = match entry.kind {
            ListenerKind::VolumeOrMute => volume_address(),
            ListenerKind::DefaultDevice => device_address(),
        };
        // Mute shares the volume listener id bookkeeping; remove both
        // registrations that were installed for the device.
        let status = unsafe {
            AudioObjectRemovePropertyListener(
                entry.device,
                &address,
                Some(property_listener),
                id as *mut c_void,
            )
        };
        if status != NO_ERR {
            debug!(id, status, "listener removal reported an error (device gone?)");
        }
        if entry.kind == ListenerKind::VolumeOrMute {
            let mute = mute_address();
            unsafe {
                AudioObjectRemovePropertyListener(
                    entry.device,
                    &mute,
                    Some(property_listener),
                    id as *mut c_void,
                );
            }
        }
    }
}

impl Default for CoreAudioNotifications {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeNotifications for CoreAudioNotifications {
    async fn subscribe(
        &self,
        generation: u32,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<SubscriptionHandle> {
        let device = default_device().map_err(|err| anyhow::anyhow!(err))?;

        let mut ids = Vec::with_capacity(3);

        // Volume and mute changes on the device itself.
        let volume_id = Self::register(
            device,
            volume_address(),
            ListenerKind::VolumeOrMute,
            generation,
            events.clone(),
        )?;
        // The mute selector is registered under the same table id so a
        // single unregister tears both down.
        let mute_status = unsafe {
            AudioObjectAddPropertyListener(
                device,
                &mute_address(),
                Some(property_listener),
                volume_id as *mut c_void,
            )
        };
        if mute_status != NO_ERR {
            debug!(device, "device has no mute selector; volume listener only");
        }
        ids.push(volume_id);

        // Default-device swaps on the system object.
        ids.push(Self::register(
            SYSTEM_OBJECT,
            device_address(),
            ListenerKind::DefaultDevice,
            generation,
            events,
        )?);

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(handle, ids);
        debug!(device, generation, handle, "HAL listeners installed");

        Ok(SubscriptionHandle(handle))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let ids = self.subscriptions.lock().remove(&handle.0);
        match ids {
            Some(ids) => {
                for id in ids {
                    Self::unregister(id);
                }
                debug!(handle = handle.0, "HAL listeners removed");
                Ok(())
            }
            None => {
                warn!(handle = handle.0, "unsubscribe for unknown handle ignored");
                Ok(())
            }
        }
    }
}
