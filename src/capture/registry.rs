//! Thread-safe table of open capture devices.
//!
//! The registry owns every [`DeviceHandle`]. Capture loops look their
//! handle up on each iteration and read frames through it without holding
//! the registry lock.
//!
//! Lock discipline:
//! - the map lock covers lookups, inserts and removals only
//! - opening a device happens under a per-camera gate, so concurrent opens
//!   of one camera collapse into a single device call while opens of other
//!   cameras proceed in parallel
//! - closing happens after the entry has left the map, and never waits
//!   on a read that is still blocked inside the device

use super::{CameraConfig, CameraError, CameraId, CaptureDevice, DeviceFactory, Frame};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;

/// Shared reference to one opened device.
///
/// Clones refer to the same device. Only the registry closes it, exactly
/// once, when the entry is released.
#[derive(Clone)]
pub struct DeviceHandle {
    camera_id: CameraId,
    device: Arc<Mutex<Box<dyn CaptureDevice>>>,
}

impl DeviceHandle {
    fn new(camera_id: CameraId, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            camera_id,
            device: Arc::new(Mutex::new(device)),
        }
    }

    #[inline]
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Reads one frame, blocking on the device.
    pub fn read_frame(&self) -> Result<Frame, CameraError> {
        lock(&self.device).read_frame()
    }

    /// Returns true if both handles refer to the same device.
    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.device, &other.device)
    }

    /// Closes the device without waiting on a read in progress.
    ///
    /// If another thread is inside `read_frame`, the close runs on a
    /// short-lived thread once that read returns.
    fn close(&self) {
        match self.device.try_lock() {
            Ok(mut device) => close_device(&mut device),
            Err(TryLockError::Poisoned(poisoned)) => {
                close_device(&mut poisoned.into_inner());
            }
            Err(TryLockError::WouldBlock) => {
                let camera_id = self.camera_id;
                let device = Arc::clone(&self.device);
                tracing::warn!(camera_id, "Camera busy, closing once the read returns");
                let spawned = thread::Builder::new()
                    .name(format!("camera-close-{camera_id}"))
                    .spawn(move || close_device(&mut lock(&device)));
                if let Err(e) = spawned {
                    tracing::error!(camera_id, error = %e, "Deferred close failed, closing inline");
                    close_device(&mut lock(&self.device));
                }
            }
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("camera_id", &self.camera_id)
            .finish()
    }
}

#[derive(Default)]
struct Entries {
    devices: HashMap<CameraId, DeviceHandle>,
    gates: HashMap<CameraId, Arc<Mutex<()>>>,
}

/// Mapping from camera identifier to its exclusive device handle.
pub struct DeviceRegistry {
    factory: Box<dyn DeviceFactory>,
    entries: Mutex<Entries>,
}

impl DeviceRegistry {
    pub fn new(factory: impl DeviceFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Opens a camera, or returns the existing handle if it is already open.
    ///
    /// On failure no entry is left behind and the error is always
    /// [`CameraError::DeviceOpenFailed`].
    pub fn open(
        &self,
        camera_id: CameraId,
        config: &CameraConfig,
    ) -> Result<DeviceHandle, CameraError> {
        let gate = {
            let mut entries = lock(&self.entries);
            if let Some(handle) = entries.devices.get(&camera_id) {
                return Ok(handle.clone());
            }
            Arc::clone(entries.gates.entry(camera_id).or_default())
        };

        let result = {
            let _opening = lock(&gate);
            // Another caller may have finished opening while we waited.
            match self.get(camera_id) {
                Some(handle) => Ok(handle),
                None => self.open_device(camera_id, config),
            }
        };

        let mut entries = lock(&self.entries);
        // Map plus our clone: nobody else is waiting on this gate.
        if Arc::strong_count(&gate) == 2 {
            entries.gates.remove(&camera_id);
        }
        result
    }

    fn open_device(
        &self,
        camera_id: CameraId,
        config: &CameraConfig,
    ) -> Result<DeviceHandle, CameraError> {
        let mut device = self
            .factory
            .create(camera_id)
            .and_then(|mut device| device.open(config).map(|()| device))
            .map_err(|e| {
                tracing::error!(camera_id, error = %e, "Camera open failed");
                match e {
                    CameraError::DeviceOpenFailed { .. } => e,
                    other => CameraError::DeviceOpenFailed {
                        camera_id,
                        reason: other.to_string(),
                    },
                }
            })?;

        if !device.is_open() {
            device.close();
            return Err(CameraError::DeviceOpenFailed {
                camera_id,
                reason: "device reported closed after open".to_string(),
            });
        }

        let handle = DeviceHandle::new(camera_id, device);
        lock(&self.entries)
            .devices
            .insert(camera_id, handle.clone());
        tracing::info!(camera_id, "Camera initialized");
        Ok(handle)
    }

    /// Looks up an open camera. `None` means "not ready", not an error.
    pub fn get(&self, camera_id: CameraId) -> Option<DeviceHandle> {
        lock(&self.entries).devices.get(&camera_id).cloned()
    }

    /// Returns true if the camera has a live entry.
    pub fn contains(&self, camera_id: CameraId) -> bool {
        lock(&self.entries).devices.contains_key(&camera_id)
    }

    /// Number of open cameras.
    pub fn len(&self) -> usize {
        lock(&self.entries).devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes a camera and removes its entry. Releasing an absent camera
    /// is a no-op.
    pub fn release(&self, camera_id: CameraId) {
        let removed = lock(&self.entries).devices.remove(&camera_id);
        if let Some(handle) = removed {
            handle.close();
            tracing::info!(camera_id, "Camera released");
        }
    }

    /// Closes every open camera.
    pub fn release_all(&self) {
        let drained: Vec<DeviceHandle> = lock(&self.entries)
            .devices
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.close();
            tracing::info!(camera_id = handle.camera_id(), "Camera released");
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn close_device(device: &mut Box<dyn CaptureDevice>) {
    if device.is_open() {
        device.close();
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
