//! Camera discovery and selection.
//!
use crate::{
    error::ClassifyError,
    sensors::{CameraBackend, DeviceId},
};

/// Cached list of cameras and the one currently selected.
#[derive(Debug, Default)]
pub struct DeviceEnumerator {
    devices: Vec<DeviceId>,
    active: usize,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// List the cameras, asking the backend only while the cache is empty.
    pub fn list_cameras(&mut self, backend: &dyn CameraBackend) -> Result<&[DeviceId], ClassifyError> {
        if self.devices.is_empty() {
            let devices = backend.list_devices()?;
            if devices.is_empty() {
                return Err(ClassifyError::NoCameraFound);
            }
            log::info!("Found {} camera(s): {:?}", devices.len(), devices);
            self.devices = devices;
            self.active = 0;
        }

        Ok(&self.devices)
    }

    pub fn active_device(&self) -> Option<&DeviceId> {
        self.devices.get(self.active)
    }

    /// Whether there is another camera to switch to.
    pub fn can_switch(&self) -> bool {
        self.devices.len() > 1
    }

    /// Select the next camera, wrapping around. `None` without a second camera.
    pub fn advance(&mut self) -> Option<&DeviceId> {
        if !self.can_switch() {
            return None;
        }
        self.active = (self.active + 1) % self.devices.len();
        self.devices.get(self.active)
    }
}
