//! Device discovery and exclusive device handles.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{CaptureError, Result};
use crate::mode::{OperationMode, VideoMode};
use crate::traits::{Camera, ControlsOf, DequeuePolicy, DeviceId, Driver, RawFrame};

/// Descriptor of an attached device, as found by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Unique identifier.
    pub id: DeviceId,
    /// Human-readable model name.
    pub name: String,
    /// Supported modes in driver order.
    pub modes: Vec<VideoMode>,
    /// Whether the device answered at enumeration time.
    pub connected: bool,
}

impl Device {
    /// Largest `(width, height)` over all supported modes, by pixel count.
    pub fn max_resolution(&self) -> Option<(u32, u32)> {
        self.modes
            .iter()
            .max_by_key(|mode| mode.pixel_count())
            .map(|mode| (mode.width, mode.height))
    }

    /// Whether `mode` is one of the advertised modes.
    pub fn supports(&self, mode: &VideoMode) -> bool {
        self.modes.contains(mode)
    }
}

/// The capture driver context shared by every opened device.
///
/// Construct it once and pass the `Arc` to every [`DeviceHandle`]; the
/// driver is torn down when the last reference goes away.
pub struct DriverContext<D: Driver> {
    driver: D,
    devices: Mutex<Option<Vec<Device>>>,
}

impl<D: Driver> DriverContext<D> {
    /// Wrap a driver in a shareable context.
    pub fn new(driver: D) -> Arc<Self> {
        Arc::new(Self {
            driver,
            devices: Mutex::new(None),
        })
    }

    /// The wrapped driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Attached devices. Enumeration is cached until `force_refresh` is set.
    pub fn devices(&self, force_refresh: bool) -> Result<Vec<Device>> {
        let mut cache = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(devices) = cache.as_ref().filter(|_| !force_refresh) {
            return Ok(devices.clone());
        }

        let devices = self.enumerate()?;
        log::debug!("enumerated {} capture device(s)", devices.len());
        *cache = Some(devices.clone());
        Ok(devices)
    }

    /// Find the device whose name equals `name`.
    pub fn find_device_by_name(&self, name: &str) -> Result<Option<Device>> {
        Ok(self
            .devices(false)?
            .into_iter()
            .find(|device| device.name == name))
    }

    /// Find the first device whose name contains `fragment`.
    pub fn find_device_by_name_contains(&self, fragment: &str) -> Result<Option<Device>> {
        Ok(self
            .devices(false)?
            .into_iter()
            .find(|device| device.name.contains(fragment)))
    }

    fn enumerate(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        for id in self.driver.enumerate()? {
            let mut camera = self
                .driver
                .open(id)
                .map_err(|err| CaptureError::InitFailure(format!("device {id}: {err}")))?;

            let described = describe(&mut camera, id);
            camera.close();
            devices.push(described?);
        }
        Ok(devices)
    }
}

fn describe<C: Camera>(camera: &mut C, id: DeviceId) -> Result<Device> {
    camera.set_operation_mode(OperationMode::default())?;
    Ok(Device {
        id,
        name: camera.name(),
        modes: camera.supported_modes()?,
        connected: camera.is_connected(),
    })
}

impl<D: Driver> Drop for DriverContext<D> {
    fn drop(&mut self) {
        log::debug!("releasing capture driver context");
    }
}

/// Exclusive claim on one device.
///
/// Dropping the handle disables streaming and closes the device before the
/// driver context reference is released.
pub struct DeviceHandle<D: Driver> {
    camera: D::Camera,
    device: Device,
    streaming: bool,
    context: Arc<DriverContext<D>>,
}

impl<D: Driver> DeviceHandle<D> {
    /// Open `device` through `context`.
    pub fn open(context: &Arc<DriverContext<D>>, device: &Device) -> Result<Self> {
        let camera = context
            .driver
            .open(device.id)
            .map_err(|err| CaptureError::InitFailure(format!("device {}: {err}", device.id)))?;

        log::debug!("opened device {} ({})", device.name, device.id);
        Ok(Self {
            camera,
            device: device.clone(),
            streaming: false,
            context: Arc::clone(context),
        })
    }

    /// Descriptor the handle was opened from.
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// The driver context this handle keeps alive.
    pub const fn context(&self) -> &Arc<DriverContext<D>> {
        &self.context
    }

    /// Whether the device is still attached.
    pub fn is_connected(&self) -> bool {
        self.camera.is_connected()
    }

    /// Whether driver streaming is enabled.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Set the link operation mode.
    pub fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()> {
        self.camera.set_operation_mode(mode)
    }

    /// Select a video mode.
    pub fn configure(&mut self, mode: &VideoMode) -> Result<()> {
        self.camera.configure(mode)
    }

    /// Enable streaming with `buffer_count` driver ring buffers.
    pub fn start_streaming(&mut self, buffer_count: u32) -> Result<()> {
        self.camera.start_streaming(buffer_count)?;
        self.streaming = true;
        Ok(())
    }

    /// Disable streaming.
    pub fn stop_streaming(&mut self) -> Result<()> {
        self.streaming = false;
        self.camera.stop_streaming()
    }

    /// Dequeue the next raw frame.
    pub fn dequeue(&mut self, policy: DequeuePolicy) -> Result<Option<RawFrame<'_>>> {
        self.camera.dequeue(policy)
    }

    /// Re-queue the last dequeued raw frame.
    pub fn enqueue(&mut self) -> Result<()> {
        self.camera.enqueue()
    }

    /// Open a feature control surface for this device.
    pub fn controls(&self) -> Result<ControlsOf<D>> {
        self.camera.controls()
    }
}

impl<D: Driver> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_streaming() {
            log::warn!("failed to stop streaming on {}: {err}", self.device.name);
        }
        self.camera.close();
        log::debug!("closed device {} ({})", self.device.name, self.device.id);
    }
}
