//! Driver capability interface.
//!
//! The engine never talks to hardware directly. A backend implements
//! [`Driver`] (enumeration and opening), [`Camera`] (mode configuration and
//! the streaming ring buffer) and [`ControlSurface`] (runtime features).

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::mode::{OperationMode, PixelEncoding, VideoMode};

/// Unique identifier of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// How a dequeue waits for the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeuePolicy {
    /// Block until a frame arrives (or the driver's own timeout expires).
    Wait,
    /// Return immediately with `None` when no frame is queued.
    Poll,
}

/// Byte order of 16-bit samples in a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most significant byte first.
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

/// One frame borrowed from the driver's ring buffer.
///
/// The borrow ends before the buffer can be handed back with
/// [`Camera::enqueue`].
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Raw frame bytes.
    pub data: &'a [u8],
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Encoding of `data`.
    pub encoding: PixelEncoding,
    /// Byte order of 16-bit samples.
    pub byte_order: ByteOrder,
    /// Number of significant bits per 16-bit sample.
    pub data_depth: u8,
    /// Set by the driver when the frame was damaged in transit.
    pub corrupt: bool,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Identifier of a runtime device control.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureId {
    Brightness,
    Exposure,
    Sharpness,
    WhiteBalance,
    Hue,
    Saturation,
    Gamma,
    Shutter,
    Gain,
    Iris,
    Focus,
    Temperature,
    Trigger,
    TriggerDelay,
    WhiteShading,
    FrameRate,
    Zoom,
    Pan,
    Tilt,
    OpticalFilter,
    CaptureSize,
    CaptureQuality,
}

impl FeatureId {
    /// Human-readable feature name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Brightness => "Brightness",
            Self::Exposure => "Exposure",
            Self::Sharpness => "Sharpness",
            Self::WhiteBalance => "White Balance",
            Self::Hue => "Hue",
            Self::Saturation => "Saturation",
            Self::Gamma => "Gamma",
            Self::Shutter => "Shutter",
            Self::Gain => "Gain",
            Self::Iris => "Iris",
            Self::Focus => "Focus",
            Self::Temperature => "Temperature",
            Self::Trigger => "Trigger",
            Self::TriggerDelay => "Trigger Delay",
            Self::WhiteShading => "White Shading",
            Self::FrameRate => "Frame Rate",
            Self::Zoom => "Zoom",
            Self::Pan => "Pan",
            Self::Tilt => "Tilt",
            Self::OpticalFilter => "Optical Filter",
            Self::CaptureSize => "Capture Size",
            Self::CaptureQuality => "Capture Quality",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Control mode of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureMode {
    /// Value set by the host.
    Manual,
    /// Value tracked continuously by the device.
    Auto,
    /// Device adjusts once, then holds.
    OnePushAuto,
}

impl FeatureMode {
    /// Human-readable mode name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::OnePushAuto => "one push auto",
        }
    }
}

impl fmt::Display for FeatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of one feature as the device reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureInfo {
    /// Feature identifier.
    pub id: FeatureId,
    /// Whether the feature can be switched on and off.
    pub on_off_capable: bool,
    /// Current power state.
    pub is_on: bool,
    /// Modes the device accepts for this feature.
    pub modes: Vec<FeatureMode>,
    /// Current mode.
    pub current_mode: FeatureMode,
    /// Lowest accepted value.
    pub min: u32,
    /// Highest accepted value.
    pub max: u32,
    /// Current scalar value.
    pub value: u32,
    /// Current `(B/U, R/V)` pair for white balance.
    pub white_balance: Option<(u32, u32)>,
}

/// A capture driver: the process-wide context devices are opened through.
pub trait Driver: Send + Sync + 'static {
    /// Per-device handle type.
    type Camera: Camera;

    /// List identifiers of attached devices.
    fn enumerate(&self) -> Result<Vec<DeviceId>>;

    /// Claim a device.
    fn open(&self, id: DeviceId) -> Result<Self::Camera>;
}

/// Operations on one opened device.
pub trait Camera: Send + 'static {
    /// Feature control surface type.
    type Controls: ControlSurface;

    /// Model name.
    fn name(&self) -> String;

    /// Whether the device is still attached.
    fn is_connected(&self) -> bool;

    /// Every supported mode, fixed modes first, one entry per frame rate.
    fn supported_modes(&mut self) -> Result<Vec<VideoMode>>;

    /// Set the link operation mode and the matching ISO speed.
    fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()>;

    /// Select a mode. Variable-ROI modes get a region spanning the full mode size.
    fn configure(&mut self, mode: &VideoMode) -> Result<()>;

    /// Allocate `buffer_count` ring buffers and enable transmission.
    fn start_streaming(&mut self, buffer_count: u32) -> Result<()>;

    /// Disable transmission and free the ring buffers. Must succeed when not streaming.
    fn stop_streaming(&mut self) -> Result<()>;

    /// Take the next filled ring buffer.
    fn dequeue(&mut self, policy: DequeuePolicy) -> Result<Option<RawFrame<'_>>>;

    /// Hand the most recently dequeued ring buffer back to the driver.
    fn enqueue(&mut self) -> Result<()>;

    /// Open a control surface usable from another thread while streaming.
    fn controls(&self) -> Result<Self::Controls>;

    /// Release the device.
    fn close(&mut self);
}

/// Runtime feature controls of a device.
pub trait ControlSurface: Clone + Send + 'static {
    /// Snapshot every feature the device advertises.
    fn features(&mut self) -> Result<Vec<FeatureInfo>>;

    /// Switch a feature on or off.
    fn set_power(&mut self, id: FeatureId, on: bool) -> Result<()>;

    /// Change a feature's control mode.
    fn set_mode(&mut self, id: FeatureId, mode: FeatureMode) -> Result<()>;

    /// Write a feature's scalar value.
    fn set_value(&mut self, id: FeatureId, value: u32) -> Result<()>;

    /// Write both white balance components in one operation.
    fn set_white_balance(&mut self, blue_u: u32, red_v: u32) -> Result<()>;
}

/// Control surface type of a driver's cameras.
pub type ControlsOf<D> = <<D as Driver>::Camera as Camera>::Controls;
