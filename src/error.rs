//! Error taxonomy for the capture engine.

use thiserror::Error;

use crate::mode::VideoMode;
use crate::traits::FeatureId;

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The driver context could not be created or a device could not be opened.
    #[error("Capture initialisation failed: {0}")]
    InitFailure(String),

    /// A single driver call returned a non-success status.
    #[error("Driver error: {0}")]
    Driver(String),

    /// Pushing a feature setting to the device failed. Non-fatal.
    #[error("Feature {feature} error: {message}")]
    Feature {
        /// Feature the push was issued for.
        feature: FeatureId,
        /// Driver diagnostic.
        message: String,
    },

    /// A raw frame could not be converted. The frame is dropped.
    #[error("Frame conversion failed: {0}")]
    Conversion(String),

    /// Enumeration found no device to open.
    #[error("No capture device available")]
    NoDeviceAvailable,

    /// The requested video mode is not advertised by the device.
    #[error("Video mode {0} not supported by device")]
    UnsupportedMode(VideoMode),

    /// The device handle went down with a panicked acquisition thread.
    #[error("Device handle lost")]
    DeviceLost,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Build a [`CaptureError::Driver`] naming the failing operation.
    pub fn driver<E: std::fmt::Display>(operation: &str, err: E) -> Self {
        Self::Driver(format!("{operation}: {err}"))
    }

    /// Returns `true` for errors that do not stop a session.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Feature { .. })
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
