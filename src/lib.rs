//! cam-session: a camera capture engine.
//!
//! A background acquisition thread pulls raw frames from a streaming video
//! device, converts them into display-ready RGB buffers and hands the newest
//! complete frame to a consumer that polls for it, without either side
//! blocking on the other. Hardware access goes through the [`Driver`] trait
//! family; [`V4l2Driver`] is the production backend.
//!
//! ```no_run
//! use cam_session::{CaptureSession, DriverContext, Options, V4l2Driver};
//!
//! # fn main() -> cam_session::Result<()> {
//! let context = DriverContext::new(V4l2Driver::new());
//! let mut session = CaptureSession::create(&context, Options::default(), None)?;
//! session.start()?;
//! loop {
//!     if session.check_new_frame()? {
//!         if let Some(frame) = session.get_frame() {
//!             println!("frame {}: {}x{}", frame.sequence(), frame.width(), frame.height());
//!         }
//!     }
//! }
//! # }
//! ```

pub mod convert;
pub mod device;
pub mod error;
pub mod features;
pub mod mode;
pub mod pool;
pub mod session;
pub mod traits;
pub mod v4l2;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use device::{Device, DeviceHandle, DriverContext};
pub use error::{CaptureError, Result};
pub use features::{Feature, FeatureState, FeatureSync, SyncReport};
pub use mode::{
    DiscardPolicy, FrameRate, ModeKind, ModeSelection, OperationMode, Options, PixelEncoding,
    VideoMode,
};
pub use pool::{BufferPool, ChannelLayout, PixelBuffer};
pub use session::{CaptureSession, SessionState};
pub use traits::{
    Camera, ControlSurface, DequeuePolicy, DeviceId, Driver, FeatureId, FeatureInfo, FeatureMode,
    RawFrame,
};
pub use v4l2::V4l2Driver;
