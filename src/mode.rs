//! Video mode descriptors and session options.

use std::fmt;

/// Pixel encoding delivered by the driver for a video mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelEncoding {
    /// 8-bit monochrome.
    Mono8,
    /// 16-bit monochrome.
    Mono16,
    /// YUV 4:1:1 packed as `U Y Y V Y Y`.
    Yuv411,
    /// YUV 4:2:2 packed as `U Y V Y`.
    Yuv422,
    /// YUV 4:2:2 packed as `Y U Y V`.
    Yuyv,
    /// YUV 4:4:4 packed as `U Y V`.
    Yuv444,
    /// 24-bit RGB.
    Rgb8,
    /// 48-bit RGB.
    Rgb16,
    /// 8-bit raw sensor data (Bayer mosaic).
    Raw8,
    /// 16-bit raw sensor data (Bayer mosaic).
    Raw16,
}

impl PixelEncoding {
    /// Short tag used when printing modes.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mono8 => "MONO8",
            Self::Mono16 => "MONO16",
            Self::Yuv411 => "YUV411",
            Self::Yuv422 => "YUV422",
            Self::Yuyv => "YUYV",
            Self::Yuv444 => "YUV444",
            Self::Rgb8 => "RGB8",
            Self::Rgb16 => "RGB16",
            Self::Raw8 => "RAW8",
            Self::Raw16 => "RAW16",
        }
    }

    /// Returns `true` when each channel sample takes two bytes.
    pub const fn is_16bit(self) -> bool {
        matches!(self, Self::Mono16 | Self::Rgb16 | Self::Raw16)
    }

    /// Number of bytes a full frame of `width` x `height` pixels occupies.
    pub const fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Mono8 | Self::Raw8 => pixels,
            Self::Mono16 | Self::Raw16 | Self::Yuv422 | Self::Yuyv => pixels * 2,
            Self::Yuv411 => pixels * 3 / 2,
            Self::Yuv444 | Self::Rgb8 => pixels * 3,
            Self::Rgb16 => pixels * 6,
        }
    }
}

impl fmt::Display for PixelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame rate expressed as a ratio of frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    /// Frames.
    pub numerator: u32,
    /// Per this many seconds.
    pub denominator: u32,
}

impl FrameRate {
    /// Create a frame rate of `numerator / denominator` frames per second.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Create an integral frame rate.
    #[must_use]
    pub const fn fps(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    /// Frame rate as frames per second.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f32(self) -> f32 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f32 / self.denominator as f32
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f32())
    }
}

/// Whether a mode has a fixed geometry or a variable region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    /// Fixed resolution and frame rate.
    Fixed,
    /// Scalable "format7" mode; the region of interest spans up to the
    /// advertised resolution and the frame rate follows from it.
    VariableRoi,
}

/// A video mode supported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoMode {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel encoding of raw frames.
    pub encoding: PixelEncoding,
    /// Fixed or variable region of interest.
    pub kind: ModeKind,
    /// Opaque driver code identifying the mode.
    pub code: u32,
    /// Fixed frame rate; `None` for variable-ROI modes.
    pub frame_rate: Option<FrameRate>,
}

impl VideoMode {
    /// Create a fixed mode.
    #[must_use]
    pub const fn fixed(
        width: u32,
        height: u32,
        encoding: PixelEncoding,
        code: u32,
        frame_rate: FrameRate,
    ) -> Self {
        Self {
            width,
            height,
            encoding,
            kind: ModeKind::Fixed,
            code,
            frame_rate: Some(frame_rate),
        }
    }

    /// Create a variable-ROI mode spanning up to `width` x `height`.
    #[must_use]
    pub const fn variable_roi(width: u32, height: u32, encoding: PixelEncoding, code: u32) -> Self {
        Self {
            width,
            height,
            encoding,
            kind: ModeKind::VariableRoi,
            code,
            frame_rate: None,
        }
    }

    /// Returns `true` for variable-ROI modes.
    pub const fn is_variable_roi(&self) -> bool {
        matches!(self.kind, ModeKind::VariableRoi)
    }

    /// Size in bytes of one raw frame in this mode.
    pub const fn frame_len(&self) -> usize {
        self.encoding.frame_len(self.width, self.height)
    }

    /// Number of pixels in one frame.
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}x{}", self.width, self.height)?;
        if let Some(rate) = self.frame_rate {
            write!(f, "@{rate}")?;
        }
        write!(f, " {}", self.encoding)?;
        if self.is_variable_roi() {
            f.write_str(" format7")?;
        }
        f.write_str("]")
    }
}

/// How the session picks its initial video mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeSelection {
    /// Use the first mode the device advertises.
    #[default]
    Automatic,
    /// Use exactly this mode.
    Explicit(VideoMode),
}

/// Link operation mode of the bus the device sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationMode {
    /// Legacy link, ISO speed 400.
    Legacy,
    /// Extended (1394b style) link, ISO speed 800.
    #[default]
    Extended,
}

impl OperationMode {
    /// Isochronous speed in Mbit/s implied by the link mode.
    pub const fn iso_speed(self) -> u32 {
        match self {
            Self::Legacy => 400,
            Self::Extended => 800,
        }
    }
}

/// What the acquisition loop does with frames queued while it was busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscardPolicy {
    /// Drain the driver queue before each blocking dequeue so the newest frame wins.
    #[default]
    DropBacklog,
    /// Deliver queued frames oldest first.
    OldestFirst,
}

/// Default number of driver ring buffers.
pub const DEFAULT_DRIVER_BUFFERS: u32 = 4;
/// Default number of pooled pixel buffers.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Capture configuration supplied at session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Initial video mode.
    pub mode: ModeSelection,
    /// Link operation mode.
    pub operation_mode: OperationMode,
    /// Frame discard policy.
    pub discard_policy: DiscardPolicy,
    /// Number of ring buffers requested from the driver.
    pub driver_buffers: u32,
    /// Number of pixel buffers the pool pre-allocates.
    pub pool_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: ModeSelection::Automatic,
            operation_mode: OperationMode::default(),
            discard_policy: DiscardPolicy::default(),
            driver_buffers: DEFAULT_DRIVER_BUFFERS,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl Options {
    /// Select an explicit video mode.
    #[must_use]
    pub const fn with_video_mode(mut self, mode: VideoMode) -> Self {
        self.mode = ModeSelection::Explicit(mode);
        self
    }

    /// Set the link operation mode.
    #[must_use]
    pub const fn with_operation_mode(mut self, mode: OperationMode) -> Self {
        self.operation_mode = mode;
        self
    }

    /// Set the frame discard policy.
    #[must_use]
    pub const fn with_discard_policy(mut self, policy: DiscardPolicy) -> Self {
        self.discard_policy = policy;
        self
    }

    /// Set the number of driver ring buffers.
    #[must_use]
    pub const fn with_driver_buffers(mut self, count: u32) -> Self {
        self.driver_buffers = count;
        self
    }

    /// Set the number of pooled pixel buffers.
    #[must_use]
    pub const fn with_pool_size(mut self, count: usize) -> Self {
        self.pool_size = count;
        self
    }

    /// Resolve the mode selection against a device's supported modes.
    pub fn resolve_mode(&self, supported: &[VideoMode]) -> Option<VideoMode> {
        match self.mode {
            ModeSelection::Automatic => supported.first().copied(),
            ModeSelection::Explicit(mode) => Some(mode),
        }
    }
}
