//! V4L2 driver backend using the v4l crate.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use v4l::buffer::{Flags, Type};
use v4l::capability::Flags as CapabilityFlags;
use v4l::control::{Control, Description, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC, Fraction};

use crate::error::{CaptureError, Result};
use crate::mode::{FrameRate, ModeKind, OperationMode, PixelEncoding, VideoMode};
use crate::traits::{
    ByteOrder, Camera, ControlSurface, DequeuePolicy, DeviceId, Driver, FeatureId, FeatureInfo,
    FeatureMode, RawFrame,
};

/// Longest blocking dequeue before the stream is considered stalled.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// errno for a device node whose hardware went away.
const ENODEV: i32 = 19;

/// Whether a stream whose STREAMOFF failed with `err` may still be dropped.
///
/// `Drop for Stream` issues STREAMOFF again and panics unless it fails with
/// ENODEV.
fn stream_drop_is_safe(err: &io::Error) -> bool {
    err.raw_os_error() == Some(ENODEV)
}

/// Disable streaming and release the mmap buffers. A stream that refuses to
/// stop is leaked rather than dropped.
fn retire_stream(mut stream: Stream<'static>) -> io::Result<()> {
    let result = stream.stop();
    match &result {
        Err(err) if !stream_drop_is_safe(err) => std::mem::forget(stream),
        _ => drop(stream),
    }
    result
}

/// V4L2 driver: devices are `/dev/videoN` nodes, identified by `N`.
#[derive(Debug, Default)]
pub struct V4l2Driver;

impl V4l2Driver {
    /// Create the driver.
    pub const fn new() -> Self {
        Self
    }
}

impl Driver for V4l2Driver {
    type Camera = V4l2Camera;

    fn enumerate(&self) -> Result<Vec<DeviceId>> {
        let mut ids = Vec::new();
        for node in v4l::context::enum_devices() {
            let index = node.index();
            // uvcvideo also registers metadata nodes; keep capture-capable ones
            let capable = Device::new(index)
                .and_then(|device| device.query_caps())
                .is_ok_and(|caps| caps.capabilities.contains(CapabilityFlags::VIDEO_CAPTURE));
            if capable {
                ids.push(DeviceId(index as u64));
            } else {
                log::trace!("skipping /dev/video{index}: not a capture device");
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn open(&self, id: DeviceId) -> Result<V4l2Camera> {
        V4l2Camera::open(id)
    }
}

/// One opened `/dev/videoN` node.
pub struct V4l2Camera {
    device: Arc<Device>,
    card: String,
    mode: Option<VideoMode>,
    stream: Option<Stream<'static>>,
    buffer_count: u32,
    stalled: bool,
}

impl V4l2Camera {
    fn open(id: DeviceId) -> Result<Self> {
        let index = usize::try_from(id.0)
            .map_err(|_| CaptureError::Driver(format!("device index {} out of range", id.0)))?;
        let device = Device::new(index).map_err(|err| CaptureError::driver("open", err))?;
        let caps = device
            .query_caps()
            .map_err(|err| CaptureError::driver("VIDIOC_QUERYCAP", err))?;
        if !caps.capabilities.contains(CapabilityFlags::STREAMING) {
            return Err(CaptureError::Driver(format!(
                "{} does not support streaming I/O",
                caps.card
            )));
        }

        Ok(Self {
            device: Arc::new(device),
            card: caps.card,
            mode: None,
            stream: None,
            buffer_count: 0,
            stalled: false,
        })
    }

    fn create_stream(&self, buffer_count: u32) -> Result<Stream<'static>> {
        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| CaptureError::driver("VIDIOC_REQBUFS", err))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        Ok(stream)
    }

    /// Replace a stream whose dequeue timed out. A timed-out stream has
    /// already re-queued its last buffer and cannot continue.
    fn restart_stream(&mut self) -> Result<()> {
        log::warn!(
            "no frame from {} within {DEQUEUE_TIMEOUT:?}, restarting stream",
            self.card
        );
        if let Some(stream) = self.stream.take() {
            if let Err(err) = retire_stream(stream) {
                log::warn!("{}: failed to stop stalled stream: {err}", self.card);
            }
        }
        self.stream = Some(self.create_stream(self.buffer_count)?);
        self.stalled = false;
        Ok(())
    }

    fn modes_at(
        &self,
        fourcc: FourCC,
        encoding: PixelEncoding,
        width: u32,
        height: u32,
    ) -> Vec<VideoMode> {
        let code = u32::from_le_bytes(fourcc.repr);
        if is_bayer(fourcc) {
            return vec![VideoMode::variable_roi(width, height, encoding, code)];
        }

        let mut rates: Vec<FrameRate> = self
            .device
            .enum_frameintervals(fourcc, width, height)
            .unwrap_or_default()
            .into_iter()
            .map(|interval| match interval.interval {
                FrameIntervalEnum::Discrete(fraction) => rate_of(fraction),
                FrameIntervalEnum::Stepwise(step) => rate_of(step.min),
            })
            .collect();
        rates.sort_by(|a, b| b.as_f32().total_cmp(&a.as_f32()));
        rates.dedup();

        if rates.is_empty() {
            return vec![VideoMode {
                width,
                height,
                encoding,
                kind: ModeKind::Fixed,
                code,
                frame_rate: None,
            }];
        }
        rates
            .into_iter()
            .map(|rate| VideoMode::fixed(width, height, encoding, code, rate))
            .collect()
    }
}

impl Camera for V4l2Camera {
    type Controls = V4l2Controls;

    fn name(&self) -> String {
        self.card.clone()
    }

    fn is_connected(&self) -> bool {
        self.device.query_caps().is_ok()
    }

    fn supported_modes(&mut self) -> Result<Vec<VideoMode>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(|err| CaptureError::driver("VIDIOC_ENUM_FMT", err))?;

        let mut modes = Vec::new();
        for format in formats {
            let Some(encoding) = encoding_of(format.fourcc) else {
                log::debug!(
                    "{}: ignoring unsupported format {}",
                    self.card,
                    format.fourcc
                );
                continue;
            };
            let sizes = self
                .device
                .enum_framesizes(format.fourcc)
                .map_err(|err| CaptureError::driver("VIDIOC_ENUM_FRAMESIZES", err))?;
            for size in sizes {
                let (width, height) = match size.size {
                    FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
                    FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
                };
                modes.extend(self.modes_at(format.fourcc, encoding, width, height));
            }
        }

        modes.sort_by_key(VideoMode::is_variable_roi);
        Ok(modes)
    }

    fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()> {
        log::trace!(
            "{}: operation mode {mode:?} has no V4L2 equivalent",
            self.card
        );
        Ok(())
    }

    fn configure(&mut self, mode: &VideoMode) -> Result<()> {
        let fourcc = FourCC::new(&mode.code.to_le_bytes());
        let requested = Format::new(mode.width, mode.height, fourcc);
        let applied = self
            .device
            .set_format(&requested)
            .map_err(|err| CaptureError::driver("VIDIOC_S_FMT", err))?;

        if applied.width != mode.width
            || applied.height != mode.height
            || applied.fourcc != fourcc
        {
            return Err(CaptureError::Driver(format!(
                "driver adjusted {mode} to {}x{} {}",
                applied.width, applied.height, applied.fourcc
            )));
        }
        let row_len = mode.frame_len() / mode.height.max(1) as usize;
        if applied.stride as usize != row_len {
            return Err(CaptureError::Driver(format!(
                "{mode} uses padded rows ({} bytes per line)",
                applied.stride
            )));
        }

        if let Some(rate) = mode.frame_rate {
            let params = Parameters::new(Fraction::new(rate.denominator, rate.numerator));
            if let Err(err) = self.device.set_params(&params) {
                log::warn!("{}: failed to set frame rate {rate}: {err}", self.card);
            }
        }

        self.mode = Some(*mode);
        Ok(())
    }

    fn start_streaming(&mut self, buffer_count: u32) -> Result<()> {
        if self.mode.is_none() {
            return Err(CaptureError::Driver("no video mode configured".to_owned()));
        }
        self.stop_streaming()?;
        self.stream = Some(self.create_stream(buffer_count)?);
        self.buffer_count = buffer_count;
        self.stalled = false;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        retire_stream(stream).map_err(|err| CaptureError::driver("VIDIOC_STREAMOFF", err))
    }

    fn dequeue(&mut self, policy: DequeuePolicy) -> Result<Option<RawFrame<'_>>> {
        // Stream::next re-queues its previous buffer, so a zero-timeout poll
        // would corrupt the queue on every miss.
        if policy == DequeuePolicy::Poll {
            return Ok(None);
        }
        if self.stalled {
            self.restart_stream()?;
        }

        let mode = self
            .mode
            .ok_or_else(|| CaptureError::Driver("no video mode configured".to_owned()))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::Driver("dequeue while not streaming".to_owned()))?;

        match stream.next() {
            Ok((buf, meta)) => {
                // Safe conversions: V4L2 timestamps are always non-negative in practice
                #[allow(clippy::cast_sign_loss)]
                let secs = meta.timestamp.sec.max(0) as u64;
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

                let used = (meta.bytesused as usize).min(buf.len());
                Ok(Some(RawFrame {
                    data: buf.get(..used).unwrap_or(buf),
                    width: mode.width,
                    height: mode.height,
                    encoding: mode.encoding,
                    byte_order: ByteOrder::LittleEndian,
                    data_depth: if mode.encoding.is_16bit() { 16 } else { 8 },
                    corrupt: meta.flags.contains(Flags::ERROR),
                    sequence: meta.sequence,
                    timestamp: Duration::new(secs, nanos),
                }))
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                self.stalled = true;
                Ok(None)
            }
            Err(err) => Err(CaptureError::driver("VIDIOC_DQBUF", err)),
        }
    }

    fn enqueue(&mut self) -> Result<()> {
        // the buffer goes back on the next Stream::next
        Ok(())
    }

    fn controls(&self) -> Result<V4l2Controls> {
        Ok(V4l2Controls {
            device: Arc::clone(&self.device),
            offsets: HashMap::new(),
        })
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = retire_stream(stream) {
                log::warn!("{}: failed to stop stream on close: {err}", self.card);
            }
        }
        self.mode = None;
    }
}

fn rate_of(interval: Fraction) -> FrameRate {
    FrameRate::new(interval.denominator, interval.numerator)
}

fn is_bayer(fourcc: FourCC) -> bool {
    matches!(&fourcc.repr, b"RGGB" | b"RG16")
}

/// Encoding of a V4L2 pixel format, for the formats the converter handles.
fn encoding_of(fourcc: FourCC) -> Option<PixelEncoding> {
    match &fourcc.repr {
        b"GREY" => Some(PixelEncoding::Mono8),
        b"Y16 " => Some(PixelEncoding::Mono16),
        b"UYVY" => Some(PixelEncoding::Yuv422),
        b"YUYV" => Some(PixelEncoding::Yuyv),
        b"RGB3" => Some(PixelEncoding::Rgb8),
        b"RGGB" => Some(PixelEncoding::Raw8),
        b"RG16" => Some(PixelEncoding::Raw16),
        _ => None,
    }
}

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_SATURATION: u32 = 0x0098_0902;
const CID_HUE: u32 = 0x0098_0903;
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_RED_BALANCE: u32 = 0x0098_090e;
const CID_BLUE_BALANCE: u32 = 0x0098_090f;
const CID_GAMMA: u32 = 0x0098_0910;
const CID_AUTOGAIN: u32 = 0x0098_0912;
const CID_GAIN: u32 = 0x0098_0913;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
const CID_SHARPNESS: u32 = 0x0098_091b;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_PAN_ABSOLUTE: u32 = 0x009a_0908;
const CID_TILT_ABSOLUTE: u32 = 0x009a_0909;
const CID_FOCUS_ABSOLUTE: u32 = 0x009a_090a;
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
const CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;
const CID_IRIS_ABSOLUTE: u32 = 0x009a_0911;

/// `V4L2_CID_EXPOSURE_AUTO` menu entries.
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

#[derive(Debug, Clone, Copy)]
enum AutoControl {
    None,
    Boolean(u32),
    ExposureMenu(u32),
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    id: FeatureId,
    cid: u32,
    /// Second component, R/V, for white balance.
    pair: Option<u32>,
    auto: AutoControl,
}

const fn bind(id: FeatureId, cid: u32, auto: AutoControl) -> Binding {
    Binding {
        id,
        cid,
        pair: None,
        auto,
    }
}

static BINDINGS: [Binding; 14] = [
    bind(FeatureId::Brightness, CID_BRIGHTNESS, AutoControl::None),
    bind(FeatureId::Sharpness, CID_SHARPNESS, AutoControl::None),
    Binding {
        id: FeatureId::WhiteBalance,
        cid: CID_BLUE_BALANCE,
        pair: Some(CID_RED_BALANCE),
        auto: AutoControl::Boolean(CID_AUTO_WHITE_BALANCE),
    },
    bind(FeatureId::Hue, CID_HUE, AutoControl::None),
    bind(FeatureId::Saturation, CID_SATURATION, AutoControl::None),
    bind(FeatureId::Gamma, CID_GAMMA, AutoControl::None),
    bind(
        FeatureId::Shutter,
        CID_EXPOSURE_ABSOLUTE,
        AutoControl::ExposureMenu(CID_EXPOSURE_AUTO),
    ),
    bind(
        FeatureId::Gain,
        CID_GAIN,
        AutoControl::Boolean(CID_AUTOGAIN),
    ),
    bind(FeatureId::Iris, CID_IRIS_ABSOLUTE, AutoControl::None),
    bind(
        FeatureId::Focus,
        CID_FOCUS_ABSOLUTE,
        AutoControl::Boolean(CID_FOCUS_AUTO),
    ),
    bind(
        FeatureId::Temperature,
        CID_WHITE_BALANCE_TEMPERATURE,
        AutoControl::None,
    ),
    bind(FeatureId::Zoom, CID_ZOOM_ABSOLUTE, AutoControl::None),
    bind(FeatureId::Pan, CID_PAN_ABSOLUTE, AutoControl::None),
    bind(FeatureId::Tilt, CID_TILT_ABSOLUTE, AutoControl::None),
];

fn binding(id: FeatureId) -> Option<&'static Binding> {
    BINDINGS.iter().find(|binding| binding.id == id)
}

/// Feature controls of a V4L2 device, backed by user and camera class controls.
///
/// Controls with a negative minimum are shifted so feature values start at zero.
#[derive(Clone)]
pub struct V4l2Controls {
    device: Arc<Device>,
    offsets: HashMap<u32, i64>,
}

impl V4l2Controls {
    fn read(&self, cid: u32) -> Result<i64> {
        let control = self
            .device
            .control(cid)
            .map_err(|err| CaptureError::driver("VIDIOC_G_EXT_CTRLS", err))?;
        Ok(match control.value {
            Value::Integer(value) => value,
            Value::Boolean(on) => i64::from(on),
            _ => 0,
        })
    }

    fn write(&self, cid: u32, value: Value) -> Result<()> {
        self.device
            .set_control(Control { id: cid, value })
            .map_err(|err| CaptureError::driver("VIDIOC_S_EXT_CTRLS", err))
    }

    fn write_value(&self, cid: u32, value: u32) -> Result<()> {
        let offset = self.offsets.get(&cid).copied().unwrap_or_default();
        self.write(cid, Value::Integer(i64::from(value) + offset))
    }

    fn read_value(&self, cid: u32) -> Result<u32> {
        let offset = self.offsets.get(&cid).copied().unwrap_or_default();
        Ok(to_feature_value(self.read(cid)?, offset))
    }

    fn describe(
        &mut self,
        binding: &Binding,
        descriptions: &[Description],
    ) -> Result<Option<FeatureInfo>> {
        let find = |cid: u32| descriptions.iter().find(|desc| desc.id == cid);
        let Some(desc) = find(binding.cid) else {
            return Ok(None);
        };

        let offset = desc.minimum.min(0);
        self.offsets.insert(binding.cid, offset);
        if let Some(pair) = binding.pair.and_then(find) {
            self.offsets.insert(pair.id, pair.minimum.min(0));
        }

        let mut modes = vec![FeatureMode::Manual];
        let mut current_mode = FeatureMode::Manual;
        let auto = match binding.auto {
            AutoControl::Boolean(cid) | AutoControl::ExposureMenu(cid) => find(cid).map(|_| cid),
            AutoControl::None => None,
        };
        if let Some(cid) = auto {
            modes.push(FeatureMode::Auto);
            let raw = self.read(cid)?;
            let automatic = match binding.auto {
                AutoControl::ExposureMenu(_) => raw != EXPOSURE_MANUAL,
                _ => raw != 0,
            };
            if automatic {
                current_mode = FeatureMode::Auto;
            }
        }

        let value = self.read_value(binding.cid)?;
        let white_balance = match binding.pair {
            Some(red) => Some((value, self.read_value(red)?)),
            None => None,
        };

        Ok(Some(FeatureInfo {
            id: binding.id,
            on_off_capable: false,
            is_on: true,
            modes,
            current_mode,
            min: to_feature_value(desc.minimum, offset),
            max: to_feature_value(desc.maximum, offset),
            value,
            white_balance,
        }))
    }

    fn bound(id: FeatureId) -> Result<&'static Binding> {
        binding(id).ok_or_else(|| CaptureError::Feature {
            feature: id,
            message: "no V4L2 control".to_owned(),
        })
    }
}

fn to_feature_value(raw: i64, offset: i64) -> u32 {
    u32::try_from((raw - offset).max(0)).unwrap_or(u32::MAX)
}

impl ControlSurface for V4l2Controls {
    fn features(&mut self) -> Result<Vec<FeatureInfo>> {
        let descriptions = self
            .device
            .query_controls()
            .map_err(|err| CaptureError::driver("VIDIOC_QUERY_EXT_CTRL", err))?;

        let mut features = Vec::new();
        for binding in &BINDINGS {
            if let Some(info) = self.describe(binding, &descriptions)? {
                features.push(info);
            }
        }
        Ok(features)
    }

    fn set_power(&mut self, id: FeatureId, on: bool) -> Result<()> {
        if on {
            return Ok(());
        }
        Err(CaptureError::Feature {
            feature: id,
            message: "V4L2 controls cannot be switched off".to_owned(),
        })
    }

    fn set_mode(&mut self, id: FeatureId, mode: FeatureMode) -> Result<()> {
        let binding = Self::bound(id)?;
        match (binding.auto, mode) {
            (AutoControl::Boolean(cid), FeatureMode::Manual | FeatureMode::Auto) => {
                self.write(cid, Value::Boolean(mode == FeatureMode::Auto))
            }
            (AutoControl::ExposureMenu(cid), FeatureMode::Manual | FeatureMode::Auto) => {
                let entry = if mode == FeatureMode::Auto {
                    EXPOSURE_APERTURE_PRIORITY
                } else {
                    EXPOSURE_MANUAL
                };
                self.write(cid, Value::Integer(entry))
            }
            (AutoControl::None, FeatureMode::Manual) => Ok(()),
            _ => Err(CaptureError::Feature {
                feature: id,
                message: format!("mode {mode} not available"),
            }),
        }
    }

    fn set_value(&mut self, id: FeatureId, value: u32) -> Result<()> {
        let binding = Self::bound(id)?;
        self.write_value(binding.cid, value)
    }

    fn set_white_balance(&mut self, blue_u: u32, red_v: u32) -> Result<()> {
        self.write_value(CID_BLUE_BALANCE, blue_u)?;
        self.write_value(CID_RED_BALANCE, red_v)
    }
}
