//! Scripted mock driver for testing without hardware.
//!
//! Every mock camera shares its state with a [`MockSpy`] so tests can
//! observe what the engine did to the device: opens, configured modes,
//! streaming calls, ring buffer traffic and feature writes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::mode::{FrameRate, OperationMode, PixelEncoding, VideoMode};
use crate::traits::{
    ByteOrder, Camera, ControlSurface, DequeuePolicy, DeviceId, Driver, FeatureId, FeatureInfo,
    FeatureMode, RawFrame,
};
use crate::validation::SMPTE_COLOR_BARS;

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with the given R, G, B values.
    Solid(u8, u8, u8),
}

/// One scripted ring buffer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFrame {
    /// A good frame showing the pattern.
    Pattern(TestPattern),
    /// A frame flagged corrupt by the driver.
    Corrupt,
    /// A good-looking frame cut short to the given number of bytes.
    Truncated(usize),
    /// The dequeue fails with a driver error.
    Fail(String),
}

/// A feature write observed by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureCall {
    /// `set_power`
    Power(FeatureId, bool),
    /// `set_mode`
    Mode(FeatureId, FeatureMode),
    /// `set_value`
    Value(FeatureId, u32),
    /// `set_white_balance`
    WhiteBalance(u32, u32),
}

/// Configuration of one mock camera.
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    id: DeviceId,
    name: String,
    modes: Vec<VideoMode>,
    features: Vec<FeatureInfo>,
    script: Vec<ScriptedFrame>,
    stall_after_script: bool,
    backlog: u32,
    pattern: TestPattern,
    frame_interval: Duration,
    fail_open: bool,
    fail_stop: bool,
    failing_features: Vec<FeatureId>,
}

impl MockCameraConfig {
    /// A connected camera with two small fixed modes and a few features.
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id: DeviceId(id),
            name: name.to_owned(),
            modes: vec![
                VideoMode::fixed(64, 48, PixelEncoding::Rgb8, 0, FrameRate::fps(30)),
                VideoMode::fixed(64, 48, PixelEncoding::Mono8, 1, FrameRate::fps(60)),
            ],
            features: default_features(),
            script: Vec::new(),
            stall_after_script: false,
            backlog: 0,
            pattern: TestPattern::ColorBars,
            frame_interval: Duration::from_millis(2),
            fail_open: false,
            fail_stop: false,
            failing_features: Vec::new(),
        }
    }

    /// Identifier of the camera.
    pub const fn id(&self) -> DeviceId {
        self.id
    }

    /// Replace the advertised modes.
    #[must_use]
    pub fn with_modes(mut self, modes: Vec<VideoMode>) -> Self {
        self.modes = modes;
        self
    }

    /// Replace the advertised features.
    #[must_use]
    pub fn with_features(mut self, features: Vec<FeatureInfo>) -> Self {
        self.features = features;
        self
    }

    /// Frames delivered by blocking dequeues before free-running frames.
    #[must_use]
    pub fn with_script(mut self, script: Vec<ScriptedFrame>) -> Self {
        self.script = script;
        self
    }

    /// Deliver nothing once the script is exhausted.
    #[must_use]
    pub const fn stall_after_script(mut self) -> Self {
        self.stall_after_script = true;
        self
    }

    /// Frames already queued when streaming starts.
    #[must_use]
    pub const fn with_backlog(mut self, frames: u32) -> Self {
        self.backlog = frames;
        self
    }

    /// Opening the camera fails.
    #[must_use]
    pub const fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Disabling streaming fails.
    #[must_use]
    pub const fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Every write to `id` is rejected.
    #[must_use]
    pub fn failing_feature(mut self, id: FeatureId) -> Self {
        self.failing_features.push(id);
        self
    }
}

/// Gain, shutter, white balance and an on/off capable brightness.
pub fn default_features() -> Vec<FeatureInfo> {
    let manual_auto = vec![FeatureMode::Manual, FeatureMode::Auto];
    vec![
        FeatureInfo {
            id: FeatureId::Brightness,
            on_off_capable: true,
            is_on: true,
            modes: vec![FeatureMode::Manual],
            current_mode: FeatureMode::Manual,
            min: 0,
            max: 255,
            value: 128,
            white_balance: None,
        },
        FeatureInfo {
            id: FeatureId::WhiteBalance,
            on_off_capable: false,
            is_on: true,
            modes: vec![FeatureMode::Manual, FeatureMode::Auto, FeatureMode::OnePushAuto],
            current_mode: FeatureMode::Auto,
            min: 0,
            max: 1023,
            value: 0,
            white_balance: Some((512, 512)),
        },
        FeatureInfo {
            id: FeatureId::Shutter,
            on_off_capable: false,
            is_on: true,
            modes: manual_auto.clone(),
            current_mode: FeatureMode::Auto,
            min: 1,
            max: 4095,
            value: 100,
            white_balance: None,
        },
        FeatureInfo {
            id: FeatureId::Gain,
            on_off_capable: false,
            is_on: true,
            modes: manual_auto,
            current_mode: FeatureMode::Manual,
            min: 16,
            max: 64,
            value: 32,
            white_balance: None,
        },
    ]
}

#[derive(Debug, Default)]
struct MockState {
    opens: u32,
    open_instances: u32,
    streaming: bool,
    start_calls: u32,
    stop_calls: u32,
    configured: Vec<VideoMode>,
    operation_mode: Option<OperationMode>,
    dequeued: u64,
    enqueued: u64,
    poll_calls: u64,
    script: VecDeque<ScriptedFrame>,
    features: Vec<FeatureInfo>,
    feature_calls: Vec<FeatureCall>,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observer of one mock camera's shared state.
#[derive(Debug, Clone)]
pub struct MockSpy {
    state: SharedState,
}

impl MockSpy {
    /// Number of times the camera was opened.
    pub fn opens(&self) -> u32 {
        lock(&self.state).opens
    }

    /// Whether no opened instance is left.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).open_instances == 0
    }

    /// Whether driver streaming is enabled.
    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    /// Number of `start_streaming` calls.
    pub fn start_calls(&self) -> u32 {
        lock(&self.state).start_calls
    }

    /// Number of `stop_streaming` calls.
    pub fn stop_calls(&self) -> u32 {
        lock(&self.state).stop_calls
    }

    /// Every mode passed to `configure`, oldest first.
    pub fn configured_modes(&self) -> Vec<VideoMode> {
        lock(&self.state).configured.clone()
    }

    /// Last operation mode set.
    pub fn operation_mode(&self) -> Option<OperationMode> {
        lock(&self.state).operation_mode
    }

    /// Frames handed out by dequeue.
    pub fn dequeued(&self) -> u64 {
        lock(&self.state).dequeued
    }

    /// Frames handed back by enqueue.
    pub fn enqueued(&self) -> u64 {
        lock(&self.state).enqueued
    }

    /// Non-blocking dequeue attempts.
    pub fn poll_calls(&self) -> u64 {
        lock(&self.state).poll_calls
    }

    /// Whether every scripted frame was delivered.
    pub fn script_exhausted(&self) -> bool {
        lock(&self.state).script.is_empty()
    }

    /// Device-side feature state.
    pub fn features(&self) -> Vec<FeatureInfo> {
        lock(&self.state).features.clone()
    }

    /// Every feature write attempted, oldest first.
    pub fn feature_calls(&self) -> Vec<FeatureCall> {
        lock(&self.state).feature_calls.clone()
    }

    /// Forget recorded feature writes.
    pub fn clear_feature_calls(&self) {
        lock(&self.state).feature_calls.clear();
    }
}

/// Mock driver holding a fixed set of cameras.
#[derive(Debug, Default)]
pub struct MockDriver {
    cameras: Vec<(Arc<MockCameraConfig>, SharedState)>,
}

impl MockDriver {
    /// A driver with no cameras attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a camera.
    #[must_use]
    pub fn with_camera(mut self, config: MockCameraConfig) -> Self {
        let state = MockState {
            script: config.script.iter().cloned().collect(),
            features: config.features.clone(),
            ..MockState::default()
        };
        self.cameras
            .push((Arc::new(config), Arc::new(Mutex::new(state))));
        self
    }

    /// Spy on the camera with identifier `id`.
    pub fn spy(&self, id: DeviceId) -> Option<MockSpy> {
        self.cameras
            .iter()
            .find(|(config, _)| config.id == id)
            .map(|(_, state)| MockSpy {
                state: Arc::clone(state),
            })
    }
}

impl Driver for MockDriver {
    type Camera = MockCamera;

    fn enumerate(&self) -> Result<Vec<DeviceId>> {
        Ok(self.cameras.iter().map(|(config, _)| config.id).collect())
    }

    fn open(&self, id: DeviceId) -> Result<MockCamera> {
        let (config, state) = self
            .cameras
            .iter()
            .find(|(config, _)| config.id == id)
            .ok_or_else(|| CaptureError::Driver(format!("no mock camera {id}")))?;
        if config.fail_open {
            return Err(CaptureError::Driver(format!("mock camera {id} refused to open")));
        }

        {
            let mut state = lock(state);
            state.opens += 1;
            state.open_instances += 1;
        }
        Ok(MockCamera {
            config: Arc::clone(config),
            state: Arc::clone(state),
            mode: None,
            frame: Vec::new(),
            rendered: None,
            backlog: 0,
            sequence: 0,
            outstanding: false,
            closed: false,
        })
    }
}

/// One opened mock camera.
#[derive(Debug)]
pub struct MockCamera {
    config: Arc<MockCameraConfig>,
    state: SharedState,
    mode: Option<VideoMode>,
    frame: Vec<u8>,
    rendered: Option<(TestPattern, Vec<u8>)>,
    backlog: u32,
    sequence: u32,
    outstanding: bool,
    closed: bool,
}

enum Next {
    Frame {
        pattern: TestPattern,
        corrupt: bool,
        len: Option<usize>,
    },
    Nothing,
}

impl Next {
    const fn frame(pattern: TestPattern) -> Self {
        Self::Frame {
            pattern,
            corrupt: false,
            len: None,
        }
    }
}

impl MockCamera {
    fn next_event(&mut self, policy: DequeuePolicy) -> Result<Next> {
        if self.backlog > 0 {
            self.backlog -= 1;
            return Ok(Next::frame(self.config.pattern));
        }
        if policy == DequeuePolicy::Poll {
            return Ok(Next::Nothing);
        }

        thread::sleep(self.config.frame_interval);
        let scripted = lock(&self.state).script.pop_front();
        match scripted {
            Some(ScriptedFrame::Pattern(pattern)) => Ok(Next::frame(pattern)),
            Some(ScriptedFrame::Corrupt) => Ok(Next::Frame {
                pattern: self.config.pattern,
                corrupt: true,
                len: None,
            }),
            Some(ScriptedFrame::Truncated(len)) => Ok(Next::Frame {
                pattern: self.config.pattern,
                corrupt: false,
                len: Some(len),
            }),
            Some(ScriptedFrame::Fail(message)) => Err(CaptureError::Driver(message)),
            None if self.config.stall_after_script => Ok(Next::Nothing),
            None => Ok(Next::frame(self.config.pattern)),
        }
    }

    fn fill_frame(&mut self, mode: &VideoMode, pattern: TestPattern) {
        let cached = matches!(&self.rendered, Some((rendered, _)) if *rendered == pattern);
        if !cached {
            self.rendered = Some((pattern, render_frame(mode, pattern)));
        }
        if let Some((_, data)) = &self.rendered {
            self.frame.clone_from(data);
        }
    }
}

impl Camera for MockCamera {
    type Controls = MockControls;

    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }

    fn supported_modes(&mut self) -> Result<Vec<VideoMode>> {
        Ok(self.config.modes.clone())
    }

    fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()> {
        lock(&self.state).operation_mode = Some(mode);
        Ok(())
    }

    fn configure(&mut self, mode: &VideoMode) -> Result<()> {
        if !self.config.modes.contains(mode) {
            return Err(CaptureError::UnsupportedMode(*mode));
        }
        lock(&self.state).configured.push(*mode);
        self.mode = Some(*mode);
        self.rendered = None;
        Ok(())
    }

    fn start_streaming(&mut self, _buffer_count: u32) -> Result<()> {
        if self.mode.is_none() {
            return Err(CaptureError::Driver("no video mode configured".to_owned()));
        }
        let mut state = lock(&self.state);
        state.start_calls += 1;
        state.streaming = true;
        self.backlog = self.config.backlog;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.stop_calls += 1;
        state.streaming = false;
        self.outstanding = false;
        self.backlog = 0;
        if self.config.fail_stop {
            return Err(CaptureError::Driver("mock transmission stuck".to_owned()));
        }
        Ok(())
    }

    fn dequeue(&mut self, policy: DequeuePolicy) -> Result<Option<RawFrame<'_>>> {
        let Some(mode) = self.mode.filter(|_| lock(&self.state).streaming) else {
            return Err(CaptureError::Driver("dequeue while not streaming".to_owned()));
        };

        {
            let mut state = lock(&self.state);
            if policy == DequeuePolicy::Poll {
                state.poll_calls += 1;
            }
        }

        let (pattern, corrupt, len) = match self.next_event(policy)? {
            Next::Frame {
                pattern,
                corrupt,
                len,
            } => (pattern, corrupt, len),
            Next::Nothing => return Ok(None),
        };

        self.fill_frame(&mode, pattern);
        if let Some(len) = len {
            self.frame.truncate(len);
        }
        lock(&self.state).dequeued += 1;
        self.outstanding = true;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(Some(RawFrame {
            data: &self.frame,
            width: mode.width,
            height: mode.height,
            encoding: mode.encoding,
            byte_order: ByteOrder::BigEndian,
            data_depth: if mode.encoding.is_16bit() { 16 } else { 8 },
            corrupt,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
        }))
    }

    fn enqueue(&mut self) -> Result<()> {
        if !self.outstanding {
            return Err(CaptureError::Driver("enqueue without a dequeued frame".to_owned()));
        }
        self.outstanding = false;
        lock(&self.state).enqueued += 1;
        Ok(())
    }

    fn controls(&self) -> Result<MockControls> {
        Ok(MockControls {
            state: Arc::clone(&self.state),
            failing: self.config.failing_features.clone(),
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = lock(&self.state);
        state.open_instances = state.open_instances.saturating_sub(1);
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Feature controls of a mock camera.
#[derive(Debug, Clone)]
pub struct MockControls {
    state: SharedState,
    failing: Vec<FeatureId>,
}

impl MockControls {
    fn write<F>(&self, call: FeatureCall, id: FeatureId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut FeatureInfo),
    {
        let mut state = lock(&self.state);
        state.feature_calls.push(call);
        if self.failing.contains(&id) {
            return Err(CaptureError::Driver(format!("{id} write rejected")));
        }
        let feature = state
            .features
            .iter_mut()
            .find(|feature| feature.id == id)
            .ok_or_else(|| CaptureError::Driver(format!("{id} not present")))?;
        apply(feature);
        Ok(())
    }
}

impl ControlSurface for MockControls {
    fn features(&mut self) -> Result<Vec<FeatureInfo>> {
        Ok(lock(&self.state).features.clone())
    }

    fn set_power(&mut self, id: FeatureId, on: bool) -> Result<()> {
        let call = FeatureCall::Power(id, on);
        self.write(call, id, |feature| feature.is_on = on)
    }

    fn set_mode(&mut self, id: FeatureId, mode: FeatureMode) -> Result<()> {
        let call = FeatureCall::Mode(id, mode);
        self.write(call, id, |feature| feature.current_mode = mode)
    }

    fn set_value(&mut self, id: FeatureId, value: u32) -> Result<()> {
        let call = FeatureCall::Value(id, value);
        self.write(call, id, |feature| feature.value = value)
    }

    fn set_white_balance(&mut self, blue_u: u32, red_v: u32) -> Result<()> {
        let call = FeatureCall::WhiteBalance(blue_u, red_v);
        self.write(call, FeatureId::WhiteBalance, |feature| {
            feature.white_balance = Some((blue_u, red_v));
        })
    }
}

/// RGB color of the pattern at column `x`.
fn pattern_rgb(pattern: TestPattern, x: u32, width: u32) -> (u8, u8, u8) {
    match pattern {
        TestPattern::ColorBars => {
            let bar_width = (width / 8).max(1);
            let index = (x / bar_width).min(7) as usize;
            SMPTE_COLOR_BARS.get(index).copied().unwrap_or_default()
        }
        TestPattern::Gradient => {
            #[allow(clippy::cast_possible_truncation)]
            let level = (x * 255 / width.saturating_sub(1).max(1)).min(255) as u8;
            (level, level, level)
        }
        TestPattern::Solid(r, g, b) => (r, g, b),
    }
}

/// Inverse of the BT.601 conversion used by the engine.
#[allow(clippy::many_single_char_names)]
fn rgb_to_yuv((r, g, b): (u8, u8, u8)) -> (u8, u8, u8) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.114f32.mul_add(b, 0.587f32.mul_add(g, 0.299 * r));
    let u = (b - y) / 1.772 + 128.0;
    let v = (r - y) / 1.402 + 128.0;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.round().clamp(0.0, 255.0) as u8 };
    (clamp(y), clamp(u), clamp(v))
}

fn luma(rgb: (u8, u8, u8)) -> u8 {
    rgb_to_yuv(rgb).0
}

fn mean(a: u8, b: u8) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let mean = (u16::from(a) + u16::from(b)).div_ceil(2) as u8;
    mean
}

/// Render a whole frame in the mode's encoding. Variable-ROI modes carry an
/// RGGB mosaic; 16-bit samples are big-endian with 16 significant bits.
pub fn render_frame(mode: &VideoMode, pattern: TestPattern) -> Vec<u8> {
    let (width, height) = (mode.width, mode.height);
    let pixels: Vec<(u8, u8, u8)> = (0..height)
        .flat_map(|_| (0..width).map(move |x| pattern_rgb(pattern, x, width)))
        .collect();
    let wide = mode.encoding.is_16bit();
    let mut out = Vec::with_capacity(mode.frame_len());
    let push = |out: &mut Vec<u8>, sample: u8| {
        if wide {
            out.extend_from_slice(&[sample, 0]);
        } else {
            out.push(sample);
        }
    };

    if mode.is_variable_roi() {
        for (index, (r, g, b)) in pixels.into_iter().enumerate() {
            let x = index % width as usize;
            let y = index / width as usize;
            let sample = match (y % 2 == 0, x % 2 == 0) {
                (true, true) => r,
                (false, false) => b,
                _ => g,
            };
            push(&mut out, sample);
        }
        return out;
    }

    match mode.encoding {
        PixelEncoding::Rgb8 | PixelEncoding::Rgb16 => {
            for (r, g, b) in pixels {
                for channel in [r, g, b] {
                    push(&mut out, channel);
                }
            }
        }
        PixelEncoding::Mono8
        | PixelEncoding::Mono16
        | PixelEncoding::Raw8
        | PixelEncoding::Raw16 => {
            for rgb in pixels {
                push(&mut out, luma(rgb));
            }
        }
        PixelEncoding::Yuv444 => {
            for rgb in pixels {
                let (y, u, v) = rgb_to_yuv(rgb);
                out.extend_from_slice(&[u, y, v]);
            }
        }
        PixelEncoding::Yuv422 | PixelEncoding::Yuyv => {
            for pair in pixels.chunks_exact(2) {
                if let [first, second] = *pair {
                    let (y0, u0, v0) = rgb_to_yuv(first);
                    let (y1, u1, v1) = rgb_to_yuv(second);
                    let (u, v) = (mean(u0, u1), mean(v0, v1));
                    if mode.encoding == PixelEncoding::Yuyv {
                        out.extend_from_slice(&[y0, u, y1, v]);
                    } else {
                        out.extend_from_slice(&[u, y0, v, y1]);
                    }
                }
            }
        }
        PixelEncoding::Yuv411 => {
            for quad in pixels.chunks_exact(4) {
                if let [p0, p1, p2, p3] = *quad {
                    let (y0, u, v) = rgb_to_yuv(p0);
                    out.extend_from_slice(&[u, y0, luma(p1), v, luma(p2), luma(p3)]);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::convert_frame;
    use crate::pool::{ChannelLayout, PixelBuffer};

    fn open_single(config: MockCameraConfig) -> (MockCamera, MockSpy) {
        let id = config.id();
        let driver = MockDriver::new().with_camera(config);
        let spy = driver.spy(id).expect("camera registered");
        let camera = driver.open(id).expect("open");
        (camera, spy)
    }

    fn rgb_mode() -> VideoMode {
        VideoMode::fixed(64, 48, PixelEncoding::Rgb8, 0, FrameRate::fps(30))
    }

    #[test]
    fn test_mock_driver_enumerates() {
        let driver = MockDriver::new()
            .with_camera(MockCameraConfig::new(1, "A"))
            .with_camera(MockCameraConfig::new(7, "B"));
        let ids = driver.enumerate().expect("enumerate");
        assert_eq!(ids, vec![DeviceId(1), DeviceId(7)]);
        assert!(driver.open(DeviceId(3)).is_err());
    }

    #[test]
    fn test_mock_stream_capture() {
        let (mut camera, spy) = open_single(MockCameraConfig::new(1, "Cam"));
        camera.configure(&rgb_mode()).expect("configure");
        camera.start_streaming(4).expect("start");

        let first = camera
            .dequeue(DequeuePolicy::Wait)
            .expect("dequeue")
            .expect("frame");
        assert_eq!(first.sequence, 0);
        assert_eq!(first.data.len(), 64 * 48 * 3);
        camera.enqueue().expect("enqueue");

        let second = camera
            .dequeue(DequeuePolicy::Wait)
            .expect("dequeue")
            .expect("frame");
        assert_eq!(second.sequence, 1);
        camera.enqueue().expect("enqueue");

        assert_eq!(spy.dequeued(), 2);
        assert_eq!(spy.enqueued(), 2);
    }

    #[test]
    fn test_dequeue_requires_streaming() {
        let (mut camera, _spy) = open_single(MockCameraConfig::new(1, "Cam"));
        camera.configure(&rgb_mode()).expect("configure");
        assert!(camera.dequeue(DequeuePolicy::Wait).is_err());
    }

    #[test]
    fn test_enqueue_without_dequeue_fails() {
        let (mut camera, _spy) = open_single(MockCameraConfig::new(1, "Cam"));
        camera.configure(&rgb_mode()).expect("configure");
        camera.start_streaming(4).expect("start");
        assert!(camera.enqueue().is_err());
    }

    #[test]
    fn test_poll_only_sees_backlog() {
        let (mut camera, spy) = open_single(MockCameraConfig::new(1, "Cam").with_backlog(2));
        camera.configure(&rgb_mode()).expect("configure");
        camera.start_streaming(4).expect("start");

        for _ in 0..2 {
            assert!(camera.dequeue(DequeuePolicy::Poll).expect("poll").is_some());
            camera.enqueue().expect("enqueue");
        }
        assert!(camera.dequeue(DequeuePolicy::Poll).expect("poll").is_none());
        assert_eq!(spy.poll_calls(), 3);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut camera, spy) = open_single(MockCameraConfig::new(1, "Cam"));
        assert!(!spy.is_closed());
        camera.close();
        camera.close();
        drop(camera);
        assert!(spy.is_closed());
        assert_eq!(spy.opens(), 1);
    }

    #[test]
    fn test_controls_record_writes() {
        let config = MockCameraConfig::new(1, "Cam").failing_feature(FeatureId::Gain);
        let (camera, spy) = open_single(config);
        let mut controls = camera.controls().expect("controls");

        controls.set_value(FeatureId::Shutter, 200).expect("write");
        assert!(controls.set_value(FeatureId::Gain, 20).is_err());
        assert!(controls.set_value(FeatureId::Zoom, 1).is_err());

        assert_eq!(
            spy.feature_calls(),
            vec![
                FeatureCall::Value(FeatureId::Shutter, 200),
                FeatureCall::Value(FeatureId::Gain, 20),
                FeatureCall::Value(FeatureId::Zoom, 1),
            ]
        );
        let shutter = spy
            .features()
            .into_iter()
            .find(|feature| feature.id == FeatureId::Shutter)
            .expect("shutter present");
        assert_eq!(shutter.value, 200);
    }

    #[test]
    fn test_color_bars_pattern() {
        let data = render_frame(&rgb_mode(), TestPattern::ColorBars);
        assert_eq!(data.len(), 64 * 48 * 3);
        assert_eq!(&data[..3], &[235, 235, 235]);
    }

    #[test]
    fn test_gradient_pattern() {
        let mode = VideoMode::fixed(64, 48, PixelEncoding::Mono8, 1, FrameRate::fps(60));
        let data = render_frame(&mode, TestPattern::Gradient);
        assert!(data[0] < 10);
        assert!(data[63] > 200);
    }

    #[test]
    fn test_rendered_yuv_converts_back() {
        let solid = TestPattern::Solid(180, 90, 40);
        for encoding in [
            PixelEncoding::Yuv411,
            PixelEncoding::Yuv422,
            PixelEncoding::Yuyv,
            PixelEncoding::Yuv444,
        ] {
            let mode = VideoMode::fixed(16, 4, encoding, 0, FrameRate::fps(15));
            let data = render_frame(&mode, solid);
            let raw = RawFrame {
                data: &data,
                width: 16,
                height: 4,
                encoding,
                byte_order: ByteOrder::BigEndian,
                data_depth: 8,
                corrupt: false,
                sequence: 0,
                timestamp: Duration::ZERO,
            };
            let mut out = PixelBuffer::new(16, 4, ChannelLayout::Rgb);
            convert_frame(&raw, false, &mut out).expect("convert");

            let (r, g, b) = out.rgb_at(5, 2).expect("in bounds");
            assert!(r.abs_diff(180) <= 2, "{encoding:?}: r={r}");
            assert!(g.abs_diff(90) <= 2, "{encoding:?}: g={g}");
            assert!(b.abs_diff(40) <= 2, "{encoding:?}: b={b}");
        }
    }

    #[test]
    fn test_rendered_raw16_mosaic() {
        let mode = VideoMode::variable_roi(4, 4, PixelEncoding::Raw16, 0);
        let data = render_frame(&mode, TestPattern::Solid(200, 100, 50));
        assert_eq!(data.len(), 4 * 4 * 2);
        // R G / G B sites, most significant byte first
        assert_eq!(&data[..4], &[200, 0, 100, 0]);
        assert_eq!(&data[8..12], &[100, 0, 50, 0]);
    }
}
