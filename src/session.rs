//! Capture session: background acquisition and latest-frame hand-off.
//!
//! A session owns one [`DeviceHandle`] and one [`BufferPool`]. While
//! streaming, the handle lives on a dedicated acquisition thread which
//! converts each raw frame into a pooled buffer and publishes it into a
//! single-slot overwrite channel. The consumer polls that slot; neither side
//! ever waits for the other beyond the pointer swap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::convert::convert_frame;
use crate::device::{Device, DeviceHandle, DriverContext};
use crate::error::{CaptureError, Result};
use crate::mode::{DiscardPolicy, ModeSelection, Options, VideoMode};
use crate::pool::{BufferPool, ChannelLayout, PixelBuffer};
use crate::traits::{ControlsOf, DequeuePolicy, Driver};

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Configured, not streaming.
    Idle,
    /// Driver streaming enabled, acquisition thread launching.
    Starting,
    /// Acquisition thread running.
    Streaming,
    /// Acquisition thread told to quit, joining.
    Stopping,
}

#[derive(Default)]
struct SlotState {
    frame: Option<Arc<PixelBuffer>>,
    has_new: bool,
}

/// Single-slot overwrite channel holding the newest converted frame.
#[derive(Default)]
struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the latest frame. The displaced frame is dropped outside the lock.
    fn publish(&self, frame: PixelBuffer) {
        let displaced = {
            let mut state = self.lock();
            state.has_new = true;
            state.frame.replace(Arc::new(frame))
        };
        drop(displaced);
    }

    fn has_new(&self) -> bool {
        self.lock().has_new
    }

    /// Discard an unconsumed frame.
    fn clear(&self) {
        let displaced = {
            let mut state = self.lock();
            state.has_new = false;
            state.frame.take()
        };
        drop(displaced);
    }

    /// Take the latest frame if one arrived since the last take.
    fn take_new(&self) -> Option<Arc<PixelBuffer>> {
        let mut state = self.lock();
        if !state.has_new {
            return None;
        }
        state.has_new = false;
        state.frame.take()
    }
}

type WorkerResult<D> = (DeviceHandle<D>, Result<()>);

/// Everything the acquisition thread needs besides the device handle.
struct Acquisition {
    mode: VideoMode,
    discard: DiscardPolicy,
    pool: BufferPool,
    slot: Arc<FrameSlot>,
    quit: Arc<AtomicBool>,
}

impl Acquisition {
    fn run<D: Driver>(&self, handle: &mut DeviceHandle<D>) -> Result<()> {
        while !self.quit.load(Ordering::Acquire) {
            if self.discard == DiscardPolicy::DropBacklog {
                drain_backlog(handle)?;
            }

            let Some(frame) = handle.dequeue(DequeuePolicy::Wait)? else {
                continue;
            };

            if frame.corrupt {
                log::trace!("dropping corrupt frame {}", frame.sequence);
                handle.enqueue()?;
                continue;
            }

            let mut buffer = self.pool.acquire();
            let converted = convert_frame(&frame, self.mode.is_variable_roi(), &mut buffer);
            let sequence = frame.sequence;
            handle.enqueue()?;
            if let Err(err) = converted {
                log::debug!("dropping frame {sequence}: {err}");
                continue;
            }

            self.slot.publish(buffer);
        }
        Ok(())
    }
}

/// Hand every already queued frame straight back so the next blocking
/// dequeue yields the newest one.
fn drain_backlog<D: Driver>(handle: &mut DeviceHandle<D>) -> Result<()> {
    while handle.dequeue(DequeuePolicy::Poll)?.is_some() {
        handle.enqueue()?;
    }
    Ok(())
}

/// A capture session on one device.
pub struct CaptureSession<D: Driver> {
    handle: Option<DeviceHandle<D>>,
    worker: Option<JoinHandle<WorkerResult<D>>>,
    device: Device,
    controls: ControlsOf<D>,
    options: Options,
    mode: VideoMode,
    pool: BufferPool,
    slot: Arc<FrameSlot>,
    quit: Arc<AtomicBool>,
    state: SessionState,
    current: Option<Arc<PixelBuffer>>,
    pending_error: Option<CaptureError>,
    cleanup_error: Option<CaptureError>,
}

impl<D: Driver> CaptureSession<D> {
    /// Create a session on `device`, or on the first enumerated device when `None`.
    ///
    /// The session starts [`SessionState::Idle`] with the resolved mode configured.
    pub fn create(
        context: &Arc<DriverContext<D>>,
        options: Options,
        device: Option<&Device>,
    ) -> Result<Self> {
        let device = match device {
            Some(device) => device.clone(),
            None => context
                .devices(false)?
                .into_iter()
                .next()
                .ok_or(CaptureError::NoDeviceAvailable)?,
        };

        let Some(mode) = options.resolve_mode(&device.modes) else {
            return Err(CaptureError::Driver(format!("{} advertises no video modes", device.name)));
        };
        if !device.supports(&mode) {
            return Err(CaptureError::UnsupportedMode(mode));
        }

        let mut handle = DeviceHandle::open(context, &device)?;
        handle.set_operation_mode(options.operation_mode)?;
        handle.configure(&mode)?;
        let controls = handle.controls()?;

        let fallback = (mode.width, mode.height);
        let (width, height) = device.max_resolution().unwrap_or(fallback);
        let pool = BufferPool::new(options.pool_size, width, height, ChannelLayout::Rgb);
        pool.resize(mode.width, mode.height);

        log::info!(
            "capture session on {} ({}) using {mode}, ISO {}",
            device.name,
            device.id,
            options.operation_mode.iso_speed()
        );

        Ok(Self {
            handle: Some(handle),
            worker: None,
            device,
            controls,
            options,
            mode,
            pool,
            slot: Arc::new(FrameSlot::default()),
            quit: Arc::new(AtomicBool::new(false)),
            state: SessionState::Idle,
            current: None,
            pending_error: None,
            cleanup_error: None,
        })
    }

    /// Begin capturing. Does nothing when already streaming.
    pub fn start(&mut self) -> Result<()> {
        self.reap_worker();
        if self.state == SessionState::Streaming {
            return Ok(());
        }

        let mut handle = self.handle.take().ok_or(CaptureError::DeviceLost)?;
        self.state = SessionState::Starting;

        if let Err(err) = handle.start_streaming(self.options.driver_buffers) {
            if let Err(cleanup) = handle.stop_streaming() {
                log::warn!("failed to disable streaming after start failure: {cleanup}");
            }
            self.handle = Some(handle);
            self.state = SessionState::Idle;
            return Err(err);
        }

        self.quit.store(false, Ordering::Release);
        let acquisition = Acquisition {
            mode: self.mode,
            discard: self.options.discard_policy,
            pool: self.pool.clone(),
            slot: Arc::clone(&self.slot),
            quit: Arc::clone(&self.quit),
        };

        let spawned = thread::Builder::new()
            .name(format!("capture-{}", self.device.id))
            .spawn(move || {
                let result = acquisition.run(&mut handle);
                (handle, result)
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                self.state = SessionState::Streaming;
                if let Some(stale) = self.pending_error.take() {
                    log::debug!("discarding stale loop error: {stale}");
                }
                log::info!("capture started on {} at {}", self.device.name, self.mode);
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Idle;
                Err(CaptureError::Io(err))
            }
        }
    }

    /// Stop capturing and wait for the acquisition thread to exit.
    ///
    /// Does nothing when idle. Cleanup failures do not abort the stop; the
    /// first one is kept in [`cleanup_error`](Self::cleanup_error).
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            self.state = SessionState::Idle;
            return;
        };

        self.state = SessionState::Stopping;
        self.quit.store(true, Ordering::Release);
        self.finish_worker(worker);
        log::info!("capture stopped on {}", self.device.name);
    }

    /// Join a worker, take the handle back and disable driver streaming.
    fn finish_worker(&mut self, worker: JoinHandle<WorkerResult<D>>) {
        match worker.join() {
            Ok((mut handle, result)) => {
                if let Err(err) = result {
                    log::warn!("acquisition loop on {} failed: {err}", self.device.name);
                    self.pending_error.get_or_insert(err);
                }
                if let Err(err) = handle.stop_streaming() {
                    log::warn!("failed to disable streaming on {}: {err}", self.device.name);
                    self.cleanup_error.get_or_insert(err);
                }
                self.handle = Some(handle);
            }
            Err(_) => {
                log::warn!("acquisition thread on {} panicked", self.device.name);
                self.cleanup_error.get_or_insert(CaptureError::DeviceLost);
            }
        }
        self.state = SessionState::Idle;
    }

    /// Collect an acquisition thread that exited on its own.
    fn reap_worker(&mut self) {
        if !self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            self.finish_worker(worker);
        }
    }

    /// Whether the acquisition loop is running.
    pub fn is_streaming(&mut self) -> bool {
        self.reap_worker();
        self.state == SessionState::Streaming
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Switch to another video mode, restarting capture if it was running.
    pub fn set_video_mode(&mut self, mode: VideoMode) -> Result<()> {
        if !self.device.supports(&mode) {
            return Err(CaptureError::UnsupportedMode(mode));
        }

        let was_streaming = self.is_streaming();
        self.stop();

        let handle = self.handle.as_mut().ok_or(CaptureError::DeviceLost)?;
        handle.configure(&mode)?;
        self.pool.resize(mode.width, mode.height);
        self.mode = mode;
        self.options.mode = ModeSelection::Explicit(mode);
        self.slot.clear();
        self.current = None;
        log::info!("video mode on {} set to {mode}", self.device.name);

        if was_streaming {
            self.start()?;
        }
        Ok(())
    }

    /// Whether a frame arrived since the last [`get_frame`](Self::get_frame).
    ///
    /// A failure of the acquisition loop is returned here once; the session
    /// is idle afterwards.
    pub fn check_new_frame(&mut self) -> Result<bool> {
        self.reap_worker();
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        Ok(self.slot.has_new())
    }

    /// The latest frame. Clears the new-frame flag; without a newer frame,
    /// repeated calls return the same buffer.
    pub fn get_frame(&mut self) -> Option<Arc<PixelBuffer>> {
        if let Some(frame) = self.slot.take_new() {
            self.current = Some(frame);
        }
        self.current.clone()
    }

    /// Configured video mode.
    pub const fn video_mode(&self) -> &VideoMode {
        &self.mode
    }

    /// Device the session captures from.
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Session options.
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Pixel buffer pool used by the acquisition loop.
    pub const fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// A feature control surface for the session's device.
    pub fn controls(&self) -> ControlsOf<D> {
        self.controls.clone()
    }

    /// First failure swallowed by [`stop`](Self::stop).
    pub const fn cleanup_error(&self) -> Option<&CaptureError> {
        self.cleanup_error.as_ref()
    }
}

impl<D: Driver> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.stop();
    }
}
